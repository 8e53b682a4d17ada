use crate::{
    format::{FormatError, ResponseFormatter},
    report::CallSummary,
};
use prost_reflect::DynamicMessage;
use std::io::Write;
use tonic::{Code, Status};
use tracing::debug;

/// Accumulates request/response counts and the terminal status of one call.
///
/// Responses are written to the output stream as they arrive.
pub struct EventHandler<'a> {
    formatter: &'a ResponseFormatter,
    out: &'a mut (dyn Write + Send),
    num_requests: usize,
    num_responses: usize,
    status: Option<Status>,
}

impl<'a> EventHandler<'a> {
    pub fn new(formatter: &'a ResponseFormatter, out: &'a mut (dyn Write + Send)) -> Self {
        Self {
            formatter,
            out,
            num_requests: 0,
            num_responses: 0,
            status: None,
        }
    }

    pub fn on_request_sent(&mut self) {
        self.num_requests += 1;
    }

    /// Raises the request count to `sent` (counts never go down).
    pub fn sync_requests_sent(&mut self, sent: usize) {
        self.num_requests = self.num_requests.max(sent);
    }

    pub fn on_response(&mut self, message: &DynamicMessage) -> Result<(), FormatError> {
        self.num_responses += 1;
        debug!(count = self.num_responses, "response received");

        let rendered = self.formatter.format_message(message)?;
        writeln!(self.out, "{rendered}")?;
        self.out.flush()?;
        Ok(())
    }

    pub fn on_status(&mut self, status: Status) {
        debug!(code = ?status.code(), status_message = status.message(), "terminal status");
        self.status = Some(status);
    }

    /// The recorded status; OK when none was recorded.
    pub fn finish(self) -> CallSummary {
        CallSummary {
            requests_sent: self.num_requests,
            responses_received: self.num_responses,
            status: self.status.unwrap_or_else(|| Status::new(Code::Ok, "")),
        }
    }
}
