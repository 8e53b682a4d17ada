//! # Result Reporter
//!
//! Turns the outcome of a call into the summary line, the rendered terminal status and the
//! process exit code.
//!
//! | Outcome | Exit code |
//! |---|---|
//! | `OK` | `0` |
//! | any other status code `c` | `64 + c` |
//! | connection or setup failure | [`EXIT_FAILURE`] |
//! | external termination | [`EXIT_TERMINATED`] |
use crate::format::ResponseFormatter;
use std::io::Write;
use tonic::{Code, Status};
use tracing::warn;

/// Base added to a non-OK status code to form the exit code.
pub const STATUS_CODE_OFFSET: i32 = 64;

/// Exit code of failures that happen before any status exists.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code after an external termination request.
pub const EXIT_TERMINATED: i32 = 130;

/// Counts and terminal status accumulated during one call.
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub requests_sent: usize,
    pub responses_received: usize,
    pub status: Status,
}

/// `""` for exactly one, `"s"` otherwise.
pub fn plural_suffix(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

pub fn summary_line(requests_sent: usize, responses_received: usize) -> String {
    format!(
        "Sent {requests_sent} request{} and received {responses_received} response{}",
        plural_suffix(requests_sent),
        plural_suffix(responses_received)
    )
}

pub fn exit_code(code: Code) -> i32 {
    match code {
        Code::Ok => 0,
        code => STATUS_CODE_OFFSET + code as i32,
    }
}

/// Writes the summary line to `out` and, when the status is not OK, the rendered status to `err`.
///
/// Returns the exit code derived from the status.
pub fn report(
    summary: &CallSummary,
    formatter: &ResponseFormatter,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> i32 {
    let line = summary_line(summary.requests_sent, summary.responses_received);
    if let Err(e) = writeln!(out, "{line}") {
        warn!(error = %e, "failed to write summary");
    }

    if summary.status.code() != Code::Ok {
        let rendered = formatter.format_status(&summary.status);
        if let Err(e) = writeln!(err, "ERROR:\n{rendered}") {
            warn!(error = %e, "failed to write status");
        }
    }

    exit_code(summary.status.code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Format, FormatOptions};
    use prost_reflect::DescriptorPool;

    const ALL_CODES: [Code; 17] = [
        Code::Ok,
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    fn formatter() -> ResponseFormatter {
        let pool =
            DescriptorPool::from_file_descriptor_set(echo_service::file_descriptor_set()).unwrap();
        let method = pool
            .get_service_by_name("echo.EchoService")
            .unwrap()
            .methods()
            .next()
            .unwrap();
        ResponseFormatter::new(Format::Json, FormatOptions::default(), &method)
    }

    #[test]
    fn test_exit_code_law() {
        for code in ALL_CODES {
            let expected = if code == Code::Ok { 0 } else { 64 + code as i32 };
            assert_eq!(exit_code(code), expected, "{code:?}");
        }
        assert_eq!(exit_code(Code::NotFound), 69);
    }

    #[test]
    fn test_plural_suffix_law() {
        assert_eq!(plural_suffix(0), "s");
        assert_eq!(plural_suffix(1), "");
        for count in 2..100 {
            assert_eq!(plural_suffix(count), "s");
        }
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(summary_line(1, 1), "Sent 1 request and received 1 response");
        assert_eq!(summary_line(0, 3), "Sent 0 requests and received 3 responses");
    }

    #[test]
    fn test_report_ok_writes_summary_only() {
        let summary = CallSummary {
            requests_sent: 1,
            responses_received: 1,
            status: Status::new(Code::Ok, ""),
        };
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = report(&summary, &formatter(), &mut out, &mut err);

        assert_eq!(code, 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Sent 1 request and received 1 response\n"
        );
        assert!(err.is_empty());
    }

    #[test]
    fn test_report_not_found_writes_status() {
        let summary = CallSummary {
            requests_sent: 2,
            responses_received: 0,
            status: Status::not_found("no such thing"),
        };
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = report(&summary, &formatter(), &mut out, &mut err);

        assert_eq!(code, 69);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Sent 2 requests and received 0 responses\n"
        );
        let err = String::from_utf8(err).unwrap();
        assert!(err.starts_with("ERROR:\n"));
        assert!(err.contains("\"code\": 5"));
        assert!(err.contains("no such thing"));
    }
}
