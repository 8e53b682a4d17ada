//! # Invocation Pipeline
//!
//! One [`Invocation`] performs exactly one call:
//!
//! 1. **Dialing**: open the [`Connection`] under the connect deadline.
//! 2. **Resolving**: build the descriptor source and resolve the method symbol.
//! 3. **Invoking**: stream requests from the payload, write responses as they arrive.
//! 4. **Reporting**: print the summary line and map the terminal status to an exit code.
//!
//! The [`Session`] holding the connection and reflection stream is released on every exit path,
//! including external termination, before the exit callback runs.
mod config;
mod context;
mod handler;
mod rpc;
mod session;

pub use config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_TIME, Exit, InvocationConfig, ProcessExit};
pub use context::{DeadlineExceeded, InvocationContext};
pub use handler::EventHandler;
pub use rpc::{ensure_extensions, invoke_rpc, parse_symbol, resolve_method};
pub use session::Session;

use crate::{
    connection::{Connection, DialError},
    descriptor::SourceError,
    format::{FormatError, RequestParser, RequestPayload, RequestSupplier, ResponseFormatter},
    grpc::client::{GrpcClient, GrpcRequestError},
    report::{self, CallSummary, EXIT_FAILURE, EXIT_TERMINATED},
};
use prost_reflect::MethodDescriptor;
use std::{
    future::Future,
    io::{self, Read, Write},
};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(
        "Invalid method symbol '{0}', expected 'package.Service/Method' or 'package.Service.Method'"
    )]
    InvalidSymbol(String),
    #[error("Symbol '{0}' is not a service")]
    NotAService(String),
    #[error("Service '{service}' does not include a method named '{method}'")]
    MethodNotFound { service: String, method: String },
    #[error("Method '{0}' takes a single request message, but more than one was supplied")]
    TooManyRequests(String),
    #[error("Failed to resolve the method: '{0}'")]
    Source(#[from] SourceError),
    #[error("Failed to send the request: '{0}'")]
    Grpc(#[from] GrpcRequestError),
    #[error("{0}")]
    Format(#[from] FormatError),
    #[error("Deadline exceeded while {0}")]
    DeadlineExceeded(&'static str),
    #[error("The connection is already closed")]
    ConnectionClosed,
}

enum Outcome {
    /// The target could not be dialed.
    Fatal(DialError),
    /// Failed before any request was sent.
    Failed(InvokeError),
    Completed {
        summary: CallSummary,
        formatter: ResponseFormatter,
    },
    Terminated,
}

/// Runs one dynamic call described by an [`InvocationConfig`].
pub struct Invocation {
    config: InvocationConfig,
    session: Option<Session>,
}

impl Invocation {
    pub fn new(config: InvocationConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// The session opened by the last [`run`](Self::run), already released once it returned.
    /// `None` when the target was never dialed.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Invokes `symbol` on `target` and returns the exit code.
    ///
    /// A nonzero code is also passed to the configured [`Exit`] once the session is released.
    /// When `shutdown` resolves first, the call is abandoned and the code is
    /// [`EXIT_TERMINATED`].
    pub async fn run(
        &mut self,
        target: &str,
        symbol: &str,
        payload: RequestPayload,
        shutdown: impl Future<Output = ()>,
    ) -> i32 {
        let outcome = tokio::select! {
            outcome = self.execute(target, symbol, payload) => outcome,
            () = shutdown => Outcome::Terminated,
        };

        if let Some(session) = self.session.as_mut() {
            session.release();
        }

        let code = self.conclude(outcome, target, symbol);
        if code != 0 {
            self.config.exit.exit(code);
        }
        code
    }

    async fn execute(
        &mut self,
        target: &str,
        symbol: &str,
        payload: RequestPayload,
    ) -> Outcome {
        let ctx = InvocationContext::new(self.config.max_time);

        let connection = match Connection::dial(
            &ctx,
            target,
            self.config.connect_timeout,
            self.config.credentials.as_ref(),
        )
        .await
        {
            Ok(connection) => connection,
            Err(err) => return Outcome::Fatal(err),
        };

        let session = match Session::new(connection, self.config.fallback.clone()) {
            Ok(session) => self.session.insert(session),
            Err(err) => return Outcome::Failed(err),
        };

        let (method, channel) = match prepare(session, &ctx, symbol).await {
            Ok(prepared) => prepared,
            Err(err) => return Outcome::Failed(err),
        };

        let reader: Box<dyn Read + Send> = match payload {
            RequestPayload::Literal(text) => Box::new(io::Cursor::new(text.into_bytes())),
            RequestPayload::Stdin => std::mem::replace(&mut self.config.input, Box::new(io::empty())),
        };

        let config = &mut self.config;
        let parser = RequestParser::new(config.format, method.input(), reader, &config.format_options);
        let formatter = ResponseFormatter::new(config.format, config.format_options, &method);

        let mut handler = EventHandler::new(&formatter, config.out.as_mut());
        let mut client = GrpcClient::new(channel);
        let result = invoke_rpc(
            &mut client,
            &method,
            RequestSupplier::spawn(parser),
            &mut handler,
            &ctx,
            &config.headers,
        )
        .await;
        let summary = handler.finish();

        match result {
            Err(err) if summary.requests_sent == 0 => Outcome::Failed(err),
            Err(err) => {
                error!(symbol, error = %err, "error invoking method");
                Outcome::Completed { summary, formatter }
            }
            Ok(()) => Outcome::Completed { summary, formatter },
        }
    }

    fn conclude(&mut self, outcome: Outcome, target: &str, symbol: &str) -> i32 {
        let err = self.config.err.as_mut();

        match outcome {
            Outcome::Fatal(dial_error) => {
                debug!(address = target, error = %dial_error, "dial failed");
                write_error(err, &format!("Failed to dial target host '{target}': {dial_error}"));
                EXIT_FAILURE
            }
            Outcome::Failed(invoke_error) => {
                debug!(symbol, error = %invoke_error, "invocation failed before any request was sent");
                write_error(err, &format!("Error invoking method '{symbol}': {invoke_error}"));
                EXIT_FAILURE
            }
            Outcome::Completed { summary, formatter } => {
                info!(
                    symbol,
                    requests = summary.requests_sent,
                    responses = summary.responses_received,
                    code = ?summary.status.code(),
                    "invocation completed"
                );
                report::report(&summary, &formatter, self.config.out.as_mut(), err)
            }
            Outcome::Terminated => {
                warn!(symbol, "invocation terminated");
                EXIT_TERMINATED
            }
        }
    }
}

async fn prepare(
    session: &mut Session,
    ctx: &InvocationContext,
    symbol: &str,
) -> Result<(MethodDescriptor, tonic::transport::Channel), InvokeError> {
    let method = ctx
        .run(resolve_method(session.source_mut(), symbol))
        .await
        .map_err(|_| InvokeError::DeadlineExceeded("resolving the method"))??;
    let channel = session.channel().ok_or(InvokeError::ConnectionClosed)?;
    Ok((method, channel))
}

fn write_error(err: &mut (dyn Write + Send), message: &str) {
    if let Err(e) = writeln!(err, "{message}") {
        warn!(error = %e, "failed to write error");
    }
}
