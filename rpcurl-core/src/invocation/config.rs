use crate::{
    connection::{Plaintext, TransportCredentials},
    descriptor::FileSource,
    format::{Format, FormatOptions},
};
use std::{
    io::{Read, Write},
    sync::Arc,
    time::Duration,
};

pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminates the process with a given code.
///
/// Injected into [`InvocationConfig`] so tests can observe the exit code instead of exiting.
pub trait Exit: Send + Sync {
    fn exit(&self, code: i32);
}

/// Exits the real process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl Exit for ProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code)
    }
}

/// Everything an [`Invocation`](super::Invocation) needs besides target, symbol and payload.
pub struct InvocationConfig {
    /// Overall deadline spanning dial, resolution and the call. `None` disables it.
    pub max_time: Option<Duration>,
    /// Deadline for establishing the connection alone.
    pub connect_timeout: Duration,
    pub format: Format,
    pub format_options: FormatOptions,
    /// Metadata attached to the call.
    pub headers: Vec<(String, String)>,
    /// Local descriptors consulted when reflection cannot answer.
    pub fallback: Option<FileSource>,
    pub credentials: Arc<dyn TransportCredentials>,
    pub exit: Box<dyn Exit>,
    /// Read when the payload is the stdin marker.
    pub input: Box<dyn Read + Send>,
    /// Receives responses and the summary line.
    pub out: Box<dyn Write + Send>,
    /// Receives non-OK statuses and errors.
    pub err: Box<dyn Write + Send>,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            max_time: Some(DEFAULT_MAX_TIME),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            format: Format::default(),
            format_options: FormatOptions::default(),
            headers: Vec::new(),
            fallback: None,
            credentials: Arc::new(Plaintext),
            exit: Box::new(ProcessExit),
            input: Box::new(std::io::stdin()),
            out: Box::new(std::io::stdout()),
            err: Box::new(std::io::stderr()),
        }
    }
}
