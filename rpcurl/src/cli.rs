//! # CLI
//!
//! This module defines the command-line interface of `rpcurl` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers
//! are `key:value` and timeouts are non-negative).
use clap::Parser;
use rpcurl_core::format::Format;
use std::{path::PathBuf, time::Duration};

#[derive(Parser)]
#[command(
    name = "rpcurl",
    version,
    about = "Invoke gRPC methods without precompiled stubs",
    long_about = "Invoke gRPC methods without precompiled stubs.\n\n\
        The method schema is resolved through server reflection. Protoset files given with \
        --protoset are consulted whenever reflection cannot answer.\n\n\
        Exit codes: 0 on OK, 64 + status code on any other status, 1 when the call could not \
        be made, 130 when interrupted."
)]
pub struct Cli {
    /// The server address (e.g. localhost:50051)
    pub target: String,

    /// Method to invoke (package.Service/Method or package.Service.Method)
    pub symbol: String,

    /// Request data. Several messages may be concatenated for streaming methods.
    /// Use '@' to read the data from standard input.
    #[arg(short = 'd', long = "data", default_value = "")]
    pub data: String,

    /// Protoset file (an encoded FileDescriptorSet) used when reflection cannot resolve a
    /// symbol. May be repeated.
    #[arg(long = "protoset")]
    pub protosets: Vec<PathBuf>,

    /// Format of request data, responses and error statuses: 'json' or 'text'
    #[arg(long, env = "RPCURL_FORMAT", default_value = "json", value_parser = parse_format)]
    pub format: Format,

    /// Overall deadline in seconds, covering connection, resolution and the call. 0 disables it.
    #[arg(long, env = "RPCURL_MAX_TIME", default_value = "30", value_parser = parse_seconds)]
    pub max_time: Duration,

    /// Deadline in seconds for establishing the connection
    #[arg(
        long,
        env = "RPCURL_CONNECT_TIMEOUT",
        default_value = "10",
        value_parser = parse_seconds
    )]
    pub connect_timeout: Duration,

    /// Request metadata, as 'key: value'. May be repeated.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Omit fields holding their default value from JSON responses
    #[arg(long)]
    pub skip_defaults: bool,

    /// Reject JSON request fields that are not part of the message
    #[arg(long)]
    pub deny_unknown_fields: bool,

    /// Log debug information to standard error (overridden by RUST_LOG)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// The overall deadline, `None` when disabled.
    pub fn max_time(&self) -> Option<Duration> {
        (!self.max_time.is_zero()).then_some(self.max_time)
    }
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("Invalid number of seconds '{value}': {e}"))?;

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid timeout '{value}': {e}"))
}

fn parse_format(value: &str) -> Result<Format, String> {
    value.parse().map_err(|e: rpcurl_core::format::FormatError| e.to_string())
}
