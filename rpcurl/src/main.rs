//! # rpcurl CLI Entry Point
//!
//! The main executable for the rpcurl tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs logging.
//! 2. **Configuration**: Loads protoset fallbacks and builds the [`InvocationConfig`].
//! 3. **Execution**: Hands the call to an [`Invocation`], which dials, resolves, invokes and
//!    reports.
//! 4. **Termination**: Exits with the code derived from the call, or 130 on Ctrl-C.

mod cli;
mod formatter;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use formatter::FormattedString;
use rpcurl_core::{
    descriptor::FileSource,
    format::{FormatOptions, RequestPayload},
    invocation::{Invocation, InvocationConfig},
    report::EXIT_FAILURE,
};
use std::{path::PathBuf, process};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let fallback = match load_fallback(&args.protosets) {
        Ok(fallback) => fallback,
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(EXIT_FAILURE);
        }
    };

    let config = InvocationConfig {
        max_time: args.max_time(),
        connect_timeout: args.connect_timeout,
        format: args.format,
        format_options: FormatOptions {
            emit_defaults: !args.skip_defaults,
            allow_unknown_fields: !args.deny_unknown_fields,
        },
        headers: args.headers,
        fallback,
        ..InvocationConfig::default()
    };

    let code = Invocation::new(config)
        .run(
            &args.target,
            &args.symbol,
            RequestPayload::from_data(&args.data),
            shutdown_signal(),
        )
        .await;

    process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default_directives = if verbose {
        "rpcurl=debug,rpcurl_core=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_fallback(paths: &[PathBuf]) -> anyhow::Result<Option<FileSource>> {
    if paths.is_empty() {
        return Ok(None);
    }

    let source = FileSource::from_paths(paths)
        .with_context(|| format!("Failed to load protosets {paths:?}"))?;
    Ok(Some(source))
}

/// Resolves on Ctrl-C. Never resolves if the signal handler cannot be installed.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
