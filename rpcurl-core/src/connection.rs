//! # Connection Manager
//!
//! Establishes the single transport connection used by an invocation.
//!
//! Dialing is bounded by a connect deadline that is derived from, but narrower than, the overall
//! invocation deadline: whichever expires first aborts the dial. Every connection carries the
//! same client identifier as its `user-agent`.
use crate::invocation::InvocationContext;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

/// The `user-agent` attached to every call made over a [`Connection`].
pub const CLIENT_USER_AGENT: &str = concat!("rpcurl/", env!("CARGO_PKG_VERSION"));

/// Pluggable transport security.
///
/// Picks the URI scheme used for bare `host:port` targets and may further configure the
/// endpoint before dialing.
pub trait TransportCredentials: Send + Sync {
    fn scheme(&self) -> &'static str;

    fn configure(&self, endpoint: Endpoint) -> Result<Endpoint, tonic::transport::Error> {
        Ok(endpoint)
    }
}

/// No transport security.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plaintext;

impl TransportCredentials for Plaintext {
    fn scheme(&self) -> &'static str {
        "http"
    }
}

/// Errors that can occur when dialing the target.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("Invalid target '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("Failed to connect to '{target}': {source}")]
    ConnectionFailed {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("Timed out after {timeout:?} connecting to '{target}'")]
    Timeout { target: String, timeout: Duration },
}

/// One transport channel to the target.
///
/// Closing is idempotent: the channel handle is dropped the first time and later calls are no-ops.
#[derive(Debug)]
pub struct Connection {
    target: String,
    channel: Option<Channel>,
}

impl Connection {
    /// Dials `target` (`host:port`, or a full URI) and waits until the connection is ready.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The overall invocation context. The dial never outlives its deadline.
    /// * `connect_timeout` - The budget for establishing the connection alone.
    /// * `credentials` - Transport security applied to the endpoint.
    pub async fn dial(
        ctx: &InvocationContext,
        target: &str,
        connect_timeout: Duration,
        credentials: &dyn TransportCredentials,
    ) -> Result<Self, DialError> {
        let uri = if target.contains("://") {
            target.to_string()
        } else {
            format!("{}://{target}", credentials.scheme())
        };

        let endpoint = Endpoint::from_shared(uri)
            .and_then(|endpoint| endpoint.user_agent(CLIENT_USER_AGENT))
            .and_then(|endpoint| credentials.configure(endpoint))
            .map_err(|source| DialError::InvalidTarget {
                target: target.to_string(),
                source,
            })?
            .connect_timeout(connect_timeout);

        let (scope, budget) = connect_scope(ctx, connect_timeout);
        debug!(address = target, ?budget, "dialing");

        let channel = scope
            .run(endpoint.connect())
            .await
            .map_err(|_| DialError::Timeout {
                target: target.to_string(),
                timeout: budget,
            })?
            .map_err(|source| DialError::ConnectionFailed {
                target: target.to_string(),
                source,
            })?;

        info!(address = target, "connected");

        Ok(Self {
            target: target.to_string(),
            channel: Some(channel),
        })
    }

    /// A handle to the underlying channel, or `None` once closed.
    pub fn channel(&self) -> Option<Channel> {
        self.channel.clone()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            debug!(address = %self.target, "connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_none()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// The scope a dial runs in and the time it actually has, which the overall deadline may cut short.
fn connect_scope(
    ctx: &InvocationContext,
    connect_timeout: Duration,
) -> (InvocationContext, Duration) {
    let scope = ctx.with_timeout(connect_timeout);
    let budget = scope.remaining().unwrap_or(connect_timeout);
    (scope, budget)
}
