use super::InvokeError;
use crate::{
    connection::Connection,
    descriptor::{FileSource, ReflectionSource, ResolvedSource},
    reflection::client::ReflectionClient,
};
use tonic::transport::Channel;
use tracing::debug;

/// The connection of one invocation together with the descriptor source built on top of it.
///
/// [`release`](Self::release) resets the reflection stream, then closes the connection. It runs
/// at most once no matter how many exit paths call it, and again on drop.
pub struct Session {
    connection: Connection,
    source: ResolvedSource,
    released: bool,
}

impl Session {
    /// Opens a reflection client over `connection`, composed with `fallback` when present.
    pub fn new(connection: Connection, fallback: Option<FileSource>) -> Result<Self, InvokeError> {
        let channel = connection.channel().ok_or(InvokeError::ConnectionClosed)?;
        let reflection = ReflectionSource::new(ReflectionClient::new(channel));

        Ok(Self {
            connection,
            source: ResolvedSource::new(reflection, fallback),
            released: false,
        })
    }

    pub fn source_mut(&mut self) -> &mut ResolvedSource {
        &mut self.source
    }

    pub fn channel(&self) -> Option<Channel> {
        self.connection.channel()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.source.release();
        self.connection.close();
        self.released = true;
        debug!(address = self.connection.target(), "session released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}
