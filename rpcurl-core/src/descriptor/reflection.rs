//! Descriptor source backed by live server reflection.
use super::{Descriptor, DescriptorSource, SourceError};
use crate::{
    BoxError,
    reflection::client::{ReflectionClient, ReflectionResolveError},
};
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorPool, ExtensionDescriptor};
use prost_types::FileDescriptorSet;
use tonic::{Code, client::GrpcService, transport::Channel};
use tracing::debug;

/// Resolves schema elements by querying the server's reflection service.
///
/// Fetched files are accumulated in a pool owned by this source, so repeated lookups during one
/// invocation do not hit the network again. Nothing outlives the source.
pub struct ReflectionSource<S = Channel> {
    client: ReflectionClient<S>,
    pool: DescriptorPool,
}

impl<S> ReflectionSource<S> {
    pub fn new(client: ReflectionClient<S>) -> Self {
        Self {
            client,
            pool: DescriptorPool::new(),
        }
    }

    /// Releases the underlying reflection stream. Idempotent.
    pub fn reset(&mut self) {
        self.client.reset();
    }

    pub fn is_active(&self) -> bool {
        self.client.is_active()
    }

    /// Adds the files of `set` that the pool does not know yet.
    fn absorb(&mut self, set: FileDescriptorSet) -> Result<(), SourceError> {
        let file: Vec<_> = set
            .file
            .into_iter()
            .filter(|fd| self.pool.get_file_by_name(fd.name()).is_none())
            .collect();

        if !file.is_empty() {
            debug!(files = file.len(), "adding reflected files to pool");
            self.pool.add_file_descriptor_set(FileDescriptorSet { file })?;
        }
        Ok(())
    }
}

impl<S> DescriptorSource for ReflectionSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        Ok(self.client.list_services().await?)
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError> {
        if let Some(descriptor) = Descriptor::lookup(&self.pool, name) {
            return Ok(descriptor);
        }

        let symbol = name.strip_prefix('.').unwrap_or(name);
        let set = self
            .client
            .file_descriptor_set_by_symbol(symbol)
            .await
            .map_err(|err| match err {
                ReflectionResolveError::ServerStreamFailure(status)
                    if status.code() == Code::NotFound =>
                {
                    SourceError::SymbolNotFound(name.to_string())
                }
                ReflectionResolveError::ServerError { code, .. } if code == Code::NotFound as i32 => {
                    SourceError::SymbolNotFound(name.to_string())
                }
                err => SourceError::Reflection(err),
            })?;

        self.absorb(set)?;

        Descriptor::lookup(&self.pool, name)
            .ok_or_else(|| SourceError::SymbolNotFound(name.to_string()))
    }

    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        let numbers = self.client.all_extension_numbers_of_type(type_name).await?;

        if self.find_symbol(type_name).await?.message_descriptor().is_none() {
            return Err(SourceError::NotAMessage(type_name.to_string()));
        }

        for &number in &numbers {
            let known = self
                .pool
                .get_message_by_name(type_name)
                .and_then(|message| message.get_extension(number as u32))
                .is_some();

            if !known {
                let set = self
                    .client
                    .file_descriptor_set_by_extension(type_name, number)
                    .await?;
                self.absorb(set)?;
            }
        }

        // Files were added above: look the message up again in the updated pool.
        let message = self
            .pool
            .get_message_by_name(type_name)
            .ok_or_else(|| SourceError::SymbolNotFound(type_name.to_string()))?;

        Ok(numbers
            .into_iter()
            .filter_map(|number| message.get_extension(number as u32))
            .collect())
    }
}
