//! Merge adapter over a reflection-backed and a file-backed descriptor source.
use super::{Descriptor, DescriptorSource, SourceError};
use prost_reflect::ExtensionDescriptor;
use std::collections::HashSet;
use tracing::debug;

/// Combines a live (reflection) source with a static (file) source.
///
/// Reflection results take precedence. The file source only answers when reflection errors, or,
/// for extensions, contributes the field numbers reflection did not report.
#[derive(Debug, Clone)]
pub struct CompositeSource<R, F> {
    reflection: R,
    file: F,
}

impl<R, F> CompositeSource<R, F> {
    pub fn new(reflection: R, file: F) -> Self {
        Self { reflection, file }
    }

    pub fn reflection(&self) -> &R {
        &self.reflection
    }

    pub fn reflection_mut(&mut self) -> &mut R {
        &mut self.reflection
    }
}

impl<R, F> DescriptorSource for CompositeSource<R, F>
where
    R: DescriptorSource,
    F: DescriptorSource,
{
    /// Reflection is authoritative for discovery: its answer is returned verbatim.
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        self.reflection.list_services().await
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError> {
        match self.reflection.find_symbol(name).await {
            Ok(descriptor) => Ok(descriptor),
            Err(err) => {
                debug!(symbol = name, error = %err, "reflection lookup failed, using file source");
                self.file.find_symbol(name).await
            }
        }
    }

    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        let mut extensions = match self.reflection.all_extensions_for_type(type_name).await {
            Ok(extensions) => extensions,
            Err(err) => {
                debug!(type_name, error = %err, "reflection extension lookup failed, using file source");
                return self.file.all_extensions_for_type(type_name).await;
            }
        };

        let file_extensions = match self.file.all_extensions_for_type(type_name).await {
            Ok(extensions) => extensions,
            Err(err) => {
                debug!(type_name, error = %err, "file extension lookup failed, keeping reflection result");
                return Ok(extensions);
            }
        };

        // Tag numbers already claimed; reflection wins any clash.
        let mut numbers: HashSet<u32> = extensions.iter().map(|ext| ext.number()).collect();
        extensions.extend(
            file_extensions
                .into_iter()
                .filter(|ext| numbers.insert(ext.number())),
        );

        Ok(extensions)
    }
}
