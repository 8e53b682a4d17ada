//! Descriptor source backed by a locally supplied `FileDescriptorSet`.
use super::{Descriptor, DescriptorSource, SourceError};
use prost_reflect::{DescriptorPool, ExtensionDescriptor};
use prost_types::FileDescriptorSet;
use std::path::Path;

/// Answers schema queries from an in-memory [`DescriptorPool`].
///
/// The pool never changes once built, so the source stays valid for the whole process.
#[derive(Debug, Clone)]
pub struct FileSource {
    pool: DescriptorPool,
}

impl FileSource {
    pub fn new(pool: DescriptorPool) -> Self {
        Self { pool }
    }

    /// Builds a source from the bytes of an encoded `FileDescriptorSet`.
    pub fn decode(bytes: &[u8]) -> Result<Self, SourceError> {
        Ok(Self::new(DescriptorPool::decode(bytes)?))
    }

    pub fn from_file_descriptor_set(set: FileDescriptorSet) -> Result<Self, SourceError> {
        Ok(Self::new(DescriptorPool::from_file_descriptor_set(set)?))
    }

    /// Reads one or more protoset files and merges them into a single pool.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, SourceError> {
        let mut pool = DescriptorPool::new();

        for path in paths {
            let path = path.as_ref();
            let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            pool.decode_file_descriptor_set(bytes.as_slice())?;
        }

        Ok(Self::new(pool))
    }
}

impl DescriptorSource for FileSource {
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        Ok(self
            .pool
            .services()
            .map(|s| s.full_name().to_string())
            .collect())
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError> {
        Descriptor::lookup(&self.pool, name)
            .ok_or_else(|| SourceError::SymbolNotFound(name.to_string()))
    }

    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        let message = self
            .pool
            .get_message_by_name(type_name)
            .ok_or_else(|| SourceError::SymbolNotFound(type_name.to_string()))?;

        Ok(message.extensions().collect())
    }
}
