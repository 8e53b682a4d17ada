//! # Descriptor Sources
//!
//! A [`DescriptorSource`] answers three schema questions: which services exist, what a fully
//! qualified symbol refers to, and which extensions are declared for a message type.
//!
//! Three providers implement it:
//!
//! * **[`ReflectionSource`]**: asks a live server through the reflection protocol.
//! * **[`FileSource`]**: reads a pre-supplied `FileDescriptorSet`.
//! * **[`CompositeSource`]**: wraps one of each. Reflection wins; the file fills the gaps.
//!
//! [`ResolvedSource`] is the shape handed to the invocation pipeline: either reflection alone or
//! the composite, behind the same contract.
mod composite;
mod file;
mod reflection;
mod types;

pub use composite::CompositeSource;
pub use file::FileSource;
pub use reflection::ReflectionSource;
pub use types::Descriptor;

use crate::{BoxError, reflection::client::ReflectionResolveError};
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorError, ExtensionDescriptor};
use std::path::PathBuf;
use tonic::{client::GrpcService, transport::Channel};

/// Errors returned by any [`DescriptorSource`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Symbol '{0}' not found")]
    SymbolNotFound(String),
    #[error("Symbol '{0}' is not a message type")]
    NotAMessage(String),
    #[error("Reflection resolution failed: '{0}'")]
    Reflection(#[from] ReflectionResolveError),
    #[error("Invalid descriptor: '{0}'")]
    Descriptor(#[from] DescriptorError),
    #[error("Failed to read descriptor set '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read-only view over a Protobuf schema.
///
/// Every provider satisfies the same three-operation contract, so callers never need to know
/// which one they were handed.
#[allow(async_fn_in_trait)]
pub trait DescriptorSource {
    /// Lists the fully qualified names of the exposed services.
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError>;

    /// Resolves a fully qualified symbol (service, method, message, field, enum or extension).
    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError>;

    /// Lists the extension fields declared against the given extendable message type.
    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError>;
}

/// The descriptor source actually used by an invocation.
pub enum ResolvedSource<S = Channel> {
    Reflection(ReflectionSource<S>),
    Composite(CompositeSource<ReflectionSource<S>, FileSource>),
}

impl<S> ResolvedSource<S> {
    /// Reflection alone when no fallback is configured, otherwise the composite of both.
    pub fn new(reflection: ReflectionSource<S>, fallback: Option<FileSource>) -> Self {
        match fallback {
            Some(file) => Self::Composite(CompositeSource::new(reflection, file)),
            None => Self::Reflection(reflection),
        }
    }

    /// Releases the reflection stream held by the underlying reflection source.
    ///
    /// Idempotent.
    pub fn release(&mut self) {
        match self {
            Self::Reflection(source) => source.reset(),
            Self::Composite(source) => source.reflection_mut().reset(),
        }
    }

    /// Whether the underlying reflection stream is currently open.
    pub fn is_active(&self) -> bool {
        match self {
            Self::Reflection(source) => source.is_active(),
            Self::Composite(source) => source.reflection().is_active(),
        }
    }
}

impl<S> DescriptorSource for ResolvedSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        match self {
            Self::Reflection(source) => source.list_services().await,
            Self::Composite(source) => source.list_services().await,
        }
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Descriptor, SourceError> {
        match self {
            Self::Reflection(source) => source.find_symbol(name).await,
            Self::Composite(source) => source.find_symbol(name).await,
        }
    }

    async fn all_extensions_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        match self {
            Self::Reflection(source) => source.all_extensions_for_type(type_name).await,
            Self::Composite(source) => source.all_extensions_for_type(type_name).await,
        }
    }
}
