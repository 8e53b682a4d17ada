//! # rpcurl core
//!
//! `rpcurl-core` invokes methods on any gRPC server without compile-time knowledge of its
//! Protobuf schema. The schema is resolved at runtime through server reflection, optionally
//! backed by a locally supplied descriptor set, and requests/responses are converted between
//! text (JSON or protobuf text format) and the wire format on the fly.
//!
//! ## Key Components
//!
//! * **[`descriptor`]:** The [`DescriptorSource`](descriptor::DescriptorSource) capability and
//!   its three providers: reflection-backed, file-backed and the composite that merges both.
//! * **[`connection`]:** Dialing the target under a connect deadline that is independent from
//!   the overall call deadline.
//! * **[`reflection`]:** A `grpc.reflection.v1` client keeping one long-lived stream.
//! * **[`grpc`]:** A generic gRPC transport over `prost_reflect::DynamicMessage`.
//! * **[`format`]:** Request parsers and response formatters bound to a resolved method.
//! * **[`invocation`]:** The pipeline: dial, resolve, invoke, report, release.
//! * **[`report`]:** Summary line and exit-code mapping.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod connection;
pub mod descriptor;
pub mod format;
pub mod grpc;
pub mod invocation;
pub mod reflection;
pub mod report;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
