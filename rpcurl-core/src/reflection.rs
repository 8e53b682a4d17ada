//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It enables the client to query a server for its own Protobuf schema at runtime, allowing
//! `rpcurl` to function without pre-compiled descriptors. The protocol stubs are the ones shipped
//! by `tonic-reflection`.
pub mod client;
