//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a gRPC server implementation
//! and descriptor set for integration testing the `rpcurl` tool.
//! It is not intended for production use.
//!
//! The schema is assembled from `prost-types` descriptor protos in [`descriptor`], so building
//! the fixture does not require `protoc`.
pub mod descriptor;
pub mod pb;
mod server;

pub use descriptor::{client_only_extensions, encoded_file_descriptor_set, file_descriptor_set};
pub use server::EchoServiceServer;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

/// Serves the echo service and the `grpc.reflection.v1` service on a random loopback port.
///
/// The server runs on a background task of the current runtime and stops when the runtime does.
pub async fn serve_with_reflection() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind a loopback listener");
    let addr = listener.local_addr().expect("Listener has no local address");

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(file_descriptor_set())
        .build_v1()
        .expect("Failed to build the reflection service");

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(reflection_service)
            .add_service(EchoServiceServer)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    });

    addr
}

/// Serves the echo service alone, without reflection, on a random loopback port.
pub async fn serve_without_reflection() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind a loopback listener");
    let addr = listener.local_addr().expect("Listener has no local address");

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(EchoServiceServer)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    });

    addr
}
