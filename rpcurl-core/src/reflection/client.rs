//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`.
//!
//! The client keeps a single bidirectional reflection stream open and reuses it for every query.
//! The stream is opened lazily and torn down by [`ReflectionClient::reset`], independently of the
//! underlying connection. File queries build a complete `FileDescriptorSet` by inspecting the
//! imports of every returned file and requesting the missing ones until the set is closed.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};
use tonic_reflection::pb::v1::{
    ExtensionRequest, ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),
}

impl ReflectionResolveError {
    /// The gRPC status carried by this error, when the server answered with one.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            Self::ServerStreamInitFailed(status) | Self::ServerStreamFailure(status) => {
                Some(status)
            }
            _ => None,
        }
    }
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

/// One open `ServerReflectionInfo` call.
struct ReflectionStream {
    requests: mpsc::Sender<ServerReflectionRequest>,
    responses: Streaming<ServerReflectionResponse>,
}

/// A generic client for the gRPC Server Reflection Protocol.
pub struct ReflectionClient<T = Channel> {
    client: ServerReflectionClient<T>,
    stream: Option<ReflectionStream>,
}

impl<T> ReflectionClient<T> {
    /// Closes the reflection stream, if one is open.
    ///
    /// Safe to call any number of times. A later query opens a fresh stream.
    pub fn reset(&mut self) {
        if self.stream.take().is_some() {
            debug!("reflection stream released");
        }
    }

    /// Whether a reflection stream is currently open.
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(channel: S) -> Self {
        let client = ServerReflectionClient::new(channel);
        Self {
            client,
            stream: None,
        }
    }

    /// Asks the reflection service for the file declaring `symbol` (e.g., `my.package.MyService`)
    /// and all of its transitive dependencies.
    pub async fn file_descriptor_set_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        self.resolve_files(MessageRequest::FileContainingSymbol(symbol.to_string()))
            .await
    }

    /// Asks the reflection service for the file declaring extension `number` of `type_name`,
    /// and all of its transitive dependencies.
    pub async fn file_descriptor_set_by_extension(
        &mut self,
        type_name: &str,
        number: i32,
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        self.resolve_files(MessageRequest::FileContainingExtension(ExtensionRequest {
            containing_type: type_name.to_string(),
            extension_number: number,
        }))
        .await
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        match self
            .exchange(MessageRequest::ListServices(String::new()))
            .await?
        {
            MessageResponse::ListServicesResponse(resp) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(unexpected_response(other)),
        }
    }

    /// Lists the field numbers of every extension the server knows for `type_name`.
    pub async fn all_extension_numbers_of_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<i32>, ReflectionResolveError> {
        match self
            .exchange(MessageRequest::AllExtensionNumbersOfType(
                type_name.to_string(),
            ))
            .await?
        {
            MessageResponse::AllExtensionNumbersResponse(resp) => Ok(resp.extension_number),
            other => Err(unexpected_response(other)),
        }
    }

    async fn stream(&mut self) -> Result<&mut ReflectionStream, ReflectionResolveError> {
        if self.stream.is_none() {
            let (tx, rx) = mpsc::channel(100);

            let responses = self
                .client
                .server_reflection_info(ReceiverStream::new(rx))
                .await
                .map_err(ReflectionResolveError::ServerStreamInitFailed)?
                .into_inner();

            debug!("reflection stream opened");
            self.stream = Some(ReflectionStream {
                requests: tx,
                responses,
            });
        }

        self.stream
            .as_mut()
            .ok_or(ReflectionResolveError::StreamClosed)
    }

    /// Sends one request and waits for its single response.
    async fn exchange(
        &mut self,
        request: MessageRequest,
    ) -> Result<MessageResponse, ReflectionResolveError> {
        let result = async {
            let stream = self.stream().await?;
            send(&stream.requests, request).await?;
            receive(&mut stream.responses).await
        }
        .await;

        // A failed exchange may leave unread responses behind: start over next time.
        if result.is_err() {
            self.reset();
        }
        result
    }

    async fn resolve_files(
        &mut self,
        request: MessageRequest,
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        let result = async {
            let stream = self.stream().await?;
            send(&stream.requests, request).await?;
            collect_descriptors(stream).await
        }
        .await;

        match result {
            Ok(file_map) => Ok(FileDescriptorSet {
                file: file_map.into_values().collect(),
            }),
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }
}

async fn send(
    requests: &mpsc::Sender<ServerReflectionRequest>,
    message_request: MessageRequest,
) -> Result<(), ReflectionResolveError> {
    let req = ServerReflectionRequest {
        host: EMPTY_HOST.to_string(),
        message_request: Some(message_request),
    };

    requests
        .send(req)
        .await
        .map_err(|_| ReflectionResolveError::SendFailed)
}

async fn receive(
    responses: &mut Streaming<ServerReflectionResponse>,
) -> Result<MessageResponse, ReflectionResolveError> {
    let response = responses
        .message()
        .await
        .map_err(ReflectionResolveError::ServerStreamFailure)?
        .ok_or(ReflectionResolveError::StreamClosed)?;

    match response.message_response {
        Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
            code: e.error_code,
            message: e.error_message,
        }),
        Some(other) => Ok(other),
        None => Err(ReflectionResolveError::UnexpectedResponseType(
            "Empty Message".into(),
        )),
    }
}

fn unexpected_response(response: MessageResponse) -> ReflectionResolveError {
    ReflectionResolveError::UnexpectedResponseType(format!("{response:?}"))
}

async fn collect_descriptors(
    stream: &mut ReflectionStream,
) -> Result<HashMap<String, FileDescriptorProto>, ReflectionResolveError> {
    let mut inflight = 1;
    let mut collected_files = HashMap::new();
    let mut requested = HashSet::new();

    while inflight > 0 {
        let response = receive(&mut stream.responses).await?;

        inflight -= 1;

        match response {
            MessageResponse::FileDescriptorResponse(res) => {
                let sent_count = process_descriptor_batch(
                    res.file_descriptor_proto,
                    &mut collected_files,
                    &mut requested,
                    &stream.requests,
                )
                .await?;

                inflight += sent_count;
            }
            other => return Err(unexpected_response(other)),
        }
    }

    Ok(collected_files)
}

async fn process_descriptor_batch(
    raw_protos: Vec<Vec<u8>>,
    collected_files: &mut HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &mpsc::Sender<ServerReflectionRequest>,
) -> Result<usize, ReflectionResolveError> {
    let mut sent_count = 0;

    for raw in raw_protos {
        let fd = FileDescriptorProto::decode(raw.as_ref())?;

        if let Some(name) = &fd.name
            && !collected_files.contains_key(name)
        {
            sent_count += queue_dependencies(&fd, collected_files, requested, tx).await?;

            collected_files.insert(name.clone(), fd);
        }
    }

    Ok(sent_count)
}

async fn queue_dependencies(
    fd: &FileDescriptorProto,
    collected_files: &HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &mpsc::Sender<ServerReflectionRequest>,
) -> Result<usize, ReflectionResolveError> {
    let mut count = 0;

    for dep in &fd.dependency {
        if !collected_files.contains_key(dep) && requested.insert(dep.clone()) {
            send(tx, MessageRequest::FileByFilename(dep.clone())).await?;
            count += 1;
        }
    }

    Ok(count)
}
