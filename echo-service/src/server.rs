//! Hand-written tonic server for `echo.EchoService`.
//!
//! Mirrors what `tonic-prost-build` would generate for the schema in [`crate::descriptor`]:
//! one `tower` service routing on the HTTP/2 path, and one small handler type per method.
//!
//! * `UnaryEcho`: returns the request message unchanged.
//! * `ServerStreamingEcho`: returns three messages, `"<message> - seq <n>"`.
//! * `ClientStreamingEcho`: concatenates every received message.
//! * `BidirectionalEcho`: answers each message with `"echo: <message>"`.
//! * `FailEcho`: fails with the requested status code and message.
use crate::pb::{EchoRequest, EchoResponse, FailRequest};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tokio_stream::StreamExt;
use tonic::codegen::{Body, BoxFuture, BoxStream, StdError, http};
use tonic::server::{
    ClientStreamingService, Grpc, NamedService, ServerStreamingService, StreamingService,
    UnaryService,
};
use tonic::{Code, Request, Response, Status, Streaming};
use tonic_prost::ProstCodec;

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoServiceServer;

impl NamedService for EchoServiceServer {
    const NAME: &'static str = "echo.EchoService";
}

impl<B> tonic::codegen::Service<http::Request<B>> for EchoServiceServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        match req.uri().path() {
            "/echo.EchoService/UnaryEcho" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.unary(UnaryEcho, req).await)
            }),
            "/echo.EchoService/ServerStreamingEcho" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.server_streaming(ServerStreamingEcho, req).await)
            }),
            "/echo.EchoService/ClientStreamingEcho" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.client_streaming(ClientStreamingEcho, req).await)
            }),
            "/echo.EchoService/BidirectionalEcho" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.streaming(BidirectionalEcho, req).await)
            }),
            "/echo.EchoService/FailEcho" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.unary(FailEcho, req).await)
            }),
            _ => Box::pin(async move {
                let mut response = http::Response::new(tonic::body::Body::default());
                let headers = response.headers_mut();
                headers.insert(Status::GRPC_STATUS, (Code::Unimplemented as i32).into());
                headers.insert(
                    http::header::CONTENT_TYPE,
                    tonic::metadata::GRPC_CONTENT_TYPE,
                );
                Ok(response)
            }),
        }
    }
}

struct UnaryEcho;

impl UnaryService<EchoRequest> for UnaryEcho {
    type Response = EchoResponse;
    type Future = BoxFuture<Response<Self::Response>, Status>;

    fn call(&mut self, request: Request<EchoRequest>) -> Self::Future {
        let message = request.into_inner().message;
        Box::pin(async move { Ok(Response::new(EchoResponse { message })) })
    }
}

struct ServerStreamingEcho;

impl ServerStreamingService<EchoRequest> for ServerStreamingEcho {
    type Response = EchoResponse;
    type ResponseStream = BoxStream<EchoResponse>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<EchoRequest>) -> Self::Future {
        let message = request.into_inner().message;
        let responses = (0..3).map(move |seq| {
            Ok(EchoResponse {
                message: format!("{message} - seq {seq}"),
            })
        });

        Box::pin(async move {
            let stream: BoxStream<EchoResponse> = Box::pin(tokio_stream::iter(responses));
            Ok(Response::new(stream))
        })
    }
}

struct ClientStreamingEcho;

impl ClientStreamingService<EchoRequest> for ClientStreamingEcho {
    type Response = EchoResponse;
    type Future = BoxFuture<Response<Self::Response>, Status>;

    fn call(&mut self, request: Request<Streaming<EchoRequest>>) -> Self::Future {
        Box::pin(async move {
            let mut stream = request.into_inner();
            let mut message = String::new();
            while let Some(req) = stream.message().await? {
                message.push_str(&req.message);
            }
            Ok(Response::new(EchoResponse { message }))
        })
    }
}

struct BidirectionalEcho;

impl StreamingService<EchoRequest> for BidirectionalEcho {
    type Response = EchoResponse;
    type ResponseStream = BoxStream<EchoResponse>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<EchoRequest>>) -> Self::Future {
        let responses = request.into_inner().map(|req| {
            req.map(|req| EchoResponse {
                message: format!("echo: {}", req.message),
            })
        });

        Box::pin(async move {
            let stream: BoxStream<EchoResponse> = Box::pin(responses);
            Ok(Response::new(stream))
        })
    }
}

struct FailEcho;

impl UnaryService<FailRequest> for FailEcho {
    type Response = EchoResponse;
    type Future = BoxFuture<Response<Self::Response>, Status>;

    fn call(&mut self, request: Request<FailRequest>) -> Self::Future {
        let FailRequest { code, message } = request.into_inner();
        Box::pin(async move { Err(Status::new(Code::from(code), message)) })
    }
}
