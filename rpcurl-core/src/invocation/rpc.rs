//! Method resolution and the four call shapes.
use super::{EventHandler, InvocationContext, InvokeError};
use crate::{
    BoxError,
    descriptor::DescriptorSource,
    format::RequestSupplier,
    grpc::client::{CallOptions, GrpcClient},
};
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorPool, DynamicMessage, FileDescriptor, Kind, MessageDescriptor, MethodDescriptor};
use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};
use tonic::{Code, Status, Streaming, client::GrpcService};
use tracing::debug;

/// Splits `package.Service/Method` or `package.Service.Method` into service and method names.
pub fn parse_symbol(symbol: &str) -> Result<(&str, &str), InvokeError> {
    let trimmed = symbol.strip_prefix('.').unwrap_or(symbol);
    let split = trimmed.rfind('/').or_else(|| trimmed.rfind('.'));

    match split {
        Some(i) if i > 0 && i + 1 < trimmed.len() && !trimmed[..i].contains('/') => {
            Ok((&trimmed[..i], &trimmed[i + 1..]))
        }
        _ => Err(InvokeError::InvalidSymbol(symbol.to_string())),
    }
}

/// Resolves `symbol` to a method and loads the extensions its messages can carry.
pub async fn resolve_method<D: DescriptorSource>(
    source: &mut D,
    symbol: &str,
) -> Result<MethodDescriptor, InvokeError> {
    let (service_name, method_name) = parse_symbol(symbol)?;

    let descriptor = source.find_symbol(service_name).await?;
    let service = descriptor
        .service_descriptor()
        .ok_or_else(|| InvokeError::NotAService(service_name.to_string()))?;
    let method = service
        .methods()
        .find(|m| m.name() == method_name)
        .ok_or_else(|| InvokeError::MethodNotFound {
            service: service_name.to_string(),
            method: method_name.to_string(),
        })?;

    debug!(
        symbol,
        client_streaming = method.is_client_streaming(),
        server_streaming = method.is_server_streaming(),
        "method resolved"
    );

    ensure_extensions(source, method).await
}

/// Makes every extension the source knows for the method's messages available to it.
///
/// Extensions that live outside the method's own pool (e.g. client-only extensions from a
/// fallback descriptor set) are copied, with their files' dependencies, into a clone of that
/// pool, and the method is looked up again there.
pub async fn ensure_extensions<D: DescriptorSource>(
    source: &mut D,
    method: MethodDescriptor,
) -> Result<MethodDescriptor, InvokeError> {
    let mut foreign = Vec::new();

    for message in reachable_messages(&method) {
        if message.extension_ranges().next().is_none() {
            continue;
        }

        match source.all_extensions_for_type(message.full_name()).await {
            Ok(extensions) => foreign.extend(extensions.into_iter().filter(|ext| {
                method
                    .parent_pool()
                    .get_extension_by_name(ext.full_name())
                    .is_none()
            })),
            Err(err) => {
                debug!(type_name = message.full_name(), error = %err, "extensions unavailable")
            }
        }
    }

    if foreign.is_empty() {
        return Ok(method);
    }

    let mut pool = method.parent_pool().clone();
    for extension in &foreign {
        add_with_dependencies(&mut pool, &extension.parent_file())?;
    }

    pool.get_service_by_name(method.parent_service().full_name())
        .and_then(|service| service.methods().find(|m| m.name() == method.name()))
        .ok_or_else(|| InvokeError::MethodNotFound {
            service: method.parent_service().full_name().to_string(),
            method: method.name().to_string(),
        })
}

fn reachable_messages(method: &MethodDescriptor) -> Vec<MessageDescriptor> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([method.input(), method.output()]);
    let mut found = Vec::new();

    while let Some(message) = queue.pop_front() {
        if !seen.insert(message.full_name().to_string()) {
            continue;
        }
        for field in message.fields() {
            if let Kind::Message(child) = field.kind() {
                queue.push_back(child);
            }
        }
        found.push(message);
    }

    found
}

fn add_with_dependencies(pool: &mut DescriptorPool, file: &FileDescriptor) -> Result<(), InvokeError> {
    if pool.get_file_by_name(file.name()).is_some() {
        return Ok(());
    }
    for dependency in file.dependencies() {
        add_with_dependencies(pool, &dependency)?;
    }
    pool.add_file_descriptor_proto(file.file_descriptor_proto().clone())
        .map_err(|err| InvokeError::Source(err.into()))
}

fn deadline_status() -> Status {
    Status::deadline_exceeded("deadline exceeded before the call completed")
}

fn ok_status() -> Status {
    Status::new(Code::Ok, "")
}

/// Local timers fire within this much of the invocation deadline.
const TIMER_SLACK: Duration = Duration::from_millis(5);

/// Reports a CANCELLED status as DEADLINE_EXCEEDED when the invocation deadline is what ended
/// the call. The channel enforces the `grpc-timeout` it sends and cancels the call itself.
fn settle(status: Status, ctx: &InvocationContext) -> Status {
    if status.code() == Code::Cancelled && ctx.expires_within(TIMER_SLACK) {
        debug!(status_message = status.message(), "call cancelled at the deadline");
        deadline_status()
    } else {
        status
    }
}

/// Drives one call of `method`, feeding `handler` with responses and the terminal status.
///
/// A non-OK status is a normal completion. `Err` means something went wrong that has no status:
/// the request could not be built or sent, a request message failed to parse, or a response
/// could not be written.
pub async fn invoke_rpc<S>(
    client: &mut GrpcClient<S>,
    method: &MethodDescriptor,
    requests: RequestSupplier,
    handler: &mut EventHandler<'_>,
    ctx: &InvocationContext,
    headers: &[(String, String)],
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let tally = requests.tally();
    let options = CallOptions {
        headers: headers.to_vec(),
        timeout: ctx.remaining(),
    };

    let result = match (method.is_client_streaming(), method.is_server_streaming()) {
        (false, false) => unary(client, method, requests, handler, ctx, &options).await,
        (false, true) => server_streaming(client, method, requests, handler, ctx, &options).await,
        (true, false) => client_streaming(client, method, requests, handler, ctx, &options).await,
        (true, true) => bidi_streaming(client, method, requests, handler, ctx, &options).await,
    };

    handler.sync_requests_sent(tally.sent());
    result?;

    match tally.take_failure() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Reads the only request of a unary-request method; none at all means an empty message.
async fn single_request(
    requests: &mut RequestSupplier,
    method: &MethodDescriptor,
) -> Result<DynamicMessage, InvokeError> {
    let first = match requests.next().await {
        Some(item) => item?,
        None => return Ok(DynamicMessage::new(method.input())),
    };

    match requests.next().await {
        None => Ok(first),
        Some(Err(err)) => Err(err.into()),
        Some(Ok(_)) => Err(InvokeError::TooManyRequests(method.full_name().to_string())),
    }
}

async fn unary<S>(
    client: &mut GrpcClient<S>,
    method: &MethodDescriptor,
    mut requests: RequestSupplier,
    handler: &mut EventHandler<'_>,
    ctx: &InvocationContext,
    options: &CallOptions,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let request = single_request(&mut requests, method).await?;

    // Nothing has been sent while the channel is still getting ready.
    let Ok(ready) = ctx.run(client.ready()).await else {
        handler.on_status(deadline_status());
        return Ok(());
    };
    ready?;

    let Ok(result) = ctx.run(client.unary(method, request, options)).await else {
        handler.on_request_sent();
        handler.on_status(deadline_status());
        return Ok(());
    };
    let result = result?;
    handler.on_request_sent();

    match result {
        Ok(response) => {
            handler.on_response(&response)?;
            handler.on_status(ok_status());
        }
        Err(status) => handler.on_status(settle(status, ctx)),
    }
    Ok(())
}

async fn server_streaming<S>(
    client: &mut GrpcClient<S>,
    method: &MethodDescriptor,
    mut requests: RequestSupplier,
    handler: &mut EventHandler<'_>,
    ctx: &InvocationContext,
    options: &CallOptions,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let request = single_request(&mut requests, method).await?;

    // Nothing has been sent while the channel is still getting ready.
    let Ok(ready) = ctx.run(client.ready()).await else {
        handler.on_status(deadline_status());
        return Ok(());
    };
    ready?;

    let Ok(result) = ctx.run(client.server_streaming(method, request, options)).await else {
        handler.on_request_sent();
        handler.on_status(deadline_status());
        return Ok(());
    };
    let result = result?;
    handler.on_request_sent();

    match result {
        Ok(stream) => drain(stream, handler, ctx).await,
        Err(status) => {
            handler.on_status(settle(status, ctx));
            Ok(())
        }
    }
}

async fn client_streaming<S>(
    client: &mut GrpcClient<S>,
    method: &MethodDescriptor,
    requests: RequestSupplier,
    handler: &mut EventHandler<'_>,
    ctx: &InvocationContext,
    options: &CallOptions,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let call = client.client_streaming(method, requests.into_stream(), options);

    let Ok(result) = ctx.run(call).await else {
        handler.on_status(deadline_status());
        return Ok(());
    };

    match result? {
        Ok(response) => {
            handler.on_response(&response)?;
            handler.on_status(ok_status());
        }
        Err(status) => handler.on_status(settle(status, ctx)),
    }
    Ok(())
}

async fn bidi_streaming<S>(
    client: &mut GrpcClient<S>,
    method: &MethodDescriptor,
    requests: RequestSupplier,
    handler: &mut EventHandler<'_>,
    ctx: &InvocationContext,
    options: &CallOptions,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let call = client.bidirectional_streaming(method, requests.into_stream(), options);

    let Ok(result) = ctx.run(call).await else {
        handler.on_status(deadline_status());
        return Ok(());
    };

    match result? {
        Ok(stream) => drain(stream, handler, ctx).await,
        Err(status) => {
            handler.on_status(settle(status, ctx));
            Ok(())
        }
    }
}

/// Forwards every response to `handler` until the stream ends with a status.
async fn drain(
    mut stream: Streaming<DynamicMessage>,
    handler: &mut EventHandler<'_>,
    ctx: &InvocationContext,
) -> Result<(), InvokeError> {
    loop {
        match ctx.run(stream.message()).await {
            Ok(Ok(Some(message))) => handler.on_response(&message)?,
            Ok(Ok(None)) => {
                handler.on_status(ok_status());
                return Ok(());
            }
            Ok(Err(status)) => {
                handler.on_status(settle(status, ctx));
                return Ok(());
            }
            Err(_) => {
                handler.on_status(deadline_status());
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptor::{CompositeSource, FileSource},
        format::{Format, FormatOptions, RequestParser, ResponseFormatter},
    };
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
        MethodDescriptorProto, ServiceDescriptorProto,
        descriptor_proto::ExtensionRange,
        field_descriptor_proto::{Label, Type},
    };
    use std::{
        convert::Infallible,
        future, io,
        task::{Context, Poll},
    };

    #[test]
    fn test_parse_symbol_forms() {
        assert_eq!(
            parse_symbol("echo.EchoService/UnaryEcho").unwrap(),
            ("echo.EchoService", "UnaryEcho")
        );
        assert_eq!(
            parse_symbol("echo.EchoService.UnaryEcho").unwrap(),
            ("echo.EchoService", "UnaryEcho")
        );
        assert_eq!(
            parse_symbol(".echo.EchoService/UnaryEcho").unwrap(),
            ("echo.EchoService", "UnaryEcho")
        );
    }

    #[test]
    fn test_parse_symbol_rejects_malformed() {
        for symbol in ["UnaryEcho", "echo.EchoService/", "/UnaryEcho", "a/b/c", ""] {
            assert!(
                matches!(parse_symbol(symbol), Err(InvokeError::InvalidSymbol(s)) if s == symbol),
                "{symbol}"
            );
        }
    }

    fn api_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("test/api.proto".to_string()),
            package: Some("test".to_string()),
            syntax: Some("proto2".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Extendable".to_string()),
                extension_range: vec![ExtensionRange {
                    start: Some(100),
                    end: Some(200),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            service: vec![ServiceDescriptorProto {
                name: Some("Api".to_string()),
                method: vec![MethodDescriptorProto {
                    name: Some("Call".to_string()),
                    input_type: Some(".test.Extendable".to_string()),
                    output_type: Some(".test.Extendable".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn local_extension_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("test/local.proto".to_string()),
            package: Some("test.local".to_string()),
            syntax: Some("proto2".to_string()),
            dependency: vec!["test/api.proto".to_string()],
            extension: vec![FieldDescriptorProto {
                name: Some("tag".to_string()),
                number: Some(150),
                label: Some(Label::Optional as i32),
                r#type: Some(Type::Int32 as i32),
                extendee: Some(".test.Extendable".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn source(files: Vec<FileDescriptorProto>) -> FileSource {
        FileSource::from_file_descriptor_set(FileDescriptorSet { file: files }).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_method_pulls_extensions_from_fallback() {
        let mut composite = CompositeSource::new(
            source(vec![api_file()]),
            source(vec![api_file(), local_extension_file()]),
        );

        let method = resolve_method(&mut composite, "test.Api/Call").await.unwrap();

        assert_eq!(method.full_name(), "test.Api.Call");
        assert!(
            method
                .parent_pool()
                .get_extension_by_name("test.local.tag")
                .is_some()
        );
        assert_eq!(method.input().extensions().count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_method_errors() {
        let mut file = source(vec![api_file()]);

        assert!(matches!(
            resolve_method(&mut file, "test.Api/Missing").await,
            Err(InvokeError::MethodNotFound { method, .. }) if method == "Missing"
        ));
        assert!(matches!(
            resolve_method(&mut file, "test.Extendable/Call").await,
            Err(InvokeError::NotAService(name)) if name == "test.Extendable"
        ));
        assert!(matches!(
            resolve_method(&mut file, "test.Nope/Call").await,
            Err(InvokeError::Source(_))
        ));
    }

    /// A channel that never becomes ready to send.
    struct NeverReady;

    impl tonic::codegen::Service<http::Request<tonic::body::Body>> for NeverReady {
        type Response = http::Response<tonic::body::Body>;
        type Error = Infallible;
        type Future = future::Pending<Result<Self::Response, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn call(&mut self, _req: http::Request<tonic::body::Body>) -> Self::Future {
            future::pending()
        }
    }

    fn echo_method(name: &str) -> MethodDescriptor {
        DescriptorPool::from_file_descriptor_set(echo_service::file_descriptor_set())
            .unwrap()
            .get_service_by_name("echo.EchoService")
            .unwrap()
            .methods()
            .find(|m| m.name() == name)
            .unwrap()
    }

    #[tokio::test]
    async fn test_deadline_before_channel_is_ready_counts_no_request() {
        for name in ["UnaryEcho", "ServerStreamingEcho"] {
            let method = echo_method(name);
            let options = FormatOptions::default();
            let formatter = ResponseFormatter::new(Format::Json, options, &method);
            let parser = RequestParser::new(
                Format::Json,
                method.input(),
                Box::new(io::Cursor::new(b"{}".to_vec())),
                &options,
            );
            let mut out = Vec::new();
            let mut handler = EventHandler::new(&formatter, &mut out);
            let ctx = InvocationContext::new(Some(Duration::from_millis(100)));

            invoke_rpc(
                &mut GrpcClient::new(NeverReady),
                &method,
                RequestSupplier::spawn(parser),
                &mut handler,
                &ctx,
                &[],
            )
            .await
            .unwrap();

            let summary = handler.finish();
            assert_eq!(summary.requests_sent, 0, "{name}");
            assert_eq!(summary.responses_received, 0, "{name}");
            assert_eq!(summary.status.code(), Code::DeadlineExceeded, "{name}");
            assert!(out.is_empty(), "{name}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_at_deadline_settles_as_deadline_exceeded() {
        let ctx = InvocationContext::new(Some(Duration::from_secs(1)));
        let cancelled = || Status::cancelled("Timeout expired");

        assert_eq!(settle(cancelled(), &ctx).code(), Code::Cancelled);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(settle(cancelled(), &ctx).code(), Code::DeadlineExceeded);
        assert_eq!(settle(Status::not_found("gone"), &ctx).code(), Code::NotFound);
        assert_eq!(
            settle(cancelled(), &InvocationContext::unbounded()).code(),
            Code::Cancelled
        );
    }
}
