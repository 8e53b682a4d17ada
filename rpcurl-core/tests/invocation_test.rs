use rpcurl_core::{
    connection::{Connection, Plaintext},
    descriptor::{DescriptorSource, FileSource},
    format::{Format, RequestPayload},
    invocation::{Exit, Invocation, InvocationConfig, InvocationContext, Session},
};
use std::{
    future,
    io::{self, Read, Write},
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingExit(Arc<Mutex<Vec<i32>>>);

impl RecordingExit {
    fn codes(&self) -> Vec<i32> {
        self.0.lock().unwrap().clone()
    }
}

impl Exit for RecordingExit {
    fn exit(&self, code: i32) {
        self.0.lock().unwrap().push(code);
    }
}

/// Input that delivers one message, then stays silent for `stall` before closing.
struct StalledInput {
    message: io::Cursor<Vec<u8>>,
    stall: Duration,
}

impl StalledInput {
    fn new(message: &str, stall: Duration) -> Self {
        Self {
            message: io::Cursor::new(message.as_bytes().to_vec()),
            stall,
        }
    }
}

impl Read for StalledInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.message.read(buf)?;
        if read == 0 {
            std::thread::sleep(std::mem::take(&mut self.stall));
        }
        Ok(read)
    }
}

#[derive(Default)]
struct Harness {
    out: SharedBuffer,
    err: SharedBuffer,
    exits: RecordingExit,
}

impl Harness {
    fn config(&self) -> InvocationConfig {
        InvocationConfig {
            exit: Box::new(self.exits.clone()),
            input: Box::new(io::empty()),
            out: Box::new(self.out.clone()),
            err: Box::new(self.err.clone()),
            ..InvocationConfig::default()
        }
    }

    async fn run(&self, config: InvocationConfig, target: SocketAddr, symbol: &str, data: &str) -> i32 {
        Invocation::new(config)
            .run(
                &target.to_string(),
                symbol,
                RequestPayload::from_data(data),
                future::pending(),
            )
            .await
    }
}

#[tokio::test]
async fn test_unary_call_prints_response_and_summary() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();

    let code = harness
        .run(
            harness.config(),
            addr,
            "echo.EchoService/UnaryEcho",
            r#"{"message": "hello"}"#,
        )
        .await;

    assert_eq!(code, 0);
    let out = harness.out.contents();
    assert!(out.contains(r#""message": "hello""#), "{out}");
    assert!(out.ends_with("Sent 1 request and received 1 response\n"), "{out}");
    assert!(harness.err.contents().is_empty());
    assert!(harness.exits.codes().is_empty());
}

#[tokio::test]
async fn test_unary_call_without_data_sends_empty_message() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();

    let code = harness
        .run(harness.config(), addr, "echo.EchoService.UnaryEcho", "")
        .await;

    assert_eq!(code, 0);
    let out = harness.out.contents();
    assert!(out.contains(r#""message": """#), "{out}");
    assert!(out.ends_with("Sent 1 request and received 1 response\n"), "{out}");
}

#[tokio::test]
async fn test_server_streaming_counts_every_response() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();

    let code = harness
        .run(
            harness.config(),
            addr,
            "echo.EchoService/ServerStreamingEcho",
            r#"{"message": "hi"}"#,
        )
        .await;

    assert_eq!(code, 0);
    let out = harness.out.contents();
    for seq in 0..3 {
        assert!(out.contains(&format!("hi - seq {seq}")), "{out}");
    }
    assert!(out.ends_with("Sent 1 request and received 3 responses\n"), "{out}");
}

#[tokio::test]
async fn test_client_streaming_reads_concatenated_json() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();

    let code = harness
        .run(
            harness.config(),
            addr,
            "echo.EchoService/ClientStreamingEcho",
            r#"{"message": "a"} {"message": "b"} {"message": "c"}"#,
        )
        .await;

    assert_eq!(code, 0);
    let out = harness.out.contents();
    assert!(out.contains(r#""message": "abc""#), "{out}");
    assert!(out.ends_with("Sent 3 requests and received 1 response\n"), "{out}");
}

#[tokio::test]
async fn test_bidirectional_streaming_from_input_stream() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();
    let config = InvocationConfig {
        format: Format::Text,
        input: Box::new(io::Cursor::new(
            b"message: \"x\"\x1emessage: \"y\"".to_vec(),
        )),
        ..harness.config()
    };

    let code = harness
        .run(config, addr, "echo.EchoService/BidirectionalEcho", "@")
        .await;

    assert_eq!(code, 0);
    let out = harness.out.contents();
    assert!(out.contains(r#"message: "echo: x""#), "{out}");
    assert!(out.contains(r#"message: "echo: y""#), "{out}");
    assert!(out.ends_with("Sent 2 requests and received 2 responses\n"), "{out}");
}

#[tokio::test]
async fn test_not_found_status_exits_with_offset_code() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();

    let code = harness
        .run(
            harness.config(),
            addr,
            "echo.EchoService/FailEcho",
            r#"{"code": 5, "message": "no such echo"}"#,
        )
        .await;

    assert_eq!(code, 69);
    assert_eq!(harness.exits.codes(), vec![69]);
    assert_eq!(
        harness.out.contents(),
        "Sent 1 request and received 0 responses\n"
    );
    let err = harness.err.contents();
    assert!(err.contains(r#""code": 5"#), "{err}");
    assert!(err.contains("no such echo"), "{err}");
}

#[tokio::test]
async fn test_unreachable_target_is_fatal_without_summary() {
    let harness = Harness::default();
    let config = InvocationConfig {
        max_time: Some(Duration::from_secs(2)),
        connect_timeout: Duration::from_secs(1),
        ..harness.config()
    };
    let target: SocketAddr = "10.255.255.1:50051".parse().unwrap();

    let started = std::time::Instant::now();
    let code = harness
        .run(config, target, "echo.EchoService/UnaryEcho", "{}")
        .await;

    assert_eq!(code, 1);
    assert_eq!(harness.exits.codes(), vec![1]);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(harness.out.contents().is_empty());
    assert!(harness.err.contents().contains("Failed to dial target host"));
}

#[tokio::test]
async fn test_unknown_method_fails_before_sending() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();

    let code = harness
        .run(harness.config(), addr, "echo.EchoService/Shout", "{}")
        .await;

    assert_eq!(code, 1);
    assert_eq!(harness.exits.codes(), vec![1]);
    assert!(harness.out.contents().is_empty());
    assert!(
        harness
            .err
            .contents()
            .contains("does not include a method named 'Shout'")
    );
}

#[tokio::test]
async fn test_unary_call_rejects_several_messages() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();

    let code = harness
        .run(
            harness.config(),
            addr,
            "echo.EchoService/UnaryEcho",
            r#"{"message": "a"} {"message": "b"}"#,
        )
        .await;

    assert_eq!(code, 1);
    assert!(harness.out.contents().is_empty());
    assert!(harness.err.contents().contains("more than one"));
}

#[tokio::test]
async fn test_invalid_header_fails_before_sending() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();
    let config = InvocationConfig {
        headers: vec![("bad header".to_string(), "x".to_string())],
        ..harness.config()
    };

    let code = harness
        .run(config, addr, "echo.EchoService/UnaryEcho", "{}")
        .await;

    assert_eq!(code, 1);
    assert!(harness.out.contents().is_empty());
    assert!(harness.err.contents().contains("bad header"));
}

#[tokio::test]
async fn test_descriptor_file_fallback_without_reflection() {
    let addr = echo_service::serve_without_reflection().await;
    let harness = Harness::default();
    let config = InvocationConfig {
        fallback: Some(FileSource::decode(&echo_service::encoded_file_descriptor_set()).unwrap()),
        ..harness.config()
    };

    let code = harness
        .run(
            config,
            addr,
            "echo.EchoService/UnaryEcho",
            r#"{"message": "offline"}"#,
        )
        .await;

    assert_eq!(code, 0);
    assert!(harness.out.contents().contains(r#""message": "offline""#));
}

#[tokio::test]
async fn test_no_reflection_and_no_fallback_fails() {
    let addr = echo_service::serve_without_reflection().await;
    let harness = Harness::default();

    let code = harness
        .run(harness.config(), addr, "echo.EchoService/UnaryEcho", "{}")
        .await;

    assert_eq!(code, 1);
    assert!(harness.out.contents().is_empty());
    assert!(harness.err.contents().contains("Error invoking method"));
}

#[tokio::test]
async fn test_shutdown_terminates_without_summary() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();

    let code = Invocation::new(harness.config())
        .run(
            &addr.to_string(),
            "echo.EchoService/UnaryEcho",
            RequestPayload::from_data("{}"),
            future::ready(()),
        )
        .await;

    assert_eq!(code, 130);
    assert_eq!(harness.exits.codes(), vec![130]);
    assert!(harness.out.contents().is_empty());
}

#[tokio::test]
async fn test_deadline_during_call_exits_with_deadline_exceeded() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();
    let config = InvocationConfig {
        max_time: Some(Duration::from_secs(1)),
        input: Box::new(StalledInput::new(r#"{"message": "a"}"#, Duration::from_secs(3))),
        ..harness.config()
    };

    let code = harness
        .run(config, addr, "echo.EchoService/ClientStreamingEcho", "@")
        .await;

    assert_eq!(code, 68);
    assert_eq!(harness.exits.codes(), vec![68]);
    let out = harness.out.contents();
    assert!(out.ends_with("Sent 1 request and received 0 responses\n"), "{out}");
    let err = harness.err.contents();
    assert!(err.starts_with("ERROR:\n"), "{err}");
    assert!(err.contains(r#""code": 4"#), "{err}");
    assert!(!err.contains("Timeout expired"), "{err}");
}

#[tokio::test]
async fn test_shutdown_during_call_releases_session() {
    let addr = echo_service::serve_with_reflection().await;
    let harness = Harness::default();
    let config = InvocationConfig {
        input: Box::new(StalledInput::new(r#"{"message": "a"}"#, Duration::from_secs(3))),
        ..harness.config()
    };
    let mut invocation = Invocation::new(config);

    let code = invocation
        .run(
            &addr.to_string(),
            "echo.EchoService/ClientStreamingEcho",
            RequestPayload::Stdin,
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;

    assert_eq!(code, 130);
    assert_eq!(harness.exits.codes(), vec![130]);
    assert!(harness.out.contents().is_empty());

    let session = invocation.session().expect("the target was dialed");
    assert!(session.is_released());
    assert!(session.connection().is_closed());
    assert!(session.channel().is_none());
}

#[tokio::test]
async fn test_session_release_is_idempotent() {
    let addr = echo_service::serve_with_reflection().await;
    let ctx = InvocationContext::new(Some(Duration::from_secs(5)));
    let connection = Connection::dial(&ctx, &addr.to_string(), Duration::from_secs(1), &Plaintext)
        .await
        .unwrap();
    let mut session = Session::new(connection, None).unwrap();

    session
        .source_mut()
        .find_symbol("echo.EchoService")
        .await
        .unwrap();
    assert!(session.source_mut().is_active());
    assert!(!session.connection().is_closed());

    session.release();
    assert!(session.is_released());
    assert!(session.connection().is_closed());
    assert!(!session.source_mut().is_active());

    session.release();
    assert!(session.is_released());
    assert!(session.connection().is_closed());
    assert!(session.channel().is_none());
}
