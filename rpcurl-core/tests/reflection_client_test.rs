use echo_service::file_descriptor_set;
use prost_reflect::DescriptorPool;
use rpcurl_core::reflection::client::{ReflectionClient, ReflectionResolveError};
use tonic::Code;
use tonic_reflection::server::v1::{ServerReflection, ServerReflectionServer};

fn setup_reflection_client() -> ReflectionClient<ServerReflectionServer<impl ServerReflection>> {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(file_descriptor_set())
        .include_reflection_service(false)
        .build_v1()
        .expect("Failed to setup Reflection Service");

    ReflectionClient::new(reflection_service)
}

#[tokio::test]
async fn test_reflection_client_fetches_service_file_descriptor() {
    let mut client = setup_reflection_client();

    let fd_set = client
        .file_descriptor_set_by_symbol("echo.EchoService")
        .await
        .expect("Failed to fetch file descriptor set by symbol");

    let pool =
        DescriptorPool::from_file_descriptor_set(fd_set).expect("Failed to build descriptor pool");

    let service = pool
        .get_service_by_name("echo.EchoService")
        .expect("Failed to find service in file descriptor");

    let streaming: Vec<_> = service
        .methods()
        .map(|m| {
            (
                m.name().to_string(),
                m.is_client_streaming(),
                m.is_server_streaming(),
            )
        })
        .collect();

    assert_eq!(
        streaming,
        vec![
            ("UnaryEcho".to_string(), false, false),
            ("ServerStreamingEcho".to_string(), false, true),
            ("ClientStreamingEcho".to_string(), true, false),
            ("BidirectionalEcho".to_string(), true, true),
            ("FailEcho".to_string(), false, false),
        ]
    );
    assert!(
        service
            .methods()
            .all(|m| m.output().full_name() == "echo.EchoResponse")
    );
}

#[tokio::test]
async fn test_reflection_client_fetches_message_file() {
    let mut client = setup_reflection_client();

    let fd_set = client
        .file_descriptor_set_by_symbol("echo.ext.Envelope")
        .await
        .expect("Failed to fetch the message's file");

    let names: Vec<_> = fd_set.file.iter().filter_map(|f| f.name.clone()).collect();
    assert_eq!(names, vec!["echo/envelope.proto"]);

    let pool = DescriptorPool::from_file_descriptor_set(fd_set).unwrap();
    let extension = pool.get_extension_by_name("echo.ext.served_tag").unwrap();
    assert_eq!(extension.number(), 100);
    assert_eq!(extension.containing_message().full_name(), "echo.ext.Envelope");
}

#[tokio::test]
async fn test_reflection_client_lists_services() {
    let mut client = setup_reflection_client();

    let services = client.list_services().await.unwrap();

    assert_eq!(services, vec!["echo.EchoService".to_string()]);
}

#[tokio::test]
async fn test_reflection_client_symbol_not_found() {
    let mut client = setup_reflection_client();

    let result = client.file_descriptor_set_by_symbol("echo.Missing").await;

    assert!(matches!(
        result,
        Err(ReflectionResolveError::ServerError { code, .. }) if code == Code::NotFound as i32
    ));
    // A failed query leaves no half-read stream behind.
    assert!(!client.is_active());
}

#[tokio::test]
async fn test_reflection_client_reuses_and_resets_stream() {
    let mut client = setup_reflection_client();
    assert!(!client.is_active());

    client.list_services().await.unwrap();
    assert!(client.is_active());

    client
        .file_descriptor_set_by_symbol("echo.EchoService")
        .await
        .unwrap();
    assert!(client.is_active());

    client.reset();
    client.reset();
    assert!(!client.is_active());

    // The next query opens a fresh stream.
    let services = client.list_services().await.unwrap();
    assert_eq!(services, vec!["echo.EchoService".to_string()]);
    assert!(client.is_active());
}

#[tokio::test]
async fn test_reflection_client_without_reflection_service() {
    let mut client = ReflectionClient::new(echo_service::EchoServiceServer);

    let result = client.list_services().await;

    match result {
        Err(err) => assert_eq!(err.status().map(|s| s.code()), Some(Code::Unimplemented)),
        Ok(services) => panic!("Expected an error, got {services:?}"),
    }
}
