//! Programmatic descriptors for the echo fixture.
//!
//! Two schemas are exposed:
//!
//! * [`file_descriptor_set`]: what the server knows and publishes through reflection.
//!   It contains `echo.proto` (the service) and `echo/envelope.proto`, a proto2 file declaring
//!   the extendable `echo.ext.Envelope` message and one extension (`served_tag = 100`).
//! * [`client_only_extensions`]: a local descriptor set a client could pass as a protoset.
//!   It repeats `echo/envelope.proto` and adds `echo/client_ext.proto`, which declares
//!   `client_tag = 150`, an extension the server has never heard of.
use prost::Message;
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
    descriptor_proto::ExtensionRange,
    field_descriptor_proto::{Label, Type},
};

pub const ECHO_FILE: &str = "echo.proto";
pub const ENVELOPE_FILE: &str = "echo/envelope.proto";
pub const CLIENT_EXT_FILE: &str = "echo/client_ext.proto";

/// Schema served by the echo server.
pub fn file_descriptor_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![echo_file(), envelope_file()],
    }
}

/// [`file_descriptor_set`] encoded as protobuf bytes, the format of a `.protoset` file.
pub fn encoded_file_descriptor_set() -> Vec<u8> {
    file_descriptor_set().encode_to_vec()
}

/// Schema that only the client has.
pub fn client_only_extensions() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![envelope_file(), client_ext_file()],
    }
}

fn echo_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(ECHO_FILE.to_string()),
        package: Some("echo".to_string()),
        message_type: vec![
            message("EchoRequest", vec![scalar("message", 1, Type::String)]),
            message("EchoResponse", vec![scalar("message", 1, Type::String)]),
            message(
                "FailRequest",
                vec![
                    scalar("code", 1, Type::Int32),
                    scalar("message", 2, Type::String),
                ],
            ),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("EchoService".to_string()),
            method: vec![
                method("UnaryEcho", ".echo.EchoRequest", false, false),
                method("ServerStreamingEcho", ".echo.EchoRequest", false, true),
                method("ClientStreamingEcho", ".echo.EchoRequest", true, false),
                method("BidirectionalEcho", ".echo.EchoRequest", true, true),
                method("FailEcho", ".echo.FailRequest", false, false),
            ],
            ..Default::default()
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

fn envelope_file() -> FileDescriptorProto {
    let mut envelope = message("Envelope", vec![scalar("body", 1, Type::String)]);
    envelope.extension_range = vec![ExtensionRange {
        start: Some(100),
        end: Some(200),
        options: None,
    }];

    FileDescriptorProto {
        name: Some(ENVELOPE_FILE.to_string()),
        package: Some("echo.ext".to_string()),
        message_type: vec![envelope],
        extension: vec![extension("served_tag", 100, Type::String)],
        syntax: Some("proto2".to_string()),
        ..Default::default()
    }
}

fn client_ext_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(CLIENT_EXT_FILE.to_string()),
        package: Some("echo.client".to_string()),
        dependency: vec![ENVELOPE_FILE.to_string()],
        extension: vec![extension("client_tag", 150, Type::Int32)],
        syntax: Some("proto2".to_string()),
        ..Default::default()
    }
}

fn message(name: &str, field: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field,
        ..Default::default()
    }
}

fn scalar(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

fn extension(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        extendee: Some(".echo.ext.Envelope".to_string()),
        ..scalar(name, number, ty)
    }
}

fn method(name: &str, input: &str, client_streaming: bool, server_streaming: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(".echo.EchoResponse".to_string()),
        client_streaming: Some(client_streaming),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}
