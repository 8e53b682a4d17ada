use prost_reflect::{
    DescriptorPool, EnumDescriptor, ExtensionDescriptor, FieldDescriptor, MessageDescriptor,
    MethodDescriptor, ServiceDescriptor,
};
use std::fmt::Debug;

/// A generic wrapper for the different kinds of Protobuf descriptors a symbol can name.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Service(ServiceDescriptor),
    Method(MethodDescriptor),
    Message(MessageDescriptor),
    Field(FieldDescriptor),
    Extension(ExtensionDescriptor),
    Enum(EnumDescriptor),
}

impl Descriptor {
    /// Looks `symbol` up in `pool`.
    ///
    /// Top-level kinds (services, messages, enums, extensions) are tried first, then members:
    /// `pkg.Service.Method` and `pkg.Message.field`. A leading `.` is ignored.
    pub fn lookup(pool: &DescriptorPool, symbol: &str) -> Option<Self> {
        let symbol = symbol.strip_prefix('.').unwrap_or(symbol);

        if let Some(service) = pool.get_service_by_name(symbol) {
            return Some(Self::Service(service));
        }
        if let Some(message) = pool.get_message_by_name(symbol) {
            return Some(Self::Message(message));
        }
        if let Some(enum_desc) = pool.get_enum_by_name(symbol) {
            return Some(Self::Enum(enum_desc));
        }
        if let Some(extension) = pool.get_extension_by_name(symbol) {
            return Some(Self::Extension(extension));
        }

        let (parent, member) = symbol.rsplit_once('.')?;

        if let Some(service) = pool.get_service_by_name(parent) {
            return service
                .methods()
                .find(|m| m.name() == member)
                .map(Self::Method);
        }
        pool.get_message_by_name(parent)
            .and_then(|message| message.get_field_by_name(member))
            .map(Self::Field)
    }

    /// Returns the full_name (e.g.,`my.package.v1.MyMessage`) of the inner descriptor
    pub fn full_name(&self) -> &str {
        match self {
            Descriptor::Service(v) => v.full_name(),
            Descriptor::Method(v) => v.full_name(),
            Descriptor::Message(v) => v.full_name(),
            Descriptor::Field(v) => v.full_name(),
            Descriptor::Extension(v) => v.full_name(),
            Descriptor::Enum(v) => v.full_name(),
        }
    }

    /// Returns the inner [`ServiceDescriptor`] if this variant is `Service`.
    pub fn service_descriptor(&self) -> Option<&ServiceDescriptor> {
        match self {
            Descriptor::Service(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the inner [`MessageDescriptor`] if this variant is `Message`.
    pub fn message_descriptor(&self) -> Option<&MessageDescriptor> {
        match self {
            Descriptor::Message(d) => Some(d),
            _ => None,
        }
    }
}
