//! # Request & Response Formats
//!
//! Converts between text and [`DynamicMessage`] for one resolved method.
//!
//! * **Requests** are parsed lazily from a reader by [`RequestParser`]. JSON input is a stream of
//!   concatenated objects; text-format input separates messages with the ASCII record separator.
//! * **[`RequestSupplier`]** runs the parser on a blocking thread and hands messages to the async
//!   side over a bounded channel, so arbitrarily long request streams are never buffered whole.
//! * **[`ResponseFormatter`]** renders responses and terminal statuses in the same format.
use futures_util::Stream;
use prost::Message;
use prost_reflect::{
    DescriptorPool, DeserializeOptions, DynamicMessage, MessageDescriptor, MethodDescriptor,
    SerializeOptions, text_format::FormatOptions as TextFormatOptions,
};
use serde_json::{Map, Value};
use std::{
    fmt,
    io::{self, BufRead, BufReader, Read},
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, warn};

/// Separates messages in text-format request streams.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// The request payload that means "read from the input stream".
pub const STDIN_MARKER: &str = "@";

/// Text representation used for requests, responses and statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Json,
    Text,
}

impl FromStr for Format {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            _ => Err(FormatError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Print fields holding their default value in JSON responses.
    pub emit_defaults: bool,
    /// Ignore unknown fields in JSON requests instead of rejecting them.
    pub allow_unknown_fields: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            emit_defaults: true,
            allow_unknown_fields: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Unknown format '{0}', expected 'json' or 'text'")]
    UnknownFormat(String),
    #[error("Failed to read request data: '{0}'")]
    Io(#[from] io::Error),
    #[error("Invalid JSON: '{0}'")]
    Json(#[from] serde_json::Error),
    #[error("Request data is not valid UTF-8: '{0}'")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Invalid text format: '{0}'")]
    Text(#[from] prost_reflect::text_format::ParseError),
}

/// Where request messages are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    Literal(String),
    Stdin,
}

impl RequestPayload {
    /// Interprets the `-d` argument: [`STDIN_MARKER`] selects the input stream.
    pub fn from_data(data: &str) -> Self {
        if data == STDIN_MARKER {
            Self::Stdin
        } else {
            Self::Literal(data.to_string())
        }
    }
}

impl Default for RequestPayload {
    fn default() -> Self {
        Self::Literal(String::new())
    }
}

type JsonStream = serde_json::StreamDeserializer<
    'static,
    serde_json::de::IoRead<Box<dyn Read + Send>>,
    Value,
>;

enum Decoder {
    Json(JsonStream),
    Text(BufReader<Box<dyn Read + Send>>),
}

/// Lazily parses request messages of one type from a reader.
///
/// Yields `None` once the input is exhausted. The iterator is fused after the first error.
pub struct RequestParser {
    desc: MessageDescriptor,
    decoder: Decoder,
    options: DeserializeOptions,
    done: bool,
}

impl RequestParser {
    pub fn new(
        format: Format,
        desc: MessageDescriptor,
        reader: Box<dyn Read + Send>,
        options: &FormatOptions,
    ) -> Self {
        let decoder = match format {
            Format::Json => {
                Decoder::Json(serde_json::Deserializer::from_reader(reader).into_iter())
            }
            Format::Text => Decoder::Text(BufReader::new(reader)),
        };

        Self {
            desc,
            decoder,
            options: DeserializeOptions::new().deny_unknown_fields(!options.allow_unknown_fields),
            done: false,
        }
    }

    fn next_json(&mut self) -> Option<Result<DynamicMessage, FormatError>> {
        let Decoder::Json(stream) = &mut self.decoder else {
            return None;
        };

        let value = match stream.next()? {
            Ok(value) => value,
            Err(err) => return Some(Err(err.into())),
        };

        Some(
            DynamicMessage::deserialize_with_options(self.desc.clone(), value, &self.options)
                .map_err(FormatError::from),
        )
    }

    fn next_text(&mut self) -> Option<Result<DynamicMessage, FormatError>> {
        let Decoder::Text(reader) = &mut self.decoder else {
            return None;
        };

        let mut buf = Vec::new();
        let read = match reader.read_until(RECORD_SEPARATOR, &mut buf) {
            Ok(read) => read,
            Err(err) => return Some(Err(err.into())),
        };

        let terminated = buf.last() == Some(&RECORD_SEPARATOR);
        if terminated {
            buf.pop();
        }
        // A trailing chunk of whitespace is the end of the stream, not an empty message.
        if read == 0 || (!terminated && buf.iter().all(u8::is_ascii_whitespace)) {
            return None;
        }

        let text = match String::from_utf8(buf) {
            Ok(text) => text,
            Err(err) => return Some(Err(err.into())),
        };

        Some(DynamicMessage::parse_text_format(self.desc.clone(), &text).map_err(FormatError::from))
    }
}

impl Iterator for RequestParser {
    type Item = Result<DynamicMessage, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = match self.decoder {
            Decoder::Json(_) => self.next_json(),
            Decoder::Text(_) => self.next_text(),
        };

        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// Shared counters of a [`RequestSupplier`] that outlive the request stream.
#[derive(Debug, Clone, Default)]
pub struct RequestTally {
    sent: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<FormatError>>>,
}

impl RequestTally {
    /// Number of messages handed to the transport through [`RequestSupplier::into_stream`].
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Takes the parse error that ended the request stream early, if any.
    pub fn take_failure(&self) -> Option<FormatError> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }

    fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self, err: FormatError) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = Some(err);
        }
    }
}

/// Pull-driven producer of request messages.
///
/// The parser runs on a blocking thread and the channel holds at most one parsed message, so
/// reading the input only advances as fast as the call consumes it.
pub struct RequestSupplier {
    rx: mpsc::Receiver<Result<DynamicMessage, FormatError>>,
    tally: RequestTally,
}

impl RequestSupplier {
    /// Starts the producer. Must be called from within a Tokio runtime.
    pub fn spawn(parser: RequestParser) -> Self {
        let (tx, rx) = mpsc::channel(1);

        tokio::task::spawn_blocking(move || {
            for item in parser {
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        Self {
            rx,
            tally: RequestTally::default(),
        }
    }

    /// Receives the next parsed message without counting it as sent.
    pub async fn next(&mut self) -> Option<Result<DynamicMessage, FormatError>> {
        self.rx.recv().await
    }

    pub fn tally(&self) -> RequestTally {
        self.tally.clone()
    }

    /// Turns the supplier into a request stream for streaming calls.
    ///
    /// Every yielded message counts as sent. A parse error ends the stream and is kept in the
    /// [`RequestTally`] for the caller to report once the call completes.
    pub fn into_stream(self) -> impl Stream<Item = DynamicMessage> + Send + 'static {
        let Self { rx, tally } = self;

        futures_util::stream::unfold((rx, tally), |(mut rx, tally)| async move {
            match rx.recv().await? {
                Ok(message) => {
                    tally.record_sent();
                    Some((message, (rx, tally)))
                }
                Err(err) => {
                    warn!(error = %err, "request stream ended early");
                    tally.record_failure(err);
                    None
                }
            }
        })
    }
}

/// Wire shape of `google.rpc.Status`, carried in `grpc-status-details-bin`.
#[derive(Clone, PartialEq, prost::Message)]
struct RpcStatus {
    #[prost(int32, tag = "1")]
    code: i32,
    #[prost(string, tag = "2")]
    message: String,
    #[prost(message, repeated, tag = "3")]
    details: Vec<prost_types::Any>,
}

/// Renders responses and terminal statuses of one method.
#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    format: Format,
    options: FormatOptions,
    pool: DescriptorPool,
}

impl ResponseFormatter {
    pub fn new(format: Format, options: FormatOptions, method: &MethodDescriptor) -> Self {
        Self {
            format,
            options,
            pool: method.parent_pool().clone(),
        }
    }

    pub fn format_message(&self, message: &DynamicMessage) -> Result<String, FormatError> {
        match self.format {
            Format::Json => Ok(serde_json::to_string_pretty(&self.to_json(message)?)?),
            Format::Text => Ok(self.to_text(message)),
        }
    }

    /// Renders code, message and any `google.rpc.Status` details of a terminal status.
    ///
    /// Details whose type is known to the method's pool are expanded; others show their type URL.
    pub fn format_status(&self, status: &Status) -> String {
        let details = self.status_details(status);

        match self.format {
            Format::Json => self.status_to_json(status, &details),
            Format::Text => self.status_to_text(status, &details),
        }
    }

    fn status_details(&self, status: &Status) -> Vec<prost_types::Any> {
        if status.details().is_empty() {
            return Vec::new();
        }

        match RpcStatus::decode(status.details()) {
            Ok(rpc_status) => rpc_status.details,
            Err(err) => {
                debug!(error = %err, "status details are not a google.rpc.Status");
                Vec::new()
            }
        }
    }

    fn expand(&self, any: &prost_types::Any) -> Option<DynamicMessage> {
        let type_name = any.type_url.rsplit('/').next()?;
        let desc = self.pool.get_message_by_name(type_name)?;
        DynamicMessage::decode(desc, any.value.as_slice()).ok()
    }

    fn to_json(&self, message: &DynamicMessage) -> Result<Value, FormatError> {
        let options = SerializeOptions::new().skip_default_fields(!self.options.emit_defaults);
        Ok(message.serialize_with_options(serde_json::value::Serializer, &options)?)
    }

    fn to_text(&self, message: &DynamicMessage) -> String {
        message.to_text_format_with_options(&TextFormatOptions::new().pretty(true))
    }

    fn status_to_json(&self, status: &Status, details: &[prost_types::Any]) -> String {
        let mut object = Map::new();
        object.insert("code".to_string(), Value::from(status.code() as i32));
        object.insert("message".to_string(), Value::from(status.message()));

        if !details.is_empty() {
            let details = details
                .iter()
                .map(|any| {
                    let mut detail = match self.expand(any).map(|m| self.to_json(&m)) {
                        Some(Ok(Value::Object(fields))) => fields,
                        _ => Map::new(),
                    };
                    detail.insert("@type".to_string(), Value::from(any.type_url.as_str()));
                    Value::Object(detail)
                })
                .collect();
            object.insert("details".to_string(), Value::Array(details));
        }

        let object = Value::Object(object);
        serde_json::to_string_pretty(&object).unwrap_or_else(|_| object.to_string())
    }

    fn status_to_text(&self, status: &Status, details: &[prost_types::Any]) -> String {
        let mut out = format!(
            "code: {}\nmessage: {:?}",
            status.code() as i32,
            status.message()
        );

        for any in details {
            out.push_str("\ndetails {\n");
            match self.expand(any) {
                Some(message) => {
                    out.push_str(&format!("  [{}] {{\n", any.type_url));
                    for line in self.to_text(&message).lines() {
                        out.push_str(&format!("    {line}\n"));
                    }
                    out.push_str("  }\n");
                }
                None => out.push_str(&format!("  type_url: {:?}\n", any.type_url)),
            }
            out.push('}');
        }

        out
    }
}
