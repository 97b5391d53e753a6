//! Message definitions
//!
//! A [`Message`] is made of three parts:
//! - header fields, most of which are assigned by the provider on send
//! - typed application properties
//! - a body, one of the variants in [`Body`]
//!
//! A message is writable when created and after `clear_body` /
//! `clear_properties`; it becomes read-only once it has been sent or received.

pub mod body;
pub mod property;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Weak;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::broker::destination::Destination;
use crate::utils::{JmsError, Result};

pub use body::{Body, BodyKind, BytesBody, MapBody, StreamBody};
pub use property::{PropertyOwner, PropertyValue, Value};

pub const DEFAULT_PRIORITY: u8 = 4;
pub const MAX_PRIORITY: u8 = 9;

/// Internal identifier of a connection, used for noLocal filtering.
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    NonPersistent,
    #[default]
    Persistent,
}

impl DeliveryMode {
    /// The name used for this mode in selectors.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::NonPersistent => "NON_PERSISTENT",
            DeliveryMode::Persistent => "PERSISTENT",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    pub(crate) message_id: Option<String>,
    pub(crate) timestamp: i64,
    pub(crate) correlation_id: Option<String>,
    pub(crate) reply_to: Option<Destination>,
    pub(crate) destination: Option<Destination>,
    pub(crate) delivery_mode: DeliveryMode,
    pub(crate) priority: u8,
    pub(crate) redelivered: bool,
    pub(crate) expiration: i64,
    pub(crate) delivery_time: i64,
    pub(crate) jms_type: Option<String>,
}

/// Acknowledges deliveries on behalf of a received message.
pub(crate) trait Acknowledger: Send + Sync {
    fn acknowledge_through(&self, sequence: u64) -> Result<()>;
}

/// Link from a received message back to the session that consumed it.
#[derive(Clone)]
pub(crate) struct DeliveryHandle {
    pub(crate) acknowledger: Weak<dyn Acknowledger>,
    pub(crate) sequence: u64,
}

impl fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    header: Header,
    properties: BTreeMap<String, PropertyValue>,
    body: Body,
    #[serde(skip)]
    properties_read_only: bool,
    #[serde(skip)]
    body_read_only: bool,
    #[serde(skip)]
    pub(crate) origin: Option<ConnectionId>,
    #[serde(skip)]
    pub(crate) delivery: Option<DeliveryHandle>,
}

impl Default for Message {
    fn default() -> Self {
        Self::with_kind(BodyKind::Message)
    }
}

macro_rules! typed_property_getters {
    ($($get:ident: $ty:ty => $convert:ident),* $(,)?) => {
        $(
            pub fn $get(&self, name: &str) -> Result<Option<$ty>> {
                self.properties.get(name).map(PropertyValue::$convert).transpose()
            }
        )*
    };
}

impl Message {
    /// A message with no body.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(kind: BodyKind) -> Self {
        Self {
            header: Header {
                priority: DEFAULT_PRIORITY,
                ..Header::default()
            },
            properties: BTreeMap::new(),
            body: Body::empty(kind),
            properties_read_only: false,
            body_read_only: false,
            origin: None,
            delivery: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut message = Self::with_kind(BodyKind::Text);
        message.body = Body::Text(Some(text.into()));
        message
    }

    pub fn bytes() -> Self {
        Self::with_kind(BodyKind::Bytes)
    }

    pub fn map() -> Self {
        Self::with_kind(BodyKind::Map)
    }

    pub fn stream() -> Self {
        Self::with_kind(BodyKind::Stream)
    }

    pub fn object<T: Serialize>(value: &T) -> Result<Self> {
        let mut message = Self::with_kind(BodyKind::Object);
        message.set_object(value)?;
        Ok(message)
    }

    pub fn kind(&self) -> BodyKind {
        self.body.kind()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    // ---- header -------------------------------------------------------

    pub fn message_id(&self) -> Option<&str> {
        self.header.message_id.as_deref()
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header.correlation_id.as_deref()
    }

    pub fn set_correlation_id(&mut self, id: Option<String>) {
        self.header.correlation_id = id;
    }

    pub fn reply_to(&self) -> Option<&Destination> {
        self.header.reply_to.as_ref()
    }

    pub fn set_reply_to(&mut self, destination: Option<Destination>) {
        self.header.reply_to = destination;
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.header.destination.as_ref()
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.header.delivery_mode
    }

    pub fn priority(&self) -> u8 {
        self.header.priority
    }

    pub fn redelivered(&self) -> bool {
        self.header.redelivered
    }

    /// Expiration as epoch milliseconds; `0` means the message never expires.
    pub fn expiration(&self) -> i64 {
        self.header.expiration
    }

    /// Earliest time (epoch milliseconds) the message may be delivered.
    pub fn delivery_time(&self) -> i64 {
        self.header.delivery_time
    }

    pub fn jms_type(&self) -> Option<&str> {
        self.header.jms_type.as_deref()
    }

    pub fn set_jms_type(&mut self, jms_type: Option<String>) {
        self.header.jms_type = jms_type;
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub(crate) fn is_expired_at(&self, now_ms: i64) -> bool {
        self.header.expiration != 0 && now_ms >= self.header.expiration
    }

    // ---- properties ---------------------------------------------------

    pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        if self.properties_read_only {
            return Err(JmsError::MessageNotWriteable);
        }
        property::validate_client_property_name(name)?;
        let value = value.into();
        if !value.is_property_type() {
            return Err(JmsError::format(format!(
                "{} is not a valid property type",
                value.type_name()
            )));
        }
        self.properties.insert(name.to_string(), value);
        Ok(())
    }

    /// Sets a property without client-side name checks.
    pub(crate) fn set_provider_property(&mut self, name: &str, value: PropertyValue) {
        self.properties.insert(name.to_string(), value);
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    typed_property_getters! {
        get_boolean_property: bool => to_boolean,
        get_byte_property: i8 => to_byte,
        get_short_property: i16 => to_short,
        get_int_property: i32 => to_int,
        get_long_property: i64 => to_long,
        get_float_property: f32 => to_float,
        get_double_property: f64 => to_double,
        get_string_property: String => to_string_value,
    }

    pub fn property_exists(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Removes every property and makes the properties writable again.
    pub fn clear_properties(&mut self) {
        self.properties.clear();
        self.properties_read_only = false;
    }

    /// Number of times this message has been handed to a consumer.
    pub fn delivery_count(&self) -> Option<i32> {
        match self.properties.get(property::DELIVERY_COUNT_PROPERTY) {
            Some(PropertyValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    // ---- body ---------------------------------------------------------

    fn wrong_kind(&self, wanted: BodyKind) -> JmsError {
        wrong_kind(self.kind(), wanted)
    }

    pub fn get_text(&self) -> Result<Option<&str>> {
        match &self.body {
            Body::Text(text) => Ok(text.as_deref()),
            _ => Err(self.wrong_kind(BodyKind::Text)),
        }
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<()> {
        if !matches!(self.body, Body::Text(_)) {
            return Err(self.wrong_kind(BodyKind::Text));
        }
        if self.body_read_only {
            return Err(JmsError::MessageNotWriteable);
        }
        self.body = Body::Text(Some(text.into()));
        Ok(())
    }

    pub fn get_object<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.body {
            Body::Object(None) => Ok(None),
            Body::Object(Some(value)) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| JmsError::format(format!("cannot deserialize object body: {e}"))),
            _ => Err(self.wrong_kind(BodyKind::Object)),
        }
    }

    pub fn set_object<T: Serialize>(&mut self, value: &T) -> Result<()> {
        if !matches!(self.body, Body::Object(_)) {
            return Err(self.wrong_kind(BodyKind::Object));
        }
        if self.body_read_only {
            return Err(JmsError::MessageNotWriteable);
        }
        let value = serde_json::to_value(value)
            .map_err(|e| JmsError::format(format!("cannot serialize object body: {e}")))?;
        self.body = Body::Object(Some(value));
        Ok(())
    }

    pub fn as_bytes_mut(&mut self) -> Result<&mut BytesBody> {
        let kind = self.kind();
        match &mut self.body {
            Body::Bytes(bytes) => Ok(bytes),
            _ => Err(wrong_kind(kind, BodyKind::Bytes)),
        }
    }

    pub fn as_stream_mut(&mut self) -> Result<&mut StreamBody> {
        let kind = self.kind();
        match &mut self.body {
            Body::Stream(stream) => Ok(stream),
            _ => Err(wrong_kind(kind, BodyKind::Stream)),
        }
    }

    pub fn as_map(&self) -> Result<&MapBody> {
        match &self.body {
            Body::Map(map) => Ok(map),
            _ => Err(self.wrong_kind(BodyKind::Map)),
        }
    }

    pub fn as_map_mut(&mut self) -> Result<&mut MapBody> {
        let kind = self.kind();
        match &mut self.body {
            Body::Map(map) => Ok(map),
            _ => Err(wrong_kind(kind, BodyKind::Map)),
        }
    }

    /// Rewinds a bytes or stream body and puts it in read mode.
    pub fn reset(&mut self) -> Result<()> {
        match &mut self.body {
            Body::Bytes(bytes) => bytes.reset(),
            Body::Stream(stream) => stream.reset(),
            _ => {
                return Err(JmsError::format(
                    "reset applies to bytes and stream messages only",
                ));
            }
        }
        Ok(())
    }

    /// Empties the body and puts it back in write mode.
    pub fn clear_body(&mut self) {
        self.body = Body::empty(self.kind());
        self.body_read_only = false;
    }

    pub fn is_body_read_only(&self) -> bool {
        self.body_read_only
    }

    pub fn is_properties_read_only(&self) -> bool {
        self.properties_read_only
    }

    pub(crate) fn make_read_only(&mut self) {
        self.body.make_read_only();
        self.body_read_only = true;
        self.properties_read_only = true;
    }

    // ---- acknowledgement ----------------------------------------------

    /// Acknowledges this message and every message consumed before it by the
    /// same session. Only meaningful for client-acknowledged sessions; a no-op
    /// otherwise.
    pub fn acknowledge(&self) -> Result<()> {
        let Some(handle) = &self.delivery else {
            return Ok(());
        };
        let acknowledger = handle
            .acknowledger
            .upgrade()
            .ok_or_else(|| JmsError::illegal_state("the consuming session is closed"))?;
        acknowledger.acknowledge_through(handle.sequence)
    }
}

fn wrong_kind(actual: BodyKind, wanted: BodyKind) -> JmsError {
    JmsError::format(format!(
        "operation requires a {wanted:?} message, this is a {actual:?} message"
    ))
}
