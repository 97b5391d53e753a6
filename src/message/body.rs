//! Message body variants.
//!
//! Bytes and stream bodies are strictly modal: in write mode only writes are
//! allowed, after [`BytesBody::reset`] / [`StreamBody::reset`] only reads are.
//! Map bodies can be read at any time and written only while writable.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::property::Value;
use crate::utils::{JmsError, Result};

/// Which body variant a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    /// A message with no body.
    Message,
    Text,
    Bytes,
    Map,
    Stream,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Body {
    Empty,
    Text(Option<String>),
    Bytes(BytesBody),
    Map(MapBody),
    Stream(StreamBody),
    Object(Option<serde_json::Value>),
}

impl Body {
    pub fn kind(&self) -> BodyKind {
        match self {
            Body::Empty => BodyKind::Message,
            Body::Text(_) => BodyKind::Text,
            Body::Bytes(_) => BodyKind::Bytes,
            Body::Map(_) => BodyKind::Map,
            Body::Stream(_) => BodyKind::Stream,
            Body::Object(_) => BodyKind::Object,
        }
    }

    /// An empty body of the given kind, in write mode.
    pub fn empty(kind: BodyKind) -> Self {
        match kind {
            BodyKind::Message => Body::Empty,
            BodyKind::Text => Body::Text(None),
            BodyKind::Bytes => Body::Bytes(BytesBody::default()),
            BodyKind::Map => Body::Map(MapBody::default()),
            BodyKind::Stream => Body::Stream(StreamBody::default()),
            BodyKind::Object => Body::Object(None),
        }
    }

    /// Switches the body to read-only mode with the read position rewound.
    pub(crate) fn make_read_only(&mut self) {
        match self {
            Body::Bytes(b) => b.reset(),
            Body::Stream(s) => s.reset(),
            Body::Map(m) => m.read_only = true,
            Body::Empty | Body::Text(_) | Body::Object(_) => {}
        }
    }
}

/// An uninterpreted stream of bytes written with big-endian primitive encodings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BytesBody {
    data: BytesMut,
    #[serde(skip)]
    position: usize,
    #[serde(skip)]
    read_mode: bool,
}

macro_rules! bytes_rw {
    ($(($write:ident, $read:ident, $ty:ty, $put:ident, $get:ident)),* $(,)?) => {
        $(
            pub fn $write(&mut self, value: $ty) -> Result<()> {
                self.check_writable()?;
                self.data.$put(value);
                Ok(())
            }

            pub fn $read(&mut self) -> Result<$ty> {
                let mut cursor = self.readable(std::mem::size_of::<$ty>())?;
                let value = cursor.$get();
                self.position += std::mem::size_of::<$ty>();
                Ok(value)
            }
        )*
    };
}

impl BytesBody {
    fn check_writable(&self) -> Result<()> {
        if self.read_mode {
            Err(JmsError::MessageNotWriteable)
        } else {
            Ok(())
        }
    }

    /// Returns the unread bytes if at least `needed` of them remain.
    fn readable(&self, needed: usize) -> Result<&[u8]> {
        if !self.read_mode {
            return Err(JmsError::MessageNotReadable);
        }
        let rest = &self.data[self.position..];
        if rest.len() < needed {
            return Err(JmsError::MessageEof);
        }
        Ok(rest)
    }

    bytes_rw! {
        (write_byte, read_byte, i8, put_i8, get_i8),
        (write_short, read_short, i16, put_i16, get_i16),
        (write_int, read_int, i32, put_i32, get_i32),
        (write_long, read_long, i64, put_i64, get_i64),
        (write_float, read_float, f32, put_f32, get_f32),
        (write_double, read_double, f64, put_f64, get_f64),
    }

    pub fn write_boolean(&mut self, value: bool) -> Result<()> {
        self.write_byte(i8::from(value))
    }

    pub fn read_boolean(&mut self) -> Result<bool> {
        Ok(self.read_byte()? != 0)
    }

    pub fn read_unsigned_byte(&mut self) -> Result<u8> {
        Ok(self.read_byte()? as u8)
    }

    pub fn read_unsigned_short(&mut self) -> Result<u16> {
        Ok(self.read_short()? as u16)
    }

    /// Writes a character as a UTF-16 code unit. Characters outside the basic
    /// multilingual plane cannot be represented and are rejected.
    pub fn write_char(&mut self, value: char) -> Result<()> {
        let unit = u16::try_from(u32::from(value)).map_err(|_| {
            JmsError::format(format!("character {value:?} does not fit a UTF-16 unit"))
        })?;
        self.write_short(unit as i16)
    }

    pub fn read_char(&mut self) -> Result<char> {
        let unit = self.read_unsigned_short()?;
        char::from_u32(u32::from(unit))
            .ok_or_else(|| JmsError::format(format!("0x{unit:04x} is not a character")))
    }

    /// Writes a string as a two-byte length followed by its UTF-8 bytes.
    pub fn write_utf(&mut self, value: &str) -> Result<()> {
        self.check_writable()?;
        let len = u16::try_from(value.len())
            .map_err(|_| JmsError::format("string longer than 65535 bytes"))?;
        self.data.put_u16(len);
        self.data.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn read_utf(&mut self) -> Result<String> {
        let mut cursor = self.readable(2)?;
        let len = usize::from(cursor.get_u16());
        if cursor.len() < len {
            return Err(JmsError::MessageEof);
        }
        let text = std::str::from_utf8(&cursor[..len])
            .map_err(|e| JmsError::format(format!("invalid UTF-8: {e}")))?
            .to_string();
        self.position += 2 + len;
        Ok(text)
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.data.put_slice(value);
        Ok(())
    }

    /// Reads up to `buf.len()` bytes. Returns `None` once the body is exhausted.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if !self.read_mode {
            return Err(JmsError::MessageNotReadable);
        }
        let rest = &self.data[self.position..];
        if rest.is_empty() {
            return Ok(None);
        }
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.position += n;
        Ok(Some(n))
    }

    /// Writes a typed value using the encoding of its type.
    pub fn write_object(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Boolean(v) => self.write_boolean(*v),
            Value::Byte(v) => self.write_byte(*v),
            Value::Short(v) => self.write_short(*v),
            Value::Char(v) => self.write_char(*v),
            Value::Int(v) => self.write_int(*v),
            Value::Long(v) => self.write_long(*v),
            Value::Float(v) => self.write_float(*v),
            Value::Double(v) => self.write_double(*v),
            Value::String(v) => self.write_utf(v),
            Value::Bytes(v) => self.write_bytes(v),
        }
    }

    /// Total body length; only available in read mode.
    pub fn body_length(&self) -> Result<usize> {
        if !self.read_mode {
            return Err(JmsError::MessageNotReadable);
        }
        Ok(self.data.len())
    }

    /// Puts the body in read-only mode and rewinds to the beginning.
    pub fn reset(&mut self) {
        self.read_mode = true;
        self.position = 0;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_mode
    }
}

/// Position inside a stream body. `partial` tracks how much of a bytes field
/// has been consumed by chunked reads.
#[derive(Debug, Clone, Copy, Default)]
struct StreamCursor {
    index: usize,
    partial: Option<usize>,
}

/// A sequence of typed values read back in the order they were written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamBody {
    values: Vec<Value>,
    #[serde(skip)]
    cursor: StreamCursor,
    #[serde(skip)]
    read_mode: bool,
}

macro_rules! stream_write {
    ($($write:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $write(&mut self, value: $ty) -> Result<()> {
                self.write_object(Value::from(value))
            }
        )*
    };
}

macro_rules! stream_read {
    ($($read:ident: $ty:ty => $convert:ident),* $(,)?) => {
        $(
            pub fn $read(&mut self) -> Result<$ty> {
                self.read_with(Value::$convert)
            }
        )*
    };
}

impl StreamBody {
    pub fn write_object(&mut self, value: Value) -> Result<()> {
        if self.read_mode {
            return Err(JmsError::MessageNotWriteable);
        }
        self.values.push(value);
        Ok(())
    }

    stream_write! {
        write_boolean: bool,
        write_byte: i8,
        write_short: i16,
        write_char: char,
        write_int: i32,
        write_long: i64,
        write_float: f32,
        write_double: f64,
        write_string: &str,
        write_bytes: &[u8],
    }

    stream_read! {
        read_boolean: bool => to_boolean,
        read_byte: i8 => to_byte,
        read_short: i16 => to_short,
        read_char: char => to_char,
        read_int: i32 => to_int,
        read_long: i64 => to_long,
        read_float: f32 => to_float,
        read_double: f64 => to_double,
        read_string: String => to_string_value,
    }

    fn current(&self) -> Result<&Value> {
        if !self.read_mode {
            return Err(JmsError::MessageNotReadable);
        }
        self.values
            .get(self.cursor.index)
            .ok_or(JmsError::MessageEof)
    }

    /// Converts the current value. A failed conversion leaves the position unchanged.
    fn read_with<T>(&mut self, convert: impl FnOnce(&Value) -> Result<T>) -> Result<T> {
        if self.cursor.partial.is_some() {
            return Err(JmsError::format("a bytes field is partially read"));
        }
        let value = convert(self.current()?)?;
        self.cursor.index += 1;
        Ok(value)
    }

    /// Reads the next value without conversion.
    pub fn read_object(&mut self) -> Result<Value> {
        self.read_with(|v| Ok(v.clone()))
    }

    /// Reads a bytes field in chunks of at most `buf.len()`. Returns `None`
    /// after the whole field has been consumed, then moves to the next field.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let data = match self.current()? {
            Value::Bytes(data) => data,
            other => {
                return Err(JmsError::format(format!(
                    "cannot read a {} value as bytes",
                    other.type_name()
                )));
            }
        };
        let offset = self.cursor.partial.unwrap_or(0);
        if offset >= data.len() {
            let empty_field = data.is_empty() && self.cursor.partial.is_none();
            self.cursor.index += 1;
            self.cursor.partial = None;
            // an empty field still reports one zero-length read
            return Ok(if empty_field { Some(0) } else { None });
        }
        let n = (data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        self.cursor.partial = Some(offset + n);
        Ok(Some(n))
    }

    pub fn reset(&mut self) {
        self.read_mode = true;
        self.cursor = StreamCursor::default();
    }

    pub fn is_read_only(&self) -> bool {
        self.read_mode
    }
}

/// Name/value pairs with typed access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapBody {
    entries: BTreeMap<String, Value>,
    #[serde(skip)]
    read_only: bool,
}

macro_rules! map_get {
    ($($get:ident: $ty:ty => $convert:ident),* $(,)?) => {
        $(
            pub fn $get(&self, name: &str) -> Result<Option<$ty>> {
                self.entries.get(name).map(Value::$convert).transpose()
            }
        )*
    };
}

impl MapBody {
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.read_only {
            return Err(JmsError::MessageNotWriteable);
        }
        if name.is_empty() {
            return Err(JmsError::InvalidArgument(
                "map entry name must not be empty".to_string(),
            ));
        }
        self.entries.insert(name.to_string(), value.into());
        Ok(())
    }

    map_get! {
        get_boolean: bool => to_boolean,
        get_byte: i8 => to_byte,
        get_short: i16 => to_short,
        get_char: char => to_char,
        get_int: i32 => to_int,
        get_long: i64 => to_long,
        get_float: f32 => to_float,
        get_double: f64 => to_double,
        get_string: String => to_string_value,
        get_bytes: Vec<u8> => to_bytes,
    }

    pub fn get_object(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn item_exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}
