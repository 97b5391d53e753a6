//! Typed values carried by message properties and by map/stream bodies,
//! together with the conversion table that governs typed reads.
//!
//! A value written as one type may be read back as another only along the
//! widening paths listed below; every other combination is a format error.
//!
//! | written as | readable as                                   |
//! |------------|-----------------------------------------------|
//! | boolean    | boolean, string                               |
//! | byte       | byte, short, int, long, string                |
//! | short      | short, int, long, string                      |
//! | char       | char, string                                  |
//! | int        | int, long, string                             |
//! | long       | long, string                                  |
//! | float      | float, double, string                         |
//! | double     | double, string                                |
//! | string     | every type except char and bytes (parsed)     |
//! | bytes      | bytes                                         |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::{JmsError, Result};

/// A typed value.
///
/// Properties accept every variant except [`Value::Char`] and [`Value::Bytes`];
/// map and stream bodies accept all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// Values allowed as message properties.
pub type PropertyValue = Value;

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Char(_) => "char",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    pub(crate) fn is_property_type(&self) -> bool {
        !matches!(self, Value::Char(_) | Value::Bytes(_))
    }

    fn mismatch(&self, target: &str) -> JmsError {
        JmsError::format(format!(
            "cannot read a {} value as {target}",
            self.type_name()
        ))
    }

    fn parse<T: std::str::FromStr>(s: &str, target: &str) -> Result<T> {
        s.trim()
            .parse::<T>()
            .map_err(|_| JmsError::format(format!("'{s}' is not a valid {target}")))
    }

    pub fn to_boolean(&self) -> Result<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            // Boolean.valueOf semantics: anything but "true" is false
            Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
            other => Err(other.mismatch("boolean")),
        }
    }

    pub fn to_byte(&self) -> Result<i8> {
        match self {
            Value::Byte(v) => Ok(*v),
            Value::String(s) => Self::parse(s, "byte"),
            other => Err(other.mismatch("byte")),
        }
    }

    pub fn to_short(&self) -> Result<i16> {
        match self {
            Value::Byte(v) => Ok(i16::from(*v)),
            Value::Short(v) => Ok(*v),
            Value::String(s) => Self::parse(s, "short"),
            other => Err(other.mismatch("short")),
        }
    }

    pub fn to_char(&self) -> Result<char> {
        match self {
            Value::Char(c) => Ok(*c),
            other => Err(other.mismatch("char")),
        }
    }

    pub fn to_int(&self) -> Result<i32> {
        match self {
            Value::Byte(v) => Ok(i32::from(*v)),
            Value::Short(v) => Ok(i32::from(*v)),
            Value::Int(v) => Ok(*v),
            Value::String(s) => Self::parse(s, "int"),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn to_long(&self) -> Result<i64> {
        match self {
            Value::Byte(v) => Ok(i64::from(*v)),
            Value::Short(v) => Ok(i64::from(*v)),
            Value::Int(v) => Ok(i64::from(*v)),
            Value::Long(v) => Ok(*v),
            Value::String(s) => Self::parse(s, "long"),
            other => Err(other.mismatch("long")),
        }
    }

    pub fn to_float(&self) -> Result<f32> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::String(s) => Self::parse(s, "float"),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn to_double(&self) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(f64::from(*v)),
            Value::Double(v) => Ok(*v),
            Value::String(s) => Self::parse(s, "double"),
            other => Err(other.mismatch("double")),
        }
    }

    pub fn to_string_value(&self) -> Result<String> {
        match self {
            Value::Bytes(_) => Err(self.mismatch("string")),
            other => Ok(other.to_string()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(other.mismatch("bytes")),
        }
    }
}

/// Floating point values render the way the JVM prints them, so `1.0` stays
/// `"1.0"` rather than `"1"` when read back as a string.
fn fmt_floating<T>(f: &mut fmt::Formatter<'_>, v: T, integral: bool) -> fmt::Result
where
    T: fmt::Display,
{
    if integral {
        write!(f, "{v:.1}")
    } else {
        write!(f, "{v}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => {
                fmt_floating(f, v, v.is_finite() && v.fract() == 0.0 && v.abs() < 1e7)
            }
            Value::Double(v) => {
                fmt_floating(f, v, v.is_finite() && v.fract() == 0.0 && v.abs() < 1e7)
            }
            Value::String(v) => f.write_str(v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Boolean,
    i8 => Byte,
    i16 => Short,
    char => Char,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

const RESERVED_WORDS: &[&str] = &[
    "NULL", "TRUE", "FALSE", "NOT", "AND", "OR", "BETWEEN", "LIKE", "IN", "IS", "ESCAPE",
];

/// Whether `name` can appear as an identifier in a selector.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_' || first == '$') {
        return false;
    }
    if !chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
        return false;
    }
    !RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(name))
}

/// Who is allowed to set a property under a reserved prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOwner {
    Client,
    Provider,
}

/// Known `JMSX` properties and who sets them.
pub const JMSX_PROPERTIES: &[(&str, PropertyOwner)] = &[
    ("JMSXUserID", PropertyOwner::Provider),
    ("JMSXAppID", PropertyOwner::Provider),
    ("JMSXDeliveryCount", PropertyOwner::Provider),
    ("JMSXGroupID", PropertyOwner::Client),
    ("JMSXGroupSeq", PropertyOwner::Client),
    ("JMSXProducerTXID", PropertyOwner::Provider),
    ("JMSXConsumerTXID", PropertyOwner::Provider),
    ("JMSXRcvTimestamp", PropertyOwner::Provider),
    ("JMSXState", PropertyOwner::Provider),
];

/// Name-prefix conventions: properties under these prefixes are reserved.
const RESERVED_PREFIXES: &[(&str, PropertyOwner)] =
    &[("JMSX", PropertyOwner::Provider), ("JMS_", PropertyOwner::Provider)];

pub const DELIVERY_COUNT_PROPERTY: &str = "JMSXDeliveryCount";

/// Looks up who owns a property name. Unreserved names belong to the client.
pub fn property_owner(name: &str) -> PropertyOwner {
    if let Some((_, owner)) = JMSX_PROPERTIES.iter().find(|(n, _)| *n == name) {
        return *owner;
    }
    RESERVED_PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, owner)| *owner)
        .unwrap_or(PropertyOwner::Client)
}

/// Validates a property name supplied by application code.
pub(crate) fn validate_client_property_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(JmsError::InvalidPropertyName(name.to_string()));
    }
    if !is_valid_identifier(name) {
        return Err(JmsError::InvalidPropertyName(name.to_string()));
    }
    if property_owner(name) == PropertyOwner::Provider {
        return Err(JmsError::InvalidPropertyName(format!(
            "{name} is set by the provider"
        )));
    }
    Ok(())
}
