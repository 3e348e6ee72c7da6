use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
};

#[cfg(feature = "serialization")]
use serde::Serialize;

use crate::{
    commands::{
        buffer::{Buffer, BufferError},
        ParseParticleError, ParticleType,
    },
    msgpack::{self, decoder, encoder, MsgpackError},
};

/// Container for floating point bin values.
///
/// Wraps the raw bit pattern so that values are hashable and comparable;
/// all NaNs are collapsed into a single representation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub struct FloatValue(u64);

impl FloatValue {
    #[must_use]
    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub(crate) const fn bits(self) -> u64 {
        self.0
    }

    pub(crate) const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl From<f64> for FloatValue {
    fn from(val: f64) -> Self {
        let val = if val.is_nan() { f64::NAN } else { val };
        Self(val.to_bits())
    }
}

impl From<f32> for FloatValue {
    fn from(val: f32) -> Self {
        f64::from(val).into()
    }
}

impl fmt::Display for FloatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// Container for bin values stored in a record.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub enum Value {
    /// Empty value. Writing `Nil` to an existing bin removes the bin.
    Nil,

    /// Boolean value.
    Bool(bool),

    /// Integer value. All integers are stored as signed 64-bit numerics on
    /// the server.
    Int(i64),

    /// Unsigned integer value. Record bins only hold values up to
    /// `i64::MAX`; larger values are valid inside lists and maps only.
    Uint(u64),

    /// Floating point value, stored in 64-bit IEEE-754 format.
    Float(FloatValue),

    /// String value.
    String(String),

    /// Byte array value.
    Blob(Vec<u8>),

    /// Ordered collection of values of any supported type. List order is
    /// maintained on writes and reads.
    List(Vec<Value>),

    /// Collection of key-value pairs. Keys and values can be any supported
    /// type; each key appears at most once.
    HashMap(HashMap<Value, Value>),

    /// GeoJSON-formatted string encoding geospatial information.
    GeoJson(String),
}

#[allow(clippy::derived_hash_with_manual_eq)]
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Nil => Option::<u8>::None.hash(state),
            Self::Bool(val) => val.hash(state),
            Self::Int(val) => val.hash(state),
            Self::Uint(val) => val.hash(state),
            Self::Float(val) => val.hash(state),
            Self::String(val) | Self::GeoJson(val) => val.hash(state),
            Self::Blob(val) => val.hash(state),
            Self::List(val) => val.hash(state),
            Self::HashMap(_) => panic!("maps cannot be used as map keys"),
        }
    }
}

impl Value {
    /// Returns true if this value is the empty value (nil).
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(*self, Self::Nil)
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(val) => Some(*val),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(val) => Some(val),
            _ => None,
        }
    }

    /// The particle type tag used for this value on the wire.
    pub(crate) fn particle_type(&self) -> ParticleType {
        match self {
            Self::Nil => ParticleType::Null,
            Self::Bool(_) => ParticleType::Bool,
            Self::Int(_) => ParticleType::Integer,
            Self::Uint(_) => panic!(
                "the server does not store u64 bin values natively; cast to i64 to store and \
                 retrieve them"
            ),
            Self::Float(_) => ParticleType::Float,
            Self::String(_) => ParticleType::String,
            Self::Blob(_) => ParticleType::Blob,
            Self::List(_) => ParticleType::List,
            Self::HashMap(_) => ParticleType::Map,
            Self::GeoJson(_) => ParticleType::GeoJson,
        }
    }

    /// Size in bytes of the wire representation of this value.
    pub(crate) fn estimate_size(&self) -> usize {
        match self {
            Self::Nil => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 8,
            Self::Uint(_) => panic!(
                "the server does not store u64 bin values natively; cast to i64 to store and \
                 retrieve them"
            ),
            Self::String(s) => s.len(),
            Self::Blob(b) => b.len(),
            Self::List(_) | Self::HashMap(_) => encoder::pack_value(&mut msgpack::Sink, self),
            Self::GeoJson(s) => 1 + 2 + s.len(), // flags + ncells + json
        }
    }

    /// Serialize the value into the given sink, returning the written size.
    pub(crate) fn write_to(&self, w: &mut impl msgpack::Write) -> usize {
        match self {
            Self::Nil => 0,
            Self::Bool(val) => w.write_bool(*val),
            Self::Int(val) => w.write_i64(*val),
            Self::Uint(_) => panic!(
                "the server does not store u64 bin values natively; cast to i64 to store and \
                 retrieve them"
            ),
            Self::Float(val) => w.write_u64(val.bits()),
            Self::String(val) => w.write_str(val),
            Self::Blob(val) => w.write_bytes(val),
            Self::List(_) | Self::HashMap(_) => encoder::pack_value(w, self),
            Self::GeoJson(val) => w.write_geo(val),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("<null>"),
            Self::Bool(val) => val.fmt(f),
            Self::Int(val) => val.fmt(f),
            Self::Uint(val) => val.fmt(f),
            Self::Float(val) => val.fmt(f),
            Self::String(val) | Self::GeoJson(val) => val.fmt(f),
            Self::Blob(val) => write!(f, "{val:?}"),
            Self::List(val) => write!(f, "{val:?}"),
            Self::HashMap(val) => write!(f, "{val:?}"),
        }
    }
}

impl From<String> for Value {
    fn from(val: String) -> Self {
        Self::String(val)
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Self::String(val.to_owned())
    }
}

impl From<&String> for Value {
    fn from(val: &String) -> Self {
        Self::String(val.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(val: Vec<u8>) -> Self {
        Self::Blob(val)
    }
}

impl From<&[u8]> for Value {
    fn from(val: &[u8]) -> Self {
        Self::Blob(val.to_vec())
    }
}

impl From<Vec<Self>> for Value {
    fn from(val: Vec<Self>) -> Self {
        Self::List(val)
    }
}

impl From<HashMap<Self, Self>> for Value {
    fn from(val: HashMap<Self, Self>) -> Self {
        Self::HashMap(val)
    }
}

impl From<f32> for Value {
    fn from(val: f32) -> Self {
        Self::Float(val.into())
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Self::Float(val.into())
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<u64> for Value {
    fn from(val: u64) -> Self {
        Self::Uint(val)
    }
}

impl From<usize> for Value {
    fn from(val: usize) -> Self {
        Self::Uint(val as u64)
    }
}

impl From<isize> for Value {
    fn from(val: isize) -> Self {
        Self::Int(val as i64)
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(val: $ty) -> Self {
                Self::Int(val.into())
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

#[derive(Debug, thiserror::Error)]
pub enum ParticleError {
    #[error("particle type not recognized")]
    UnrecognizedParticle(#[from] ParseParticleError),
    #[error("particle type `{0}` not supported in this position")]
    Unsupported(u8),
    #[error("buffer error")]
    Buffer(#[from] BufferError),
    #[error("MessagePack error")]
    Msgpack(#[from] MsgpackError),
}

pub(crate) fn bytes_to_particle(
    ptype: u8,
    buf: &mut Buffer,
    len: usize,
) -> Result<Value, ParticleError> {
    match ParticleType::try_from(ptype)? {
        ParticleType::Null => Ok(Value::Nil),
        ParticleType::Integer => Ok(Value::Int(buf.read_i64())),
        ParticleType::Bool => Ok(Value::Bool(buf.read_u8() != 0)),
        ParticleType::Float => Ok(Value::Float(FloatValue::from_bits(buf.read_u64()))),
        ParticleType::String => Ok(Value::String(buf.read_str(len)?)),
        ParticleType::GeoJson => {
            buf.skip(1);
            let ncells = buf.read_u16() as usize;
            let header_size = ncells * 8;

            buf.skip(header_size);
            let val = buf.read_str(len - header_size - 3)?;
            Ok(Value::GeoJson(val))
        }
        ParticleType::Blob => Ok(Value::Blob(buf.read_blob(len))),
        ParticleType::List => Ok(decoder::unpack_value_list(buf)?),
        ParticleType::Map => Ok(decoder::unpack_value_map(buf)?),
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn display() {
        assert_eq!(Value::Nil.to_string(), "<null>");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::from(4.1416).to_string(), "4.1416");
        assert_eq!(
            Value::Uint(9_223_372_036_854_775_808).to_string(),
            "9223372036854775808"
        );
    }

    #[test]
    fn nan_values_collapse() {
        assert_eq!(Value::from(f64::NAN), Value::from(-f64::NAN));
    }

    #[test]
    fn float_survives_bit_round_trip() {
        let value = Value::from(1.64f64);
        match value {
            Value::Float(float) => assert_eq!(float.value(), 1.64f64),
            _ => unreachable!(),
        }
    }
}
