use std::collections::HashMap;

use tracing::warn;

use super::{Marker, MsgpackError, Result};
use crate::{
    commands::{buffer::Buffer, ParticleType},
    value::Value,
};

pub(crate) fn unpack_value_list(buf: &mut Buffer) -> Result<Value> {
    if buf.is_empty() {
        return Ok(Value::List(Vec::new()));
    }

    let value = unpack_value(buf)?;
    debug_assert!(matches!(value, Value::List(_)));

    Ok(value)
}

pub(crate) fn unpack_value_map(buf: &mut Buffer) -> Result<Value> {
    if buf.is_empty() {
        return Ok(Value::from(HashMap::new()));
    }

    let value = unpack_value(buf)?;
    debug_assert!(matches!(value, Value::HashMap(_)));

    Ok(value)
}

fn unpack_array(buf: &mut Buffer, mut count: usize) -> Result<Value> {
    // An ordered collection announces itself with a leading extension
    // element, which carries no data the client needs.
    if count > 0 && is_ext(buf.peek().unwrap_or_default().into()) {
        unpack_value(buf)?;
        count -= 1;
    }

    let mut list = Vec::with_capacity(count);
    for _ in 0..count {
        list.push(unpack_value(buf)?);
    }

    Ok(Value::from(list))
}

fn unpack_map(buf: &mut Buffer, mut count: usize) -> Result<Value> {
    if count > 0 && is_ext(buf.peek().unwrap_or_default().into()) {
        unpack_value(buf)?;
        unpack_value(buf)?;
        count -= 1;
    }

    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = unpack_value(buf)?;
        let val = unpack_value(buf)?;
        map.insert(key, val);
    }

    Ok(Value::from(map))
}

fn unpack_blob(buf: &mut Buffer, count: usize) -> Result<Value> {
    let vtype = buf.read_u8();
    let count = count - 1;

    match ParticleType::try_from(vtype)? {
        ParticleType::String => Ok(Value::String(buf.read_str(count)?)),
        ParticleType::Blob => Ok(Value::Blob(buf.read_blob(count))),
        ParticleType::GeoJson => Ok(Value::GeoJson(buf.read_str(count)?)),
        _ => Err(MsgpackError::UnrecognizedCode(vtype)),
    }
}

fn unpack_value(buf: &mut Buffer) -> Result<Value> {
    let marker = Marker::from(buf.read_u8());

    match marker {
        Marker::Pfix(value) => Ok(Value::from(value)),
        Marker::FixMap(len) => unpack_map(buf, len as usize),
        Marker::FixArray(len) => unpack_array(buf, len as usize),
        Marker::FixStr(len) => unpack_blob(buf, len as usize),
        Marker::Nil => Ok(Value::Nil),
        Marker::Reserved => {
            warn!("skipping over reserved type marker");
            Ok(Value::Nil)
        }
        Marker::False => Ok(Value::from(false)),
        Marker::True => Ok(Value::from(true)),
        Marker::Bin8 | Marker::Str8 => {
            let count = buf.read_u8();
            unpack_blob(buf, count as usize)
        }
        Marker::Bin16 | Marker::Str16 => {
            let count = buf.read_u16();
            unpack_blob(buf, count as usize)
        }
        Marker::Bin32 | Marker::Str32 => {
            let count = buf.read_u32();
            unpack_blob(buf, count as usize)
        }
        Marker::Ext8 => {
            let count = 1 + buf.read_u8() as usize;
            buf.skip(count);
            Ok(Value::Nil)
        }
        Marker::Ext16 => {
            let count = 1 + buf.read_u16() as usize;
            buf.skip(count);
            Ok(Value::Nil)
        }
        Marker::Ext32 => {
            let count = 1 + buf.read_u32() as usize;
            buf.skip(count);
            Ok(Value::Nil)
        }
        Marker::F32 => Ok(Value::from(f32::from_bits(buf.read_u32()))),
        Marker::F64 => Ok(Value::from(f64::from_bits(buf.read_u64()))),
        Marker::U8 => Ok(Value::from(buf.read_u8())),
        Marker::U16 => Ok(Value::from(buf.read_u16())),
        Marker::U32 => Ok(Value::from(buf.read_u32())),
        Marker::U64 => Ok(Value::from(buf.read_u64())),
        Marker::I8 => Ok(Value::from(buf.read_i8())),
        Marker::I16 => Ok(Value::from(buf.read_i16())),
        Marker::I32 => Ok(Value::from(buf.read_i32())),
        Marker::I64 => Ok(Value::from(buf.read_i64())),
        Marker::FixExt1 => {
            buf.skip(2);
            Ok(Value::Nil)
        }
        Marker::FixExt2 => {
            buf.skip(3);
            Ok(Value::Nil)
        }
        Marker::FixExt4 => {
            buf.skip(5);
            Ok(Value::Nil)
        }
        Marker::FixExt8 => {
            buf.skip(9);
            Ok(Value::Nil)
        }
        Marker::FixExt16 => {
            buf.skip(17);
            Ok(Value::Nil)
        }
        Marker::Array16 => {
            let count = buf.read_u16();
            unpack_array(buf, count as usize)
        }
        Marker::Array32 => {
            let count = buf.read_u32();
            unpack_array(buf, count as usize)
        }
        Marker::Map16 => {
            let count = buf.read_u16();
            unpack_map(buf, count as usize)
        }
        Marker::Map32 => {
            let count = buf.read_u32();
            unpack_map(buf, count as usize)
        }
        Marker::Nfix(value) => Ok(Value::from(value)),
    }
}

const fn is_ext(marker: Marker) -> bool {
    matches!(
        marker,
        Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32
            | Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
    )
}
