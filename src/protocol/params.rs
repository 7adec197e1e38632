//! Binary-protocol value decoding
//!
//! Decodes the typed values carried by COM_STMT_EXECUTE parameters and by binary result-set
//! rows. Both share the same per-type encodings:
//!
//! - integers: 1/2/4/8 bytes little-endian, signedness from the unsigned flag
//! - FLOAT / DOUBLE: IEEE-754 single / double
//! - DATE / DATETIME / TIMESTAMP: length byte 0, 4, 7 or 11 followed by the fields
//! - TIME: length byte 0, 8 or 12; a sign byte leads the fields
//! - string and decimal families: length-encoded text
//! - blob family: length-encoded raw bytes

use super::codec::Reader;
use super::flags::{PARAM_UNSIGNED, field_type as ft};
use crate::{ReplayError, Result, Value};

/// Decode one binary-protocol value of the given field type.
pub fn decode_binary_value(r: &mut Reader<'_>, field_type: u8, unsigned: bool) -> Result<Value> {
    let value = match field_type {
        ft::NULL => Value::Null,
        ft::TINY => {
            let v = r.u8()?;
            if unsigned { Value::UInt(v as u64) } else { Value::Int(v as i8 as i64) }
        }
        ft::SHORT | ft::YEAR => {
            let v = r.u16_le()?;
            if unsigned { Value::UInt(v as u64) } else { Value::Int(v as i16 as i64) }
        }
        ft::INT24 | ft::LONG => {
            let v = r.u32_le()?;
            if unsigned { Value::UInt(v as u64) } else { Value::Int(v as i32 as i64) }
        }
        ft::LONGLONG => {
            let v = r.u64_le()?;
            if unsigned { Value::UInt(v) } else { Value::Int(v as i64) }
        }
        ft::FLOAT => Value::Float(f32::from_bits(r.u32_le()?)),
        ft::DOUBLE => Value::Double(f64::from_bits(r.u64_le()?)),
        ft::DATE | ft::NEWDATE | ft::TIMESTAMP | ft::DATETIME => Value::Text(decode_datetime(r)?),
        ft::TIME => Value::Text(decode_time(r)?),
        ft::NEWDECIMAL
        | ft::DECIMAL
        | ft::VARCHAR
        | ft::VAR_STRING
        | ft::STRING
        | ft::ENUM
        | ft::SET
        | ft::GEOMETRY
        | ft::BIT
        | ft::JSON => match r.lenenc_bytes()? {
            Some(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
            None => Value::Null,
        },
        ft::BLOB | ft::TINY_BLOB | ft::MEDIUM_BLOB | ft::LONG_BLOB => match r.lenenc_bytes()? {
            Some(b) => Value::Bytes(b.to_vec()),
            None => Value::Null,
        },
        other => {
            return Err(ReplayError::decode(
                "Binary value",
                format!("unknown field type 0x{:02x}", other),
            ));
        }
    };
    Ok(value)
}

fn decode_date(r: &mut Reader<'_>) -> Result<String> {
    let year = r.u16_le()?;
    let month = r.u8()?;
    let day = r.u8()?;
    Ok(format!("{:04}-{:02}-{:02}", year, month, day))
}

fn decode_clock(r: &mut Reader<'_>) -> Result<String> {
    let hour = r.u8()?;
    let minute = r.u8()?;
    let second = r.u8()?;
    Ok(format!("{:02}:{:02}:{:02}", hour, minute, second))
}

/// DATE, DATETIME and TIMESTAMP values.
fn decode_datetime(r: &mut Reader<'_>) -> Result<String> {
    match r.u8()? {
        0 => Ok("0000-00-00 00:00:00".to_string()),
        4 => decode_date(r),
        7 => Ok(format!("{} {}", decode_date(r)?, decode_clock(r)?)),
        11 => {
            let date = decode_date(r)?;
            let clock = decode_clock(r)?;
            let micros = r.u32_le()?;
            Ok(format!("{} {}.{:06}", date, clock, micros))
        }
        len => Err(ReplayError::decode("Binary datetime", format!("invalid length {}", len))),
    }
}

/// TIME values: `[-]D HH:MM:SS[.ffffff]`.
fn decode_time(r: &mut Reader<'_>) -> Result<String> {
    let len = r.u8()?;
    if len == 0 {
        return Ok("0 00:00:00".to_string());
    }
    if len != 8 && len != 12 {
        return Err(ReplayError::decode("Binary time", format!("invalid length {}", len)));
    }
    let sign = match r.u8()? {
        0 => "",
        1 => "-",
        other => {
            return Err(ReplayError::decode("Binary time", format!("invalid sign byte {}", other)));
        }
    };
    let days = r.u32_le()?;
    let clock = decode_clock(r)?;
    if len == 12 {
        let micros = r.u32_le()?;
        Ok(format!("{}{} {}.{:06}", sign, days, clock, micros))
    } else {
        Ok(format!("{}{} {}", sign, days, clock))
    }
}

/// Decode `num_params` execute parameters.
///
/// `param_types` holds two bytes per parameter: the field type and a companion flag byte
/// whose high bit marks unsigned integers. A bit set in `null_bitmap` yields
/// [`Value::Null`] without consuming value bytes. Any short or malformed buffer aborts the
/// whole decode.
pub fn decode_execute_params(
    num_params: usize,
    null_bitmap: &[u8],
    param_types: &[u8],
    param_values: &[u8],
) -> Result<Vec<Value>> {
    let mut params = Vec::with_capacity(num_params);
    let mut r = Reader::new(param_values);
    for i in 0..num_params {
        let null_byte = null_bitmap.get(i >> 3).ok_or_else(|| {
            ReplayError::decode("Execute parameters", "malformed null-bitmap")
        })?;
        if null_byte & (1 << (i % 8)) != 0 {
            params.push(Value::Null);
            continue;
        }
        let (Some(&tp), Some(&flag)) = (param_types.get(i << 1), param_types.get((i << 1) + 1))
        else {
            return Err(ReplayError::decode("Execute parameters", "malformed types"));
        };
        let value = decode_binary_value(&mut r, tp, flag & PARAM_UNSIGNED != 0).map_err(|e| {
            ReplayError::decode("Execute parameters", format!("parameter {}: {}", i, e))
        })?;
        params.push(value);
    }
    Ok(params)
}
