//! Binary decoders for the wire format
//!
//! Stateless, bounds-checked decoders for the primitive encodings used throughout the
//! protocol: fixed-width little-endian integers, length-encoded integers and strings, and
//! NUL-terminated strings. [`Reader`] threads a cursor through the same decoders so that
//! packet parsers read fields in order and fail with a [`ReplayError::Decode`] on the first
//! short read.
//!
//! ## Length-encoded integers
//!
//! | First byte | Meaning                       | Width |
//! |------------|-------------------------------|-------|
//! | `< 0xfb`   | value of the byte             | 1     |
//! | `0xfb`     | NULL (text rows only)         | 1     |
//! | `0xfc`     | 2-byte little-endian value    | 3     |
//! | `0xfd`     | 3-byte little-endian value    | 4     |
//! | `0xfe`     | 8-byte little-endian value    | 9     |
//! | `0xff`     | undefined                     | -     |

use crate::{ReplayError, Result};

/// Decode a little-endian `u16` at `offset`.
pub fn parse_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = fixed::<2>(data, offset, "u16")?;
    Ok(u16::from_le_bytes(bytes))
}

/// Decode a little-endian 3-byte unsigned integer at `offset`.
pub fn parse_u24_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = fixed::<3>(data, offset, "u24")?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
}

/// Decode a little-endian `u32` at `offset`.
pub fn parse_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = fixed::<4>(data, offset, "u32")?;
    Ok(u32::from_le_bytes(bytes))
}

/// Decode a little-endian `u64` at `offset`.
pub fn parse_u64_le(data: &[u8], offset: usize) -> Result<u64> {
    let bytes = fixed::<8>(data, offset, "u64")?;
    Ok(u64::from_le_bytes(bytes))
}

fn fixed<const N: usize>(data: &[u8], offset: usize, what: &str) -> Result<[u8; N]> {
    data.get(offset..offset.saturating_add(N))
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or_else(|| {
            ReplayError::decode(
                "Integer parsing",
                format!(
                    "Insufficient data for {} at offset {} (need {} bytes, have {})",
                    what,
                    offset,
                    N,
                    data.len().saturating_sub(offset)
                ),
            )
        })
}

/// Decode a length-encoded integer from the start of `data`.
///
/// Returns the value (`None` for the NULL marker) and the number of bytes consumed.
pub fn parse_lenenc_int(data: &[u8]) -> Result<(Option<u64>, usize)> {
    let first = *data.first().ok_or_else(|| {
        ReplayError::decode("Length-encoded integer", "Empty buffer")
    })?;
    match first {
        0x00..=0xfa => Ok((Some(first as u64), 1)),
        0xfb => Ok((None, 1)),
        0xfc => Ok((Some(parse_u16_le(data, 1)? as u64), 3)),
        0xfd => Ok((Some(parse_u24_le(data, 1)? as u64), 4)),
        0xfe => Ok((Some(parse_u64_le(data, 1)?), 9)),
        0xff => Err(ReplayError::decode("Length-encoded integer", "Undefined prefix byte 0xff")),
    }
}

/// Decode a length-encoded byte string from the start of `data`.
///
/// Returns the bytes (`None` for the NULL marker) and the number of bytes consumed.
pub fn parse_lenenc_bytes(data: &[u8]) -> Result<(Option<&[u8]>, usize)> {
    let (len, n) = parse_lenenc_int(data)?;
    let Some(len) = len else {
        return Ok((None, n));
    };
    let len = usize::try_from(len).map_err(|_| {
        ReplayError::decode("Length-encoded string", format!("Length {} overflows usize", len))
    })?;
    let end = n.checked_add(len).filter(|&end| end <= data.len()).ok_or_else(|| {
        ReplayError::decode(
            "Length-encoded string",
            format!("Declared length {} exceeds remaining {} bytes", len, data.len() - n),
        )
    })?;
    Ok((Some(&data[n..end]), end))
}

/// Split `data` at the first NUL byte, returning the bytes before it.
///
/// Returns the string and the number of bytes consumed including the terminator.
pub fn parse_nul_terminated(data: &[u8]) -> Result<(&[u8], usize)> {
    let nul = data.iter().position(|&b| b == 0).ok_or_else(|| {
        ReplayError::decode("NUL-terminated string", "Missing terminator")
    })?;
    Ok((&data[..nul], nul + 1))
}

/// Sequential reader over one logical packet body.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unread bytes, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn u8(&mut self) -> Result<u8> {
        let b = self.peek().ok_or_else(|| {
            ReplayError::decode("Integer parsing", format!("Insufficient data for u8 at offset {}", self.pos))
        })?;
        self.pos += 1;
        Ok(b)
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        let v = parse_u16_le(self.data, self.pos)?;
        self.pos += 2;
        Ok(v)
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let v = parse_u32_le(self.data, self.pos)?;
        self.pos += 4;
        Ok(v)
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        let v = parse_u64_le(self.data, self.pos)?;
        self.pos += 8;
        Ok(v)
    }

    /// Read exactly `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ReplayError::decode(
                "Fixed-length bytes",
                format!("Need {} bytes at offset {}, have {}", n, self.pos, self.remaining()),
            ));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn nul_terminated(&mut self) -> Result<&'a [u8]> {
        let (s, n) = parse_nul_terminated(self.rest())?;
        self.pos += n;
        Ok(s)
    }

    pub fn lenenc_int(&mut self) -> Result<Option<u64>> {
        let (v, n) = parse_lenenc_int(self.rest())?;
        self.pos += n;
        Ok(v)
    }

    pub fn lenenc_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        let (v, n) = parse_lenenc_bytes(self.rest())?;
        self.pos += n;
        Ok(v)
    }

    /// Read a length-encoded string as (lossy) UTF-8 text; NULL reads as empty.
    pub fn lenenc_string(&mut self) -> Result<String> {
        Ok(self.lenenc_bytes()?.map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default())
    }

    pub fn skip_lenenc(&mut self) -> Result<()> {
        self.lenenc_bytes().map(|_| ())
    }

    /// Remaining bytes as (lossy) UTF-8 text, consuming them.
    pub fn rest_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.rest()).into_owned();
        self.pos = self.data.len();
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::lenenc_int;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn lenenc_int_decodes_every_width(value in any::<u64>()) {
            let encoded = lenenc_int(value);
            let (decoded, n) = parse_lenenc_int(&encoded).unwrap();
            prop_assert_eq!(n, encoded.len());
            // 0xfb is the NULL marker; values of 251 take the 3-byte form
            prop_assert_eq!(decoded, Some(value));
        }

        #[test]
        fn reader_never_panics_on_arbitrary_input(data in prop::collection::vec(any::<u8>(), 0..64)) {
            let mut reader = Reader::new(&data);
            let _ = reader.lenenc_bytes();
            let _ = reader.u32_le();
            let _ = reader.nul_terminated();
            let _ = reader.u16_le();
            prop_assert!(reader.position() <= data.len());
        }
    }

    #[test]
    fn fixed_width_integers() {
        let data = [0x01, 0x00, 0x00, 0x00, 0xff, 0xff];
        assert_eq!(parse_u32_le(&data, 0).unwrap(), 1);
        assert_eq!(parse_u16_le(&data, 4).unwrap(), 0xffff);
        assert_eq!(parse_u24_le(&[0x01, 0x02, 0x03], 0).unwrap(), 0x030201);
        assert!(matches!(parse_u32_le(&data, 4), Err(ReplayError::Decode { .. })));
    }

    #[test]
    fn lenenc_int_prefixes() {
        assert_eq!(parse_lenenc_int(&[0xfa]).unwrap(), (Some(250), 1));
        assert_eq!(parse_lenenc_int(&[0xfb]).unwrap(), (None, 1));
        assert_eq!(parse_lenenc_int(&[0xfc, 0x34, 0x12]).unwrap(), (Some(0x1234), 3));
        assert_eq!(parse_lenenc_int(&[0xfd, 0x01, 0x02, 0x03]).unwrap(), (Some(0x030201), 4));
        assert!(parse_lenenc_int(&[0xfc, 0x01]).is_err());
        assert!(parse_lenenc_int(&[0xff]).is_err());
        assert!(parse_lenenc_int(&[]).is_err());
    }

    #[test]
    fn lenenc_bytes_checks_declared_length() {
        assert_eq!(parse_lenenc_bytes(&[3, b'a', b'b', b'c', 9]).unwrap(), (Some(&b"abc"[..]), 4));
        assert_eq!(parse_lenenc_bytes(&[0]).unwrap(), (Some(&b""[..]), 1));
        assert_eq!(parse_lenenc_bytes(&[0xfb]).unwrap(), (None, 1));
        assert!(parse_lenenc_bytes(&[5, b'a']).is_err());
    }

    #[test]
    fn nul_terminated_strings() {
        assert_eq!(parse_nul_terminated(b"root\0rest").unwrap(), (&b"root"[..], 5));
        assert!(parse_nul_terminated(b"root").is_err());
    }

    #[test]
    fn reader_sequences_fields() {
        let data = [0x07, 0x02, 0x00, b'h', b'i', 0x00, 0x02, b'o', b'k'];
        let mut r = Reader::new(&data);
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.u16_le().unwrap(), 2);
        assert_eq!(r.nul_terminated().unwrap(), b"hi");
        assert_eq!(r.lenenc_string().unwrap(), "ok");
        assert!(r.is_empty());
        assert!(r.u8().is_err());
    }
}
