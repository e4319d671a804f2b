//! Length-prefixed UTF-8 strings.
//!
//! The length prefix is big-endian and exactly as wide as needed to hold
//! `max_length`: 255 fits in one byte, 256..=65535 in two, and so on.

use super::reader::{ReadError, ReadResult, Reader};
use crate::error::{Error, Result};

/// Width in bytes of the length prefix for a field bounded by `max_length`.
pub fn length_field_width(max_length: usize) -> usize {
    let bits = usize::BITS - max_length.leading_zeros();
    bits.div_ceil(8) as usize
}

/// Largest value a length prefix of `width` bytes can carry.
pub fn max_value_for_width(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

/// Append `value` big-endian in exactly `width` bytes.
pub(crate) fn write_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width.min(8)..]);
}

/// Encode `text` with its length prefix.
pub fn dumps(text: &str, max_length: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(length_field_width(max_length) + text.len());
    write_into(&mut out, text, max_length)?;
    Ok(out)
}

/// Encode `text` with its length prefix onto the end of `out`.
pub fn write_into(out: &mut Vec<u8>, text: &str, max_length: usize) -> Result<()> {
    let bytes = text.as_bytes();
    if bytes.len() > max_length {
        return Err(Error::InvalidLength {
            length: bytes.len(),
            max_length,
        });
    }
    write_uint(out, bytes.len() as u64, length_field_width(max_length));
    out.extend_from_slice(bytes);
    Ok(())
}

/// Decode one varchar from `reader`.
///
/// Short input is [`ReadError::Incomplete`]; a declared length above
/// `max_length` or invalid UTF-8 is fatal.
pub fn load(reader: &mut Reader<'_>, max_length: usize) -> ReadResult<String> {
    let width = length_field_width(max_length);
    let declared = reader.read_uint(width)?;

    let length = match usize::try_from(declared) {
        Ok(length) if length <= max_length => length,
        _ => {
            return Err(ReadError::Fatal(Error::InvalidLength {
                length: usize::try_from(declared).unwrap_or(usize::MAX),
                max_length,
            }))
        }
    };

    let data = reader.read_exact(length)?;
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::MalformedData(format!("invalid utf-8 in varchar: {}", e)))?;
    Ok(text.to_owned())
}

/// Decode one varchar from the start of `data`, ignoring trailing bytes.
pub fn loads(data: &[u8], max_length: usize) -> ReadResult<String> {
    load(&mut Reader::new(data), max_length)
}
