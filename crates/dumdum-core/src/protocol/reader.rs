//! Cursor over received bytes.
//!
//! Reads never block. A short read is reported as
//! [`ReadError::Incomplete`], which callers treat as "wait for more bytes",
//! while [`ReadError::Fatal`] carries data that can never parse.

use super::varchar;
use crate::error::Error;

/// Why a read could not produce a value.
#[derive(Debug)]
pub enum ReadError {
    /// Not enough bytes buffered yet; retry once more arrive.
    Incomplete {
        /// Bytes the read needed.
        expected: usize,
        /// Bytes that were left.
        available: usize,
    },
    /// The data is corrupt or not allowed in the current state.
    Fatal(Error),
}

impl From<Error> for ReadError {
    fn from(e: Error) -> Self {
        ReadError::Fatal(e)
    }
}

/// Result of a read.
pub type ReadResult<T> = std::result::Result<T, ReadError>;

/// Read-only cursor over a byte slice.
///
/// The source is never modified; dropping the reader closes it.
#[derive(Debug)]
pub struct Reader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Read up to `n` bytes, fewer if the buffer ends first.
    pub fn read(&mut self, n: usize) -> &'a [u8] {
        let end = self.position.saturating_add(n).min(self.buffer.len());
        let data = &self.buffer[self.position..end];
        self.position = end;
        data
    }

    /// Read everything that is left.
    pub fn read_to_end(&mut self) -> &'a [u8] {
        self.read(self.remaining())
    }

    /// Read exactly `n` bytes or report how many were missing.
    ///
    /// A failed read still advances to the end of the buffer; callers
    /// discard the reader in that case.
    pub fn read_exact(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        let data = self.read(n);
        if data.len() != n {
            return Err(ReadError::Incomplete {
                expected: n,
                available: data.len(),
            });
        }
        Ok(data)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.read_exact(1)?[0])
    }

    /// Read a byte and interpret any non-zero value as true.
    pub fn read_bool(&mut self) -> ReadResult<bool> {
        Ok(self.read_u8()? > 0)
    }

    /// Read a big-endian unsigned integer `width` bytes wide (at most 8).
    pub fn read_uint(&mut self, width: usize) -> ReadResult<u64> {
        if width > 8 {
            return Err(Error::InvalidArgument(format!("integer width {} exceeds 8 bytes", width)).into());
        }
        let bytes = self.read_exact(width)?;
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Read an 8-byte big-endian integer.
    pub fn read_u64(&mut self) -> ReadResult<u64> {
        let bytes = self.read_exact(8)?;
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(array))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_varchar(&mut self, max_length: usize) -> ReadResult<String> {
        varchar::load(self, max_length)
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Whether every byte has been read.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Run `f` over the front of a growable buffer.
///
/// If `f` succeeds, the bytes it consumed are removed from the front of
/// `buffer` (commit). If it fails for any reason, `buffer` is left exactly
/// as it was (rollback), so a partially received message can be parsed
/// again from the same point once more bytes arrive.
pub fn read_transaction<T, F>(buffer: &mut Vec<u8>, f: F) -> ReadResult<T>
where
    F: FnOnce(&mut Reader<'_>) -> ReadResult<T>,
{
    let (value, consumed) = {
        let mut reader = Reader::new(buffer);
        let value = f(&mut reader)?;
        (value, reader.position())
    };
    buffer.drain(..consumed);
    Ok(value)
}
