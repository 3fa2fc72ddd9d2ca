//! Binary serialization contract for index keys and values.
//!
//! Every type stored inside an index page implements [`Serializer`]: the
//! scalar key types below, the document value type, and the index pages
//! themselves. Fixed-size formats declare their exact length so storage
//! layouts can be computed up front, and reject any buffer of a different
//! length instead of guessing.

use crate::error::{Error, Result};

/// A value that can encode itself to bytes and decode itself back.
///
/// The contract is exact: `deserialize(&x.serialize()) == x` for every
/// valid `x`, and a `Some(n)` in [`FIXED_SIZE`](Serializer::FIXED_SIZE)
/// promises that `serialize` always produces exactly `n` bytes.
pub trait Serializer: Sized {
    /// Exact encoded length for fixed-size formats, `None` when variable.
    const FIXED_SIZE: Option<usize>;

    /// Encodes the value to bytes.
    fn serialize(&self) -> Vec<u8>;

    /// Decodes a value from bytes.
    ///
    /// # Errors
    ///
    /// Fixed-size implementations fail with [`Error::InvalidArgument`]
    /// naming the offending length when the buffer does not match
    /// [`FIXED_SIZE`](Serializer::FIXED_SIZE); corrupt variable-size
    /// payloads fail with [`Error::InvalidFormat`].
    fn deserialize(data: &[u8]) -> Result<Self>;
}

fn check_fixed(kind: &str, expected: usize, data: &[u8]) -> Result<()> {
    if data.len() != expected {
        return Err(Error::invalid_argument(format!(
            "{} expects {} bytes, got {}",
            kind,
            expected,
            data.len()
        )));
    }
    Ok(())
}

impl Serializer for u32 {
    const FIXED_SIZE: Option<usize> = Some(4);

    fn serialize(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        check_fixed("u32", 4, data)?;
        Ok(u32::from_le_bytes(data.try_into().unwrap()))
    }
}

impl Serializer for u64 {
    const FIXED_SIZE: Option<usize> = Some(8);

    fn serialize(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        check_fixed("u64", 8, data)?;
        Ok(u64::from_le_bytes(data.try_into().unwrap()))
    }
}

impl Serializer for i64 {
    const FIXED_SIZE: Option<usize> = Some(8);

    fn serialize(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        check_fixed("i64", 8, data)?;
        Ok(i64::from_le_bytes(data.try_into().unwrap()))
    }
}

impl Serializer for f64 {
    const FIXED_SIZE: Option<usize> = Some(8);

    fn serialize(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        check_fixed("f64", 8, data)?;
        Ok(f64::from_le_bytes(data.try_into().unwrap()))
    }
}

impl Serializer for String {
    const FIXED_SIZE: Option<usize> = None;

    fn serialize(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        match std::str::from_utf8(data) {
            Ok(s) => Ok(s.to_owned()),
            Err(e) => Err(Error::invalid_format(format!("invalid UTF-8 string: {}", e))),
        }
    }
}

impl Serializer for Vec<u8> {
    const FIXED_SIZE: Option<usize> = None;

    fn serialize(&self) -> Vec<u8> {
        self.clone()
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(data.to_vec())
    }
}

/// Bounds-checked sequential reader over a byte slice.
///
/// Decoders use this instead of direct indexing so corrupt input yields
/// an [`Error::InvalidFormat`] with the failing offset rather than a panic.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::invalid_format(format!(
                "unexpected end of input: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reads a NUL-terminated UTF-8 string, consuming the terminator.
    pub(crate) fn read_cstr(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::invalid_format(format!("unterminated string at offset {}", self.pos))
        })?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|e| Error::invalid_format(format!("invalid UTF-8 string: {}", e)))?;
        self.pos += nul + 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trips() {
        assert_eq!(u32::deserialize(&7u32.serialize()).unwrap(), 7);
        assert_eq!(u64::deserialize(&u64::MAX.serialize()).unwrap(), u64::MAX);
        assert_eq!(i64::deserialize(&(-99i64).serialize()).unwrap(), -99);
        assert_eq!(f64::deserialize(&1.5f64.serialize()).unwrap(), 1.5);
    }

    #[test]
    fn test_fixed_size_rejects_wrong_length() {
        let result = u64::deserialize(&[1, 2, 3]);
        match result {
            Err(Error::InvalidArgument(msg)) => {
                assert!(msg.contains("8 bytes"));
                assert!(msg.contains("got 3"));
            }
            other => panic!("expected InvalidArgument, got {:?}", other),
        }

        assert!(u32::deserialize(&[0; 8]).is_err());
    }

    #[test]
    fn test_string_round_trip() {
        let s = "héllo".to_string();
        assert_eq!(String::FIXED_SIZE, None);
        assert_eq!(String::deserialize(&s.serialize()).unwrap(), s);
    }

    #[test]
    fn test_string_rejects_bad_utf8() {
        let result = String::deserialize(&[0xff, 0xfe]);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_byte_reader_bounds() {
        let mut reader = ByteReader::new(&[1, 0, 2]);
        assert_eq!(reader.read_u16().unwrap(), 1);
        assert_eq!(reader.remaining(), 1);

        let result = reader.read_u32();
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_byte_reader_cstr() {
        let mut reader = ByteReader::new(b"name\0rest");
        assert_eq!(reader.read_cstr().unwrap(), "name");
        assert_eq!(reader.position(), 5);

        let mut reader = ByteReader::new(b"never ends");
        assert!(matches!(reader.read_cstr(), Err(Error::InvalidFormat(_))));
    }
}
