//! Block header and file metadata codecs.
//!
//! Both structures have fixed layouts with little-endian integers. The
//! metadata block additionally carries a magic number and a crc32 checksum
//! so that opening a foreign or torn file fails loudly instead of
//! misinterpreting it.

use crate::block::{BlockId, BLOCK_HEADER_SIZE, FORMAT_VERSION, MAGIC_NUMBER, META_SIZE, NIL};
use crate::error::{Error, Result};

/// Flag bit: the block is allocated to a record chain.
const FLAG_IN_USE: u8 = 0b0000_0001;
/// Flag bit: the block is the first of its record chain.
const FLAG_HEAD: u8 = 0b0000_0010;

/// Per-block header, stored in the first 16 bytes of every data block.
///
/// Format:
/// ```text
/// [flags: 1 byte]
/// [padding: 3 bytes]
/// [next: 8 bytes]     // chain or free-list link, NIL when last
/// [used: 4 bytes]     // payload bytes used in this block
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// The block is allocated (part of a record chain).
    pub in_use: bool,
    /// The block is the first of its chain (the record locator points here).
    pub head: bool,
    /// Next block in the chain, or next free block when not in use.
    pub next: BlockId,
    /// Payload bytes used in this block.
    pub used: u32,
}

impl BlockHeader {
    /// Header for a block pushed onto the free list.
    pub fn free(next: BlockId) -> Self {
        Self { in_use: false, head: false, next, used: 0 }
    }

    /// Header for a freshly allocated, not yet chained block.
    pub fn allocated() -> Self {
        Self { in_use: true, head: false, next: NIL, used: 0 }
    }

    /// Encode the header to its 16-byte representation.
    pub fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut flags = 0u8;
        if self.in_use {
            flags |= FLAG_IN_USE;
        }
        if self.head {
            flags |= FLAG_HEAD;
        }

        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0] = flags;
        buf[4..12].copy_from_slice(&self.next.to_le_bytes());
        buf[12..16].copy_from_slice(&self.used.to_le_bytes());
        buf
    }

    /// Decode a header from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(Error::invalid_format(format!(
                "block header too short: expected {} bytes, got {}",
                BLOCK_HEADER_SIZE,
                data.len()
            )));
        }

        let flags = data[0];
        if flags & !(FLAG_IN_USE | FLAG_HEAD) != 0 {
            return Err(Error::invalid_format(format!("unknown block flags {:#x}", flags)));
        }

        let next = u64::from_le_bytes(data[4..12].try_into().unwrap());
        let used = u32::from_le_bytes(data[12..16].try_into().unwrap());

        Ok(Self {
            in_use: flags & FLAG_IN_USE != 0,
            head: flags & FLAG_HEAD != 0,
            next,
            used,
        })
    }
}

/// File metadata stored in block 0.
///
/// Format:
/// ```text
/// [magic: 8 bytes]
/// [format version: 2 bytes]
/// [padding: 2 bytes]
/// [block size: 4 bytes]
/// [block count: 8 bytes]
/// [free-list head: 8 bytes] // NIL when empty
/// [directory record: 8 bytes] // NIL when unset
/// [crc32: 4 bytes]          // over the preceding 40 bytes
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    /// Block size this file was created with.
    pub block_size: u32,
    /// Total number of blocks, including block 0.
    pub block_count: u64,
    /// Head of the free-list chain, NIL when no block is free.
    pub free_head: BlockId,
    /// Record holding the engine's collection directory, NIL when unset.
    pub directory: BlockId,
}

impl Meta {
    /// Metadata for a freshly created file: one block (the meta block
    /// itself), nothing free, no directory yet.
    pub fn new(block_size: u32) -> Self {
        Self { block_size, block_count: 1, free_head: NIL, directory: NIL }
    }

    /// Encode the metadata to its 44-byte representation.
    pub fn encode(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[0..8].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        buf[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.block_count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.free_head.to_le_bytes());
        buf[32..40].copy_from_slice(&self.directory.to_le_bytes());

        let crc = crc32fast::hash(&buf[0..40]);
        buf[40..44].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode metadata from the start of block 0.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < META_SIZE {
            return Err(Error::invalid_format(format!(
                "metadata too short: expected {} bytes, got {}",
                META_SIZE,
                data.len()
            )));
        }

        let magic = u64::from_le_bytes(data[0..8].try_into().unwrap());
        if magic != MAGIC_NUMBER {
            return Err(Error::invalid_format(format!(
                "not a TomeDb file: expected magic {:#x}, got {:#x}",
                MAGIC_NUMBER, magic
            )));
        }

        let version = u16::from_le_bytes(data[8..10].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::invalid_format(format!(
                "unsupported format version {}",
                version
            )));
        }

        let expected = crc32fast::hash(&data[0..40]);
        let actual = u32::from_le_bytes(data[40..44].try_into().unwrap());
        if expected != actual {
            return Err(Error::invalid_format(format!(
                "metadata checksum mismatch: expected {:#x}, got {:#x}",
                expected, actual
            )));
        }

        Ok(Self {
            block_size: u32::from_le_bytes(data[12..16].try_into().unwrap()),
            block_count: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            free_head: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            directory: u64::from_le_bytes(data[32..40].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_header_encode_decode() {
        let hdr = BlockHeader { in_use: true, head: true, next: 42, used: 1000 };
        let encoded = hdr.encode();
        assert_eq!(encoded.len(), BLOCK_HEADER_SIZE);

        let decoded = BlockHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn test_block_header_free() {
        let hdr = BlockHeader::free(7);
        let decoded = BlockHeader::decode(&hdr.encode()).unwrap();
        assert!(!decoded.in_use);
        assert!(!decoded.head);
        assert_eq!(decoded.next, 7);
        assert_eq!(decoded.used, 0);
    }

    #[test]
    fn test_block_header_unknown_flags() {
        let mut data = BlockHeader::allocated().encode();
        data[0] |= 0b1000_0000;
        let result = BlockHeader::decode(&data);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_meta_encode_decode() {
        let meta = Meta { block_size: 4096, block_count: 17, free_head: 5, directory: 1 };
        let encoded = meta.encode();
        assert_eq!(encoded.len(), META_SIZE);

        let decoded = Meta::decode(&encoded).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_meta_bad_magic() {
        let mut data = Meta::new(4096).encode();
        data[0..8].copy_from_slice(&0x1234567890abcdefu64.to_le_bytes());

        let result = Meta::decode(&data);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_meta_bad_checksum() {
        let mut data = Meta::new(4096).encode();
        // Flip a bit inside the checksummed region.
        data[20] ^= 0xff;

        let result = Meta::decode(&data);
        match result {
            Err(Error::InvalidFormat(msg)) => assert!(msg.contains("checksum")),
            other => panic!("expected checksum failure, got {:?}", other),
        }
    }

    #[test]
    fn test_meta_too_short() {
        let data = Meta::new(4096).encode();
        let result = Meta::decode(&data[..20]);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
