//! Fixed-size block storage.
//!
//! A database file is an array of fixed-size blocks (4KB by default),
//! addressed by a zero-based [`BlockId`]. Block 0 is reserved for file
//! metadata; every other block is either part of a record chain or on the
//! free list, linked through its header.
//!
//! ## File Format
//!
//! ```text
//! [Block 0: Meta]      // magic, version, block size, counters, crc32
//! [Block 1]
//! [Block 2]
//! ...
//! [Block N-1]
//! ```
//!
//! ## Block Format
//!
//! ```text
//! [Header: 16B]        // flags, next link, used byte count
//! [Payload: size-16B]
//! ```
//!
//! Freed blocks keep their header: the `next` field then links the free
//! list, with the metadata block holding the list head.

pub mod header;
pub mod storage;

pub use header::{BlockHeader, Meta};
pub use storage::BlockStorage;

/// Identifier of a block: its zero-based position in the file.
pub type BlockId = u64;

/// Sentinel for "no block" in chain and free-list links.
pub const NIL: BlockId = u64::MAX;

/// The block holding file metadata. Never part of a record or free list.
pub const META_BLOCK: BlockId = 0;

/// Size of the per-block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Size of the encoded metadata structure in block 0.
pub const META_SIZE: usize = 44;

/// Magic number identifying a TomeDb block file.
pub const MAGIC_NUMBER: u64 = 0x544f4d4544424631; // "TOMEDBF1" in hex

/// On-disk format version written to new files.
pub const FORMAT_VERSION: u16 = 1;
