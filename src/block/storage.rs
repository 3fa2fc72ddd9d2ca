//! Block allocation and raw block I/O over a single file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{info, trace};

use crate::block::{BlockHeader, BlockId, Meta, BLOCK_HEADER_SIZE, META_BLOCK, META_SIZE, NIL};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::retry::{self, RetryPolicy};

/// Allocates, frees, reads and writes fixed-size blocks in one file.
///
/// All file I/O funnels through the lock-contention retry policy: a
/// sharing/lock violation is retried on a fixed schedule, any other I/O
/// error propagates immediately.
pub struct BlockStorage {
    file: File,
    path: PathBuf,
    meta: Meta,
    retry: RetryPolicy,
    sync_writes: bool,
}

impl BlockStorage {
    /// Opens a block file, creating it when allowed by the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file is missing and
    /// `create_if_missing` is false, and [`Error::InvalidFormat`] when an
    /// existing file has a bad magic number, a checksum mismatch, or a
    /// block size different from `options.block_size`.
    pub fn open(path: impl AsRef<Path>, options: &Options) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let policy = options.retry_policy();

        let file = retry::run(&policy, || {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(options.create_if_missing)
                .open(&path)
                .map_err(retry::classify)
        })?;
        let len = file.metadata()?.len();

        let mut storage = Self {
            file,
            path,
            meta: Meta::new(options.block_size as u32),
            retry: policy,
            sync_writes: options.sync_writes,
        };

        if len == 0 {
            // Fresh file: materialize the zeroed meta block, then stamp it.
            let block = vec![0u8; options.block_size];
            storage.write_at(0, &block)?;
            storage.write_meta()?;
            storage.file.sync_all()?;
            info!(
                "created block file {:?} (block size {})",
                storage.path, options.block_size
            );
        } else {
            let mut buf = [0u8; META_SIZE];
            storage.read_at(0, &mut buf)?;
            let meta = Meta::decode(&buf)?;
            if meta.block_size as usize != options.block_size {
                return Err(Error::invalid_format(format!(
                    "file uses block size {}, options say {}",
                    meta.block_size, options.block_size
                )));
            }
            if len < meta.block_count * meta.block_size as u64 {
                return Err(Error::invalid_format(format!(
                    "file truncated: {} bytes cannot hold {} blocks",
                    len, meta.block_count
                )));
            }
            storage.meta = meta;
            info!(
                "opened block file {:?} ({} blocks)",
                storage.path, storage.meta.block_count
            );
        }

        Ok(storage)
    }

    /// Allocates one block: reuses the free-list head when present,
    /// otherwise extends the file.
    pub fn allocate(&mut self) -> Result<BlockId> {
        let id = if self.meta.free_head != NIL {
            let id = self.meta.free_head;
            let header = self.read_header(id)?;
            if header.in_use {
                return Err(Error::invalid_format(format!(
                    "free-list head {} is marked in use",
                    id
                )));
            }
            self.meta.free_head = header.next;
            id
        } else {
            let id = self.meta.block_count;
            self.meta.block_count += 1;
            let len = self.meta.block_count * self.meta.block_size as u64;
            let policy = self.retry;
            let file = &mut self.file;
            retry::run(&policy, || file.set_len(len).map_err(retry::classify))?;
            id
        };

        self.write_header(id, &BlockHeader::allocated())?;
        self.write_meta()?;
        trace!("allocated block {}", id);
        Ok(id)
    }

    /// Pushes a block onto the free list.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the block is reserved, out of range,
    /// or already free.
    pub fn free(&mut self, id: BlockId) -> Result<()> {
        let header = self.read_header(id)?;
        if !header.in_use {
            return Err(Error::invalid_argument(format!("block {} is already free", id)));
        }

        self.write_header(id, &BlockHeader::free(self.meta.free_head))?;
        self.meta.free_head = id;
        self.write_meta()?;
        trace!("freed block {}", id);
        Ok(())
    }

    /// Reads a whole block, header included.
    pub fn read(&mut self, id: BlockId) -> Result<Vec<u8>> {
        self.check_data_id(id)?;
        let mut buf = vec![0u8; self.meta.block_size as usize];
        let offset = self.offset(id);
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Writes a whole block. `data` covers the block verbatim, the 16-byte
    /// header included, and must be exactly one block long.
    pub fn write(&mut self, id: BlockId, data: &[u8]) -> Result<()> {
        self.check_data_id(id)?;
        if data.len() != self.meta.block_size as usize {
            return Err(Error::invalid_argument(format!(
                "block write must be {} bytes, got {}",
                self.meta.block_size,
                data.len()
            )));
        }
        let offset = self.offset(id);
        self.write_at(offset, data)
    }

    /// Reads only a block's 16-byte header.
    pub fn read_header(&mut self, id: BlockId) -> Result<BlockHeader> {
        self.check_data_id(id)?;
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        let offset = self.offset(id);
        self.read_at(offset, &mut buf)?;
        BlockHeader::decode(&buf)
    }

    /// Writes only a block's 16-byte header, leaving the payload untouched.
    pub fn write_header(&mut self, id: BlockId, header: &BlockHeader) -> Result<()> {
        self.check_data_id(id)?;
        let offset = self.offset(id);
        self.write_at(offset, &header.encode())
    }

    /// The record holding the engine's collection directory, if any.
    pub fn directory(&self) -> Option<BlockId> {
        (self.meta.directory != NIL).then_some(self.meta.directory)
    }

    /// Persists the directory record locator in the metadata block.
    pub fn set_directory(&mut self, id: BlockId) -> Result<()> {
        self.meta.directory = id;
        self.write_meta()
    }

    /// Block size of this file in bytes.
    pub fn block_size(&self) -> usize {
        self.meta.block_size as usize
    }

    /// Payload bytes available per block.
    pub fn payload_capacity(&self) -> usize {
        self.meta.block_size as usize - BLOCK_HEADER_SIZE
    }

    /// Total number of blocks, the meta block included.
    pub fn block_count(&self) -> u64 {
        self.meta.block_count
    }

    /// Number of blocks currently on the free list.
    pub fn free_count(&mut self) -> Result<u64> {
        let mut count = 0u64;
        let mut next = self.meta.free_head;
        while next != NIL {
            count += 1;
            if count > self.meta.block_count {
                return Err(Error::invalid_format("free-list cycle detected"));
            }
            next = self.read_header(next)?.next;
        }
        Ok(count)
    }

    /// Syncs file contents and metadata to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset(&self, id: BlockId) -> u64 {
        id * self.meta.block_size as u64
    }

    fn check_data_id(&self, id: BlockId) -> Result<()> {
        if id == META_BLOCK {
            return Err(Error::invalid_argument("block 0 is reserved for file metadata"));
        }
        if id >= self.meta.block_count {
            return Err(Error::invalid_argument(format!(
                "block {} out of range (file has {} blocks)",
                id, self.meta.block_count
            )));
        }
        Ok(())
    }

    fn write_meta(&mut self) -> Result<()> {
        let bytes = self.meta.encode();
        self.write_at(0, &bytes)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let policy = self.retry;
        let file = &mut self.file;
        retry::run(&policy, || {
            file.seek(SeekFrom::Start(offset)).map_err(retry::classify)?;
            file.read_exact(buf).map_err(retry::classify)
        })
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let policy = self.retry;
        let file = &mut self.file;
        retry::run(&policy, || {
            file.seek(SeekFrom::Start(offset)).map_err(retry::classify)?;
            file.write_all(data).map_err(retry::classify)
        })?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

impl Drop for BlockStorage {
    fn drop(&mut self) {
        // Best-effort durability on shutdown.
        let _ = self.file.sync_all();
    }
}
