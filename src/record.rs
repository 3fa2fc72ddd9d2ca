//! Variable-length records chained across fixed-size blocks.
//!
//! A record's bytes are split into block-payload segments and linked
//! through the block headers:
//!
//! ```text
//! [Block 7: head, used=4080, next=9] -> [Block 9: used=4080, next=3] -> [Block 3: used=120, next=NIL]
//! ```
//!
//! The record locator is the ID of its first block and stays stable for
//! the record's whole life: updates rewrite the chain in place, growing or
//! shrinking it from the tail, but never relocate the head. A zero-length
//! record still occupies one block so its locator remains valid.

use std::path::Path;

use log::debug;

use crate::block::{BlockHeader, BlockId, BlockStorage, BLOCK_HEADER_SIZE, NIL};
use crate::config::Options;
use crate::error::{Error, Result};

/// Identifier of a record: the ID of the first block in its chain.
pub type RecordId = BlockId;

/// Stores arbitrarily sized byte records by chaining blocks.
pub struct RecordStorage {
    blocks: BlockStorage,
    slack: usize,
}

impl RecordStorage {
    /// Opens record storage over a block file.
    pub fn open(path: impl AsRef<Path>, options: &Options) -> Result<Self> {
        Ok(Self {
            blocks: BlockStorage::open(path, options)?,
            slack: options.update_slack_blocks,
        })
    }

    /// Stores a new record and returns its locator.
    pub fn create(&mut self, data: &[u8]) -> Result<RecordId> {
        let needed = self.blocks_needed(data.len());
        let mut ids = Vec::with_capacity(needed);
        for _ in 0..needed {
            ids.push(self.blocks.allocate()?);
        }
        self.write_chain(&ids, data)?;
        debug!("created record {} ({} bytes in {} blocks)", ids[0], data.len(), needed);
        Ok(ids[0])
    }

    /// Reads a record's bytes back.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when `id` does not point at the head of a
    /// live record; [`Error::InvalidFormat`] when the chain is corrupt.
    pub fn read(&mut self, id: RecordId) -> Result<Vec<u8>> {
        let links = self.chain(id)?;
        let total: usize = links.iter().map(|(_, h)| h.used as usize).sum();

        let mut data = Vec::with_capacity(total);
        for (block_id, header) in links {
            if header.used == 0 {
                continue;
            }
            let block = self.blocks.read(block_id)?;
            data.extend_from_slice(
                &block[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + header.used as usize],
            );
        }
        Ok(data)
    }

    /// Rewrites a record in place. The locator stays valid.
    ///
    /// Growing allocates and appends blocks; shrinking releases trailing
    /// blocks past the configured slack and keeps the rest chained with
    /// zero used bytes.
    pub fn update(&mut self, id: RecordId, data: &[u8]) -> Result<()> {
        let links = self.chain(id)?;
        let mut ids: Vec<BlockId> = links.iter().map(|(block_id, _)| *block_id).collect();

        let needed = self.blocks_needed(data.len());
        let keep = needed + self.slack;
        if ids.len() > keep {
            for &extra in &ids[keep..] {
                self.blocks.free(extra)?;
            }
            ids.truncate(keep);
        } else if needed > ids.len() {
            for _ in ids.len()..needed {
                ids.push(self.blocks.allocate()?);
            }
        }

        self.write_chain(&ids, data)?;
        debug!("updated record {} ({} bytes in {} blocks)", id, data.len(), ids.len());
        Ok(())
    }

    /// Deletes a record, returning every chain block to the free list.
    pub fn delete(&mut self, id: RecordId) -> Result<()> {
        let links = self.chain(id)?;
        let count = links.len();
        for (block_id, _) in links {
            self.blocks.free(block_id)?;
        }
        debug!("deleted record {} ({} blocks)", id, count);
        Ok(())
    }

    /// Length of a record in bytes, recovered from the chain headers alone.
    pub fn size(&mut self, id: RecordId) -> Result<usize> {
        Ok(self.chain(id)?.iter().map(|(_, h)| h.used as usize).sum())
    }

    /// The underlying block storage.
    pub fn storage(&self) -> &BlockStorage {
        &self.blocks
    }

    /// Mutable access to the underlying block storage.
    pub fn storage_mut(&mut self) -> &mut BlockStorage {
        &mut self.blocks
    }

    /// Walks a chain from its head, validating every link.
    fn chain(&mut self, head: RecordId) -> Result<Vec<(BlockId, BlockHeader)>> {
        let first = self.blocks.read_header(head)?;
        if !first.in_use || !first.head {
            return Err(Error::invalid_argument(format!(
                "block {} is not the head of a record",
                head
            )));
        }

        let mut links = vec![(head, first)];
        let mut next = first.next;
        while next != NIL {
            if links.len() as u64 >= self.blocks.block_count() {
                return Err(Error::invalid_format(format!(
                    "record {} chain never terminates",
                    head
                )));
            }
            let header = self.blocks.read_header(next)?;
            if !header.in_use || header.head {
                return Err(Error::invalid_format(format!(
                    "record {} chain enters block {} marked free or head",
                    head, next
                )));
            }
            links.push((next, header));
            next = header.next;
        }

        let cap = self.blocks.payload_capacity() as u32;
        for (block_id, header) in &links {
            if header.used > cap {
                return Err(Error::invalid_format(format!(
                    "block {} claims {} used bytes, capacity is {}",
                    block_id, header.used, cap
                )));
            }
        }
        Ok(links)
    }

    /// Writes headers and payload segments across a chain of blocks.
    fn write_chain(&mut self, ids: &[BlockId], data: &[u8]) -> Result<()> {
        let cap = self.blocks.payload_capacity();
        let block_size = self.blocks.block_size();

        for (i, &id) in ids.iter().enumerate() {
            let start = (i * cap).min(data.len());
            let end = ((i + 1) * cap).min(data.len());
            let segment = &data[start..end];

            let header = BlockHeader {
                in_use: true,
                head: i == 0,
                next: ids.get(i + 1).copied().unwrap_or(NIL),
                used: segment.len() as u32,
            };

            let mut block = vec![0u8; block_size];
            block[..BLOCK_HEADER_SIZE].copy_from_slice(&header.encode());
            block[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + segment.len()].copy_from_slice(segment);
            self.blocks.write(id, &block)?;
        }
        Ok(())
    }

    fn blocks_needed(&self, len: usize) -> usize {
        if len == 0 {
            1
        } else {
            len.div_ceil(self.blocks.payload_capacity())
        }
    }
}
