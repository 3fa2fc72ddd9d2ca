//! Secondary indexes over document fields.
//!
//! Each secondary index lives in its own block file
//! (`<stem>.<collection>.<field>.idx`) holding a tree keyed by
//! [`SecondaryKey`]: the indexed field value compounded with the record
//! locator. The compound keeps tree keys strictly unique even when many
//! documents share a field value, so non-unique indexes need no equal-run
//! bookkeeping and the delete path addresses exactly one entry. A unique
//! index adds a key-range probe before insert.

use std::fmt;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::config::Options;
use crate::document::Bson;
use crate::error::{Error, Result};
use crate::record::{RecordId, RecordStorage};
use crate::serializer::Serializer;
use crate::tree::{BTree, RecordNodePager};

/// Index entry key: the indexed value plus the owning record's locator.
///
/// Orders by `(key, locator)`, so all entries for one field value are
/// adjacent and a range over `(key, 0)..=(key, MAX)` enumerates them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SecondaryKey {
    /// The indexed field value.
    pub key: Bson,
    /// Locator of the document record carrying the value.
    pub locator: RecordId,
}

impl fmt::Display for SecondaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.locator)
    }
}

impl Serializer for SecondaryKey {
    const FIXED_SIZE: Option<usize> = None;

    fn serialize(&self) -> Vec<u8> {
        let mut bytes = self.key.serialize();
        bytes.extend_from_slice(&self.locator.to_le_bytes());
        bytes
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::invalid_argument(format!(
                "secondary key needs at least 8 bytes, got {}",
                data.len()
            )));
        }
        let (key_bytes, locator_bytes) = data.split_at(data.len() - 8);
        Ok(Self {
            key: Bson::deserialize(key_bytes)?,
            locator: u64::from_le_bytes(locator_bytes.try_into().unwrap()),
        })
    }
}

/// Path of the index file for `field` of `collection`, next to the main
/// database file.
pub(crate) fn index_path(main: &Path, collection: &str, field: &str) -> PathBuf {
    let stem = main.file_stem().and_then(|s| s.to_str()).unwrap_or("tomedb");
    main.with_file_name(format!("{}.{}.{}.idx", stem, collection, field))
}

/// One secondary index: a tree in its own block file.
pub(crate) struct SecondaryIndex {
    field: String,
    unique: bool,
    path: PathBuf,
    tree: BTree<SecondaryKey, u64, RecordNodePager<SecondaryKey, u64>>,
}

impl SecondaryIndex {
    /// Opens (or creates) the index file.
    ///
    /// The index file's metadata directory slot points at the tree's header
    /// record, so reopening needs no external state beyond the path.
    pub(crate) fn open(
        path: PathBuf,
        field: String,
        unique: bool,
        options: &Options,
    ) -> Result<Self> {
        let storage = RecordStorage::open(&path, options)?;
        let header = storage.storage().directory();
        let records = Arc::new(Mutex::new(storage));

        let pager = RecordNodePager::open(Arc::clone(&records), header)?;
        if header.is_none() {
            let header_record = pager.header_record();
            records.lock().storage_mut().set_directory(header_record)?;
            info!("created secondary index file {:?}", path);
        }

        let tree = BTree::new(pager, options.index_order)?;
        Ok(Self { field, unique, path, tree })
    }

    /// The indexed field (dotted paths allowed).
    pub(crate) fn field(&self) -> &str {
        &self.field
    }

    /// Whether the index rejects duplicate field values.
    pub(crate) fn unique(&self) -> bool {
        self.unique
    }

    /// The index file's path.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Adds an entry for a document.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateKey`] when the index is unique and another
    /// document already carries `key`.
    pub(crate) fn insert(&mut self, key: Bson, locator: RecordId) -> Result<()> {
        if self.unique && !self.find(&key)?.is_empty() {
            return Err(Error::duplicate_key(format!("{} = {}", self.field, key)));
        }
        self.tree.insert(SecondaryKey { key, locator }, locator)
    }

    /// Removes the entry for a document. Absent entries are ignored.
    pub(crate) fn delete(&mut self, key: Bson, locator: RecordId) -> Result<()> {
        self.tree.delete(&SecondaryKey { key, locator })?;
        Ok(())
    }

    /// Locators of every document whose indexed value equals `key`, in
    /// locator order.
    pub(crate) fn find(&mut self, key: &Bson) -> Result<Vec<RecordId>> {
        let lower = SecondaryKey { key: key.clone(), locator: 0 };
        let upper = SecondaryKey { key: key.clone(), locator: u64::MAX };
        let mut locators = Vec::new();
        for entry in self.tree.range(Bound::Included(lower), Bound::Included(upper))? {
            locators.push(entry?.1);
        }
        Ok(locators)
    }
}
