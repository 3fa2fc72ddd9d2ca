//! # TomeDb - An Embedded Block-File Document Database
//!
//! TomeDb is an embedded storage engine that keeps schema-less documents
//! in a single file and retrieves them by primary key or secondary index,
//! without any external database server.
//!
//! ## Architecture
//!
//! The engine is a stack of small layers, bottom up:
//!
//! - **Block Storage**: allocates and frees fixed-size blocks in one file
//! - **Record Storage**: chains blocks into arbitrarily sized records
//! - **Ordered Index**: a disk-resident B+Tree mapping keys to record locators
//! - **Document Model + Codec**: a BSON-like value tree with a binary wire format
//! - **Collection Facade**: typed insert/find/update/delete over one collection
//!
//! Cross-process file contention is absorbed by a bounded lock-retry
//! policy; any other I/O failure is fatal and propagated.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tomedb::{Bson, Database, Document, Options};
//!
//! # fn main() -> Result<(), tomedb::Error> {
//! // Open or create a database file
//! let db = Database::open("./app.db", Options::default())?;
//! let users = db.collection("users")?;
//!
//! // Documents carry a mandatory Id field
//! let mut doc = Document::new();
//! doc.set("Id", 1i64);
//! doc.set("name", "Ada");
//! users.insert(doc)?;
//!
//! // Read back by primary key
//! if let Some(user) = users.find_by_id(&Bson::Int64(1))? {
//!     println!("found: {}", user);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod block;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod record;
pub mod retry;
pub mod serializer;
pub mod tree;

// Re-exports
pub use collection::{Collection, EntityIter, IncludeAction};
pub use config::Options;
pub use document::{Bson, Document, Entity, ID_FIELD};
pub use error::{Error, Result};
pub use serializer::Serializer;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use collection::Core;
use record::{RecordId, RecordStorage};

/// State shared by the engine and every collection facade it hands out.
pub(crate) struct Shared {
    pub(crate) path: PathBuf,
    pub(crate) options: Options,
    pub(crate) records: Arc<Mutex<RecordStorage>>,
    pub(crate) catalog: Catalog,
}

/// The main database handle.
///
/// Opens one block file, owns the shared record storage and the collection
/// directory, and hands out [`Collection`] facades by name. A collection
/// exists on disk once the first document is written to it.
///
/// # Thread Safety
///
/// `Database` can be shared across threads behind an `Arc`; record storage
/// sits behind one mutex, so physical I/O is serialized. Compound
/// operations release that lock between steps, so callers issuing writes
/// concurrently with other operations must serialize them.
pub struct Database {
    shared: Arc<Shared>,
    cores: Mutex<HashMap<String, Arc<Mutex<Core>>>>,
}

impl Database {
    /// Opens a database file, creating it when allowed by the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file is missing and
    /// `create_if_missing` is false, and [`Error::InvalidFormat`] when the
    /// file is not a TomeDb file or was created with a different block
    /// size.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tomedb::{Database, Options};
    ///
    /// # fn main() -> Result<(), tomedb::Error> {
    /// let db = Database::open("./app.db", Options::default())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        let records = Arc::new(Mutex::new(RecordStorage::open(&path, &options)?));
        let catalog = Catalog::load(Arc::clone(&records))?;
        info!("opened database {:?} ({} collections)", path, catalog.len());

        Ok(Self {
            shared: Arc::new(Shared { path, options, records, catalog }),
            cores: Mutex::new(HashMap::new()),
        })
    }

    /// Returns a facade over the named collection.
    ///
    /// The facade is handed out immediately; on-disk state is created on
    /// the first write. Every facade for the same name shares one backing
    /// state.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        if name.is_empty() {
            return Err(Error::invalid_argument("collection name must not be empty"));
        }

        let mut cores = self.cores.lock();
        let core = match cores.get(name) {
            Some(core) => Arc::clone(core),
            None => {
                let core = Arc::new(Mutex::new(Core::open(&self.shared, name)?));
                cores.insert(name.to_string(), Arc::clone(&core));
                core
            }
        };
        Ok(Collection::new(name.to_string(), Arc::clone(&self.shared), core))
    }

    /// Names of every collection present in the directory, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        self.shared.catalog.names()
    }

    /// Removes a collection: its documents, index nodes, secondary files
    /// and directory entry. Returns `false` when no such collection
    /// exists on disk.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        if self.shared.catalog.get(name).is_none() {
            self.cores.lock().remove(name);
            return Ok(false);
        }

        let collection = self.collection(name)?;
        collection.destroy()?;
        self.cores.lock().remove(name);
        self.shared.catalog.remove(name)?;
        Ok(true)
    }

    /// A point-in-time snapshot of storage usage.
    pub fn stats(&self) -> Result<DatabaseStats> {
        let collections = self.shared.catalog.len();
        let mut records = self.shared.records.lock();
        Ok(DatabaseStats {
            block_count: records.storage().block_count(),
            free_blocks: records.storage_mut().free_count()?,
            collections,
        })
    }

    /// Syncs the main file's contents and metadata to disk.
    pub fn flush(&self) -> Result<()> {
        self.shared.records.lock().storage_mut().sync()
    }

    /// Flushes and closes the database.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best-effort durability on shutdown.
        if let Err(e) = self.flush() {
            warn!("flush on drop failed: {}", e);
        }
    }
}

/// Storage usage snapshot returned by [`Database::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total blocks in the main file, the metadata block included.
    pub block_count: u64,
    /// Blocks currently on the free list.
    pub free_blocks: u64,
    /// Collections present in the directory.
    pub collections: usize,
}

/// The persisted collection directory: collection name to primary-index
/// header record and secondary-index flags. Stored as one JSON record
/// whose locator lives in the file's metadata block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Directory {
    collections: BTreeMap<String, CollectionEntry>,
}

/// One collection's directory entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct CollectionEntry {
    /// Header record of the primary index, absent until first write.
    pub(crate) header: Option<RecordId>,
    /// Secondary indexes: field name to uniqueness flag.
    pub(crate) indexes: BTreeMap<String, bool>,
}

/// In-memory handle on the directory, persisting every mutation back to
/// its record.
pub(crate) struct Catalog {
    records: Arc<Mutex<RecordStorage>>,
    state: Mutex<CatalogState>,
}

struct CatalogState {
    directory: Directory,
    record: Option<RecordId>,
}

impl Catalog {
    fn load(records: Arc<Mutex<RecordStorage>>) -> Result<Self> {
        let (record, directory) = {
            let mut guard = records.lock();
            match guard.storage().directory() {
                Some(id) => {
                    let bytes = guard.read(id)?;
                    (Some(id), serde_json::from_slice(&bytes)?)
                }
                None => (None, Directory::default()),
            }
        };
        Ok(Self { records, state: Mutex::new(CatalogState { directory, record }) })
    }

    pub(crate) fn get(&self, name: &str) -> Option<CollectionEntry> {
        self.state.lock().directory.collections.get(name).cloned()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.state.lock().directory.collections.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().directory.collections.len()
    }

    /// Mutates (creating if needed) one entry and persists the directory.
    pub(crate) fn update(
        &self,
        name: &str,
        mutate: impl FnOnce(&mut CollectionEntry),
    ) -> Result<()> {
        let mut state = self.state.lock();
        mutate(state.directory.collections.entry(name.to_string()).or_default());
        self.save(&mut state)
    }

    /// Removes one entry and persists the directory.
    pub(crate) fn remove(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let removed = state.directory.collections.remove(name).is_some();
        if removed {
            self.save(&mut state)?;
        }
        Ok(removed)
    }

    fn save(&self, state: &mut CatalogState) -> Result<()> {
        let bytes = serde_json::to_vec(&state.directory)?;
        let mut records = self.records.lock();
        match state.record {
            Some(id) => records.update(id, &bytes)?,
            None => {
                let id = records.create(&bytes)?;
                records.storage_mut().set_directory(id)?;
                state.record = Some(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_options() -> Options {
        Options::new().block_size(512).index_order(4)
    }

    fn doc(id: i64, name: &str) -> Document {
        let mut doc = Document::new();
        doc.set(ID_FIELD, id);
        doc.set("name", name);
        doc
    }

    // ===== Engine Lifecycle Tests =====

    #[test]
    fn test_open_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.db");

        let db = Database::open(&path, test_options()).unwrap();
        assert!(path.exists());
        assert_eq!(db.collection_names(), Vec::<String>::new());
    }

    #[test]
    fn test_open_missing_without_create() {
        let temp_dir = TempDir::new().unwrap();
        let options = test_options().create_if_missing(false);

        let result = Database::open(temp_dir.path().join("absent.db"), options);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_empty_collection_name_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("app.db"), test_options()).unwrap();
        assert!(matches!(db.collection(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_collection_exists_after_first_write() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("app.db"), test_options()).unwrap();

        let users = db.collection("users").unwrap();
        assert_eq!(db.collection_names(), Vec::<String>::new());

        users.insert(doc(1, "ada")).unwrap();
        assert_eq!(db.collection_names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_facades_share_state() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("app.db"), test_options()).unwrap();

        let a = db.collection("users").unwrap();
        let b = db.collection("users").unwrap();
        a.insert(doc(1, "ada")).unwrap();

        let found = b.find_by_id(&Bson::Int64(1)).unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&Bson::String("ada".into())));
    }

    // ===== Persistence Tests =====

    #[test]
    fn test_documents_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.db");

        {
            let db = Database::open(&path, test_options()).unwrap();
            let users = db.collection("users").unwrap();
            for i in 0..50 {
                users.insert(doc(i, &format!("user{}", i))).unwrap();
            }
            db.close().unwrap();
        }

        let db = Database::open(&path, test_options()).unwrap();
        assert_eq!(db.collection_names(), vec!["users".to_string()]);

        let users = db.collection("users").unwrap();
        assert_eq!(users.count().unwrap(), 50);
        for i in 0..50 {
            let entity = users.find_by_id(&Bson::Int64(i)).unwrap().unwrap();
            assert_eq!(entity.get("name"), Some(&Bson::String(format!("user{}", i))));
        }
    }

    #[test]
    fn test_multiple_collections_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.db");

        let db = Database::open(&path, test_options()).unwrap();
        let users = db.collection("users").unwrap();
        let orders = db.collection("orders").unwrap();

        users.insert(doc(1, "ada")).unwrap();
        orders.insert(doc(1, "order-1")).unwrap();
        orders.insert(doc(2, "order-2")).unwrap();

        assert_eq!(users.count().unwrap(), 1);
        assert_eq!(orders.count().unwrap(), 2);
        assert_eq!(db.collection_names(), vec!["orders".to_string(), "users".to_string()]);

        assert!(users.find_by_id(&Bson::Int64(2)).unwrap().is_none());
        assert!(orders.find_by_id(&Bson::Int64(2)).unwrap().is_some());
    }

    // ===== Drop Collection Tests =====

    #[test]
    fn test_drop_collection_frees_storage() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("app.db"), test_options()).unwrap();

        let baseline = db.stats().unwrap();
        let users = db.collection("users").unwrap();
        for i in 0..20 {
            users.insert(doc(i, "x")).unwrap();
        }

        assert!(db.drop_collection("users").unwrap());
        assert_eq!(db.collection_names(), Vec::<String>::new());

        // Everything but the directory record is back on the free list.
        let stats = db.stats().unwrap();
        assert_eq!(stats.block_count - stats.free_blocks, baseline.block_count + 1);
        assert_eq!(stats.collections, 0);
    }

    #[test]
    fn test_drop_absent_collection() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("app.db"), test_options()).unwrap();
        assert!(!db.drop_collection("ghosts").unwrap());
    }

    #[test]
    fn test_collection_reusable_after_drop() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("app.db"), test_options()).unwrap();

        let users = db.collection("users").unwrap();
        users.insert(doc(1, "ada")).unwrap();
        db.drop_collection("users").unwrap();

        let users = db.collection("users").unwrap();
        assert_eq!(users.count().unwrap(), 0);
        users.insert(doc(1, "grace")).unwrap();
        let found = users.find_by_id(&Bson::Int64(1)).unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&Bson::String("grace".into())));
    }

    // ===== Stats Tests =====

    #[test]
    fn test_stats_track_growth() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("app.db"), test_options()).unwrap();

        let before = db.stats().unwrap();
        assert_eq!(before.collections, 0);

        let users = db.collection("users").unwrap();
        users.insert(doc(1, "ada")).unwrap();

        let after = db.stats().unwrap();
        assert!(after.block_count > before.block_count);
        assert_eq!(after.collections, 1);
    }

    #[test]
    fn test_directory_survives_reopen_with_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.db");

        {
            let db = Database::open(&path, test_options()).unwrap();
            let users = db.collection("users").unwrap();
            users.insert(doc(1, "ada")).unwrap();
            users.ensure_index("name", false).unwrap();
        }

        let db = Database::open(&path, test_options()).unwrap();
        let users = db.collection("users").unwrap();
        let found = users.find_by_field("name", &Bson::String("ada".into())).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), &Bson::Int64(1));
    }
}
