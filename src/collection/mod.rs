//! The collection facade: typed document operations over one collection.
//!
//! A [`Collection`] composes the primary index (by `Id`), the document
//! codec, the shared record storage, and any secondary indexes into
//! insert/find/update/delete operations. Facades are cheap handles: every
//! facade for the same name shares one backing state, and
//! [`include`](Collection::include) derives a new facade with one more
//! post-materialization hook without mutating the original.

pub mod secondary;

pub use secondary::SecondaryKey;

use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use crate::document::{codec, Bson, Document, Entity};
use crate::error::{Error, Result};
use crate::record::{RecordId, RecordStorage};
use crate::tree::{BTree, RecordNodePager};
use crate::Shared;

use secondary::{index_path, SecondaryIndex};

/// A hook run against every materialized entity before it is returned.
pub type IncludeAction = Arc<dyn Fn(&mut Entity) + Send + Sync>;

pub(crate) type PrimaryTree = BTree<Bson, u64, RecordNodePager<Bson, u64>>;

/// Mutable state shared by every facade of one collection: the primary
/// tree (absent until the first write materializes it) and the open
/// secondary indexes.
pub(crate) struct Core {
    primary: Option<PrimaryTree>,
    secondaries: Vec<SecondaryIndex>,
}

impl Core {
    /// Builds the core from the engine's collection directory entry.
    pub(crate) fn open(shared: &Shared, name: &str) -> Result<Self> {
        let entry = shared.catalog.get(name).unwrap_or_default();

        let primary = match entry.header {
            Some(header) => {
                let pager = RecordNodePager::open(Arc::clone(&shared.records), Some(header))?;
                Some(BTree::new(pager, shared.options.index_order)?)
            }
            None => None,
        };

        let mut secondaries = Vec::with_capacity(entry.indexes.len());
        for (field, unique) in entry.indexes {
            let path = index_path(&shared.path, name, &field);
            secondaries.push(SecondaryIndex::open(path, field, unique, &shared.options)?);
        }

        Ok(Self { primary, secondaries })
    }
}

/// A named logical grouping of documents.
///
/// Obtained from [`Database::collection`](crate::Database::collection).
/// All operations validate the mandatory `Id` field and keep every
/// secondary index aligned with the primary.
#[derive(Clone)]
pub struct Collection {
    name: String,
    shared: Arc<Shared>,
    core: Arc<Mutex<Core>>,
    includes: Vec<IncludeAction>,
}

impl Collection {
    pub(crate) fn new(name: String, shared: Arc<Shared>, core: Arc<Mutex<Core>>) -> Self {
        Self { name, shared, core, includes: Vec::new() }
    }

    /// The collection's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores a new document.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the document lacks a non-null `Id`,
    /// [`Error::DuplicateKey`] when the Id (or a unique-indexed field
    /// value) is already taken.
    pub fn insert(&self, document: Document) -> Result<()> {
        let entity = Entity::new(document)?;
        let bytes = codec::serialize_entity(&entity)?;

        let mut guard = self.core.lock();
        let core = &mut *guard;

        // All uniqueness checks happen before anything is written.
        let primary = self.primary_mut(core)?;
        if primary.find(entity.id())?.is_some() {
            return Err(Error::duplicate_key(entity.id()));
        }
        for index in core.secondaries.iter_mut().filter(|index| index.unique()) {
            let key = field_key(&entity, index.field());
            if !index.find(&key)?.is_empty() {
                return Err(Error::duplicate_key(format!("{} = {}", index.field(), key)));
            }
        }

        let locator = self.shared.records.lock().create(&bytes)?;
        core.primary
            .as_mut()
            .expect("primary materialized above")
            .insert(entity.id().clone(), locator)?;
        for index in core.secondaries.iter_mut() {
            index.insert(field_key(&entity, index.field()), locator)?;
        }

        debug!("{}: inserted {} at record {}", self.name, entity.id(), locator);
        Ok(())
    }

    /// Looks up one document by its Id.
    pub fn find_by_id(&self, id: &Bson) -> Result<Option<Entity>> {
        let locator = {
            let mut guard = self.core.lock();
            match guard.primary.as_mut() {
                Some(primary) => primary.find(id)?,
                None => None,
            }
        };
        let Some(locator) = locator else {
            return Ok(None);
        };

        let bytes = self.shared.records.lock().read(locator)?;
        let mut entity = codec::deserialize_entity(&bytes)?;
        self.apply_includes(&mut entity);
        Ok(Some(entity))
    }

    /// Every document, lazily materialized in ascending Id order.
    pub fn all(&self) -> Result<EntityIter> {
        Ok(EntityIter {
            records: Arc::clone(&self.shared.records),
            pairs: self.snapshot()?.into_iter(),
            predicate: None,
            includes: self.includes.clone(),
        })
    }

    /// Documents matching `predicate`, lazily materialized in ascending Id
    /// order. The predicate sees entities with include actions applied.
    pub fn find(
        &self,
        predicate: impl Fn(&Entity) -> bool + Send + Sync + 'static,
    ) -> Result<EntityIter> {
        Ok(EntityIter {
            records: Arc::clone(&self.shared.records),
            pairs: self.snapshot()?.into_iter(),
            predicate: Some(Box::new(predicate)),
            includes: self.includes.clone(),
        })
    }

    /// The first document matching `predicate`, if any.
    pub fn find_one(
        &self,
        predicate: impl Fn(&Entity) -> bool + Send + Sync + 'static,
    ) -> Result<Option<Entity>> {
        self.find(predicate)?.next().transpose()
    }

    /// Documents whose value at `field` (dotted paths allowed) equals
    /// `value`. Uses the field's secondary index when one exists, a
    /// predicate scan otherwise; missing fields compare as Null.
    pub fn find_by_field(&self, field: &str, value: &Bson) -> Result<Vec<Entity>> {
        let indexed = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            match core.secondaries.iter_mut().find(|index| index.field() == field) {
                Some(index) => Some(index.find(value)?),
                None => None,
            }
        };

        match indexed {
            Some(locators) => {
                let mut entities = Vec::with_capacity(locators.len());
                for locator in locators {
                    let bytes = self.shared.records.lock().read(locator)?;
                    let mut entity = codec::deserialize_entity(&bytes)?;
                    self.apply_includes(&mut entity);
                    entities.push(entity);
                }
                Ok(entities)
            }
            None => {
                let field = field.to_string();
                let value = value.clone();
                self.find(move |entity| {
                    entity.get_path(&field).unwrap_or(&Bson::Null) == &value
                })?
                .collect()
            }
        }
    }

    /// Rewrites an existing document in place.
    ///
    /// Returns `false` when no document carries the Id. The record locator
    /// stays stable, so secondary indexes only change for fields whose
    /// value actually changed.
    pub fn update(&self, document: Document) -> Result<bool> {
        let entity = Entity::new(document)?;
        let bytes = codec::serialize_entity(&entity)?;

        let mut guard = self.core.lock();
        let core = &mut *guard;
        let Some(primary) = core.primary.as_mut() else {
            return Ok(false);
        };
        let Some(locator) = primary.find(entity.id())? else {
            return Ok(false);
        };

        let previous = if core.secondaries.is_empty() {
            None
        } else {
            let old_bytes = self.shared.records.lock().read(locator)?;
            Some(codec::deserialize_entity(&old_bytes)?)
        };

        if let Some(previous) = &previous {
            for index in core.secondaries.iter_mut().filter(|index| index.unique()) {
                let new_key = field_key(&entity, index.field());
                if new_key == field_key(previous, index.field()) {
                    continue;
                }
                if !index.find(&new_key)?.is_empty() {
                    return Err(Error::duplicate_key(format!(
                        "{} = {}",
                        index.field(),
                        new_key
                    )));
                }
            }
        }

        self.shared.records.lock().update(locator, &bytes)?;

        if let Some(previous) = previous {
            for index in core.secondaries.iter_mut() {
                let old_key = field_key(&previous, index.field());
                let new_key = field_key(&entity, index.field());
                if old_key != new_key {
                    index.delete(old_key, locator)?;
                    index.insert(new_key, locator)?;
                }
            }
        }

        debug!("{}: updated {} at record {}", self.name, entity.id(), locator);
        Ok(true)
    }

    /// Removes the document carrying `id`.
    ///
    /// Returns `false` when no document carries the Id.
    pub fn delete(&self, id: &Bson) -> Result<bool> {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        let Some(primary) = core.primary.as_mut() else {
            return Ok(false);
        };
        let Some(locator) = primary.find(id)? else {
            return Ok(false);
        };

        if !core.secondaries.is_empty() {
            let bytes = self.shared.records.lock().read(locator)?;
            let old = codec::deserialize_entity(&bytes)?;
            for index in core.secondaries.iter_mut() {
                index.delete(field_key(&old, index.field()), locator)?;
            }
        }

        primary.delete(id)?;
        self.shared.records.lock().delete(locator)?;
        debug!("{}: deleted {}", self.name, id);
        Ok(true)
    }

    /// Number of stored documents.
    pub fn count(&self) -> Result<u64> {
        let mut guard = self.core.lock();
        let Some(primary) = guard.primary.as_mut() else {
            return Ok(0);
        };
        let mut count = 0u64;
        for entry in primary.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Derives a facade with one more include action.
    ///
    /// The action runs against every entity produced by
    /// find/find_by_id/find_one/all, after materialization, and may mutate
    /// it in place (typically to attach related documents). The original
    /// facade is left untouched.
    pub fn include(&self, action: impl Fn(&mut Entity) + Send + Sync + 'static) -> Collection {
        let mut includes = self.includes.clone();
        includes.push(Arc::new(action));
        Collection {
            name: self.name.clone(),
            shared: Arc::clone(&self.shared),
            core: Arc::clone(&self.core),
            includes,
        }
    }

    /// Creates a secondary index on `field`, back-filling it from every
    /// stored document. A no-op when the index already exists with the
    /// same uniqueness flag.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the index exists with a different
    /// uniqueness flag, [`Error::DuplicateKey`] when `unique` is set and
    /// existing documents collide on the field.
    pub fn ensure_index(&self, field: &str, unique: bool) -> Result<()> {
        let mut guard = self.core.lock();
        let core = &mut *guard;

        if let Some(existing) = core.secondaries.iter().find(|index| index.field() == field) {
            if existing.unique() != unique {
                return Err(Error::invalid_argument(format!(
                    "index on {:?} already exists with unique = {}",
                    field,
                    existing.unique()
                )));
            }
            return Ok(());
        }

        let path = index_path(&self.shared.path, &self.name, field);
        if path.exists() {
            // Leftover from an earlier interrupted back-fill.
            std::fs::remove_file(&path)?;
        }
        let mut index = SecondaryIndex::open(path, field.to_string(), unique, &self.shared.options)?;

        if let Some(primary) = core.primary.as_mut() {
            for entry in primary.iter()? {
                let (_, locator) = entry?;
                let bytes = self.shared.records.lock().read(locator)?;
                let entity = codec::deserialize_entity(&bytes)?;
                index.insert(field_key(&entity, field), locator)?;
            }
        }

        self.shared.catalog.update(&self.name, |entry| {
            entry.indexes.insert(field.to_string(), unique);
        })?;
        core.secondaries.push(index);
        info!("{}: indexed field {:?} (unique: {})", self.name, field, unique);
        Ok(())
    }

    /// Removes every document, index node and secondary file. Called by
    /// [`Database::drop_collection`](crate::Database::drop_collection).
    pub(crate) fn destroy(&self) -> Result<()> {
        let mut guard = self.core.lock();
        let core = &mut *guard;

        if let Some(mut primary) = core.primary.take() {
            let pairs: Vec<(Bson, RecordId)> = primary.iter()?.collect::<Result<_>>()?;
            {
                let mut records = self.shared.records.lock();
                for (_, locator) in pairs {
                    records.delete(locator)?;
                }
            }
            primary.clear()?;
            primary.into_pager().destroy_header()?;
        }

        for index in core.secondaries.drain(..) {
            let path = index.path().to_path_buf();
            drop(index);
            std::fs::remove_file(&path)?;
        }

        info!("dropped collection '{}'", self.name);
        Ok(())
    }

    /// The primary tree, materializing the collection on first write.
    fn primary_mut<'a>(&self, core: &'a mut Core) -> Result<&'a mut PrimaryTree> {
        if core.primary.is_none() {
            let pager = RecordNodePager::open(Arc::clone(&self.shared.records), None)?;
            let header = pager.header_record();
            let tree = BTree::new(pager, self.shared.options.index_order)?;
            self.shared.catalog.update(&self.name, |entry| entry.header = Some(header))?;
            core.primary = Some(tree);
            info!("materialized collection '{}' (header record {})", self.name, header);
        }
        Ok(core.primary.as_mut().expect("primary materialized above"))
    }

    /// The (id, locator) pairs of every document, in ascending Id order.
    fn snapshot(&self) -> Result<Vec<(Bson, RecordId)>> {
        let mut guard = self.core.lock();
        match guard.primary.as_mut() {
            Some(primary) => primary.iter()?.collect(),
            None => Ok(Vec::new()),
        }
    }

    fn apply_includes(&self, entity: &mut Entity) {
        for action in &self.includes {
            action(entity);
        }
    }
}

/// The value a document contributes to an index on `field`; documents
/// without the field index as Null.
fn field_key(entity: &Entity, field: &str) -> Bson {
    entity.get_path(field).cloned().unwrap_or(Bson::Null)
}

/// Iterator over stored documents.
///
/// The (id, locator) pairs are snapshotted from the index up front;
/// records are read and decoded lazily, one document per step, with
/// include actions and the optional predicate applied to each.
pub struct EntityIter {
    records: Arc<Mutex<RecordStorage>>,
    pairs: std::vec::IntoIter<(Bson, RecordId)>,
    predicate: Option<Box<dyn Fn(&Entity) -> bool + Send + Sync>>,
    includes: Vec<IncludeAction>,
}

impl Iterator for EntityIter {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (_, locator) = self.pairs.next()?;
            let bytes = match self.records.lock().read(locator) {
                Ok(bytes) => bytes,
                Err(e) => return Some(Err(e)),
            };
            let mut entity = match codec::deserialize_entity(&bytes) {
                Ok(entity) => entity,
                Err(e) => return Some(Err(e)),
            };
            for action in &self.includes {
                action(&mut entity);
            }
            if let Some(predicate) = &self.predicate {
                if !predicate(&entity) {
                    continue;
                }
            }
            return Some(Ok(entity));
        }
    }
}
