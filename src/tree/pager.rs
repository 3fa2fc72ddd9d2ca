//! Node managers: where tree pages live.
//!
//! [`NodePager`] decouples the B+Tree algorithm from its storage medium.
//! The disk-backed [`RecordNodePager`] stores each node as one record and
//! keeps the root pointer in a 16-byte header record; the in-memory
//! [`MemoryNodePager`] keeps serialized nodes in a map and exists so the
//! tree can be tested without a file.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::NIL;
use crate::error::{Error, Result};
use crate::record::{RecordId, RecordStorage};
use crate::serializer::Serializer;
use crate::tree::node::{Node, NodeId};

/// Magic number at the start of an index header record.
pub const INDEX_MAGIC: u64 = 0x544f4d4549445831; // "TOMEIDX1" in hex

/// Size of the encoded index header record.
const INDEX_HEADER_SIZE: usize = 16;

/// Reads, writes, creates and destroys whole tree nodes, and remembers
/// which node is the root.
pub trait NodePager<K, V>
where
    K: Serializer,
    V: Serializer,
{
    /// The current root node, `None` for an empty tree.
    fn root(&self) -> Option<NodeId>;

    /// Sets (and persists, where applicable) the root pointer.
    fn set_root(&mut self, root: Option<NodeId>) -> Result<()>;

    /// Stores a new node and returns its ID.
    fn create(&mut self, node: &Node<K, V>) -> Result<NodeId>;

    /// Loads a node.
    fn read(&mut self, id: NodeId) -> Result<Node<K, V>>;

    /// Rewrites an existing node.
    fn write(&mut self, id: NodeId, node: &Node<K, V>) -> Result<()>;

    /// Releases a node's storage.
    fn destroy(&mut self, id: NodeId) -> Result<()>;
}

/// In-memory node manager for tests.
///
/// Nodes are held as serialized bytes so every access still exercises the
/// node codec.
pub struct MemoryNodePager<K, V> {
    nodes: HashMap<NodeId, Vec<u8>>,
    next_id: NodeId,
    root: Option<NodeId>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> MemoryNodePager<K, V> {
    /// Creates an empty pager.
    pub fn new() -> Self {
        Self { nodes: HashMap::new(), next_id: 1, root: None, _marker: PhantomData }
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl<K, V> Default for MemoryNodePager<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> NodePager<K, V> for MemoryNodePager<K, V>
where
    K: Serializer,
    V: Serializer,
{
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn set_root(&mut self, root: Option<NodeId>) -> Result<()> {
        self.root = root;
        Ok(())
    }

    fn create(&mut self, node: &Node<K, V>) -> Result<NodeId> {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node.serialize());
        Ok(id)
    }

    fn read(&mut self, id: NodeId) -> Result<Node<K, V>> {
        let bytes = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::invalid_argument(format!("node {} does not exist", id)))?;
        Node::deserialize(bytes)
    }

    fn write(&mut self, id: NodeId, node: &Node<K, V>) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(Error::invalid_argument(format!("node {} does not exist", id)));
        }
        self.nodes.insert(id, node.serialize());
        Ok(())
    }

    fn destroy(&mut self, id: NodeId) -> Result<()> {
        self.nodes
            .remove(&id)
            .ok_or_else(|| Error::invalid_argument(format!("node {} does not exist", id)))?;
        Ok(())
    }
}

/// Disk-backed node manager: every node is one record, the root pointer
/// lives in a header record of `[magic: u64][root: u64]`.
pub struct RecordNodePager<K, V> {
    records: Arc<Mutex<RecordStorage>>,
    header: RecordId,
    root: Option<NodeId>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> RecordNodePager<K, V>
where
    K: Serializer,
    V: Serializer,
{
    /// Opens a pager over record storage.
    ///
    /// With `Some(header)` the existing header record is loaded and
    /// validated; with `None` a fresh header record is created for an empty
    /// tree. The header record's ID is the tree's stable on-disk identity,
    /// exposed by [`header_record`](Self::header_record).
    pub fn open(records: Arc<Mutex<RecordStorage>>, header: Option<RecordId>) -> Result<Self> {
        let (header, root) = match header {
            Some(id) => {
                let bytes = records.lock().read(id)?;
                (id, decode_header(id, &bytes)?)
            }
            None => {
                let id = records.lock().create(&encode_header(NIL))?;
                (id, None)
            }
        };
        Ok(Self { records, header, root, _marker: PhantomData })
    }

    /// The header record holding this tree's root pointer.
    pub fn header_record(&self) -> RecordId {
        self.header
    }

    /// Releases the header record itself. Call after the tree is cleared.
    pub fn destroy_header(self) -> Result<()> {
        self.records.lock().delete(self.header)
    }
}

fn encode_header(root: NodeId) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(INDEX_HEADER_SIZE);
    bytes.extend_from_slice(&INDEX_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&root.to_le_bytes());
    bytes
}

fn decode_header(id: RecordId, bytes: &[u8]) -> Result<Option<NodeId>> {
    if bytes.len() != INDEX_HEADER_SIZE {
        return Err(Error::invalid_format(format!(
            "index header record {} has {} bytes, expected {}",
            id,
            bytes.len(),
            INDEX_HEADER_SIZE
        )));
    }
    let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    if magic != INDEX_MAGIC {
        return Err(Error::invalid_format(format!(
            "record {} is not an index header: bad magic {:#x}",
            id, magic
        )));
    }
    let root = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    Ok((root != NIL).then_some(root))
}

impl<K, V> NodePager<K, V> for RecordNodePager<K, V>
where
    K: Serializer,
    V: Serializer,
{
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn set_root(&mut self, root: Option<NodeId>) -> Result<()> {
        self.records.lock().update(self.header, &encode_header(root.unwrap_or(NIL)))?;
        self.root = root;
        Ok(())
    }

    fn create(&mut self, node: &Node<K, V>) -> Result<NodeId> {
        self.records.lock().create(&node.serialize())
    }

    fn read(&mut self, id: NodeId) -> Result<Node<K, V>> {
        let bytes = self.records.lock().read(id)?;
        Node::deserialize(&bytes)
    }

    fn write(&mut self, id: NodeId, node: &Node<K, V>) -> Result<()> {
        self.records.lock().update(id, &node.serialize())
    }

    fn destroy(&mut self, id: NodeId) -> Result<()> {
        self.records.lock().delete(id)
    }
}
