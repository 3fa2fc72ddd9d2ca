//! The B+Tree algorithm over a node pager.
//!
//! Keys live in the leaves; internal nodes hold separator copies routing
//! the descent. Keys are strictly unique: inserting an existing key fails
//! with [`Error::DuplicateKey`]. All leaves sit at the same depth and are
//! linked through prev/next pointers, which is what makes range scans a
//! walk along one level instead of a tree traversal.

use std::fmt;
use std::ops::Bound;

use log::trace;

use crate::block::NIL;
use crate::error::{Error, Result};
use crate::serializer::Serializer;
use crate::tree::node::{Node, NodeId};
use crate::tree::pager::NodePager;

/// A disk-resident ordered map from `K` to `V`.
///
/// `order` is the maximum number of keys per node; a node holding more
/// splits at its median. Values must serialize to a fixed size so leaf
/// layouts are decodable.
pub struct BTree<K, V, P> {
    pager: P,
    order: usize,
    _marker: std::marker::PhantomData<(K, V)>,
}

impl<K, V, P> BTree<K, V, P>
where
    K: Serializer + Ord + Clone + fmt::Display,
    V: Serializer + Clone,
    P: NodePager<K, V>,
{
    /// Creates a tree over `pager` with the given maximum fanout.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when `order` is below 4 or `V` has no
    /// fixed-size encoding.
    pub fn new(pager: P, order: usize) -> Result<Self> {
        if order < 4 {
            return Err(Error::invalid_argument(format!("tree order {} below minimum 4", order)));
        }
        if V::FIXED_SIZE.is_none() {
            return Err(Error::invalid_argument("tree values must have a fixed-size serializer"));
        }
        Ok(Self { pager, order, _marker: std::marker::PhantomData })
    }

    /// The underlying pager.
    pub fn pager(&self) -> &P {
        &self.pager
    }

    /// Consumes the tree, returning its pager.
    pub fn into_pager(self) -> P {
        self.pager
    }

    /// True when the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.pager.root().is_none()
    }

    /// Inserts a key-value pair.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateKey`] when the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if key.serialize().len() > u16::MAX as usize {
            return Err(Error::invalid_argument(format!(
                "key {} serializes beyond the 64KiB entry limit",
                key
            )));
        }

        match self.pager.root() {
            None => {
                let mut root = Node::leaf();
                root.keys.push(key);
                root.values.push(value);
                let id = self.pager.create(&root)?;
                self.pager.set_root(Some(id))
            }
            Some(root_id) => {
                if let Some((sep, right_id)) = self.insert_into(root_id, key, value)? {
                    // Root split: the tree grows one level.
                    let mut root = Node::internal();
                    root.keys.push(sep);
                    root.children.push(root_id);
                    root.children.push(right_id);
                    let new_root = self.pager.create(&root)?;
                    self.pager.set_root(Some(new_root))?;
                    trace!("root split, new root {}", new_root);
                }
                Ok(())
            }
        }
    }

    /// Looks up the value stored under `key`.
    pub fn find(&mut self, key: &K) -> Result<Option<V>> {
        let Some(mut id) = self.pager.root() else {
            return Ok(None);
        };
        loop {
            let node = self.pager.read(id)?;
            if node.leaf {
                return Ok(match node.keys.binary_search(key) {
                    Ok(pos) => Some(node.values[pos].clone()),
                    Err(_) => None,
                });
            }
            id = node.children[descent_index(&node, key)];
        }
    }

    /// Removes `key`, returning its value when it was present.
    pub fn delete(&mut self, key: &K) -> Result<Option<V>> {
        let Some(root_id) = self.pager.root() else {
            return Ok(None);
        };
        let removed = self.remove_from(root_id, key)?;
        if removed.is_some() {
            let root = self.pager.read(root_id)?;
            if root.leaf {
                if root.keys.is_empty() {
                    // An emptied tree holds no nodes at all.
                    self.pager.destroy(root_id)?;
                    self.pager.set_root(None)?;
                }
            } else if root.keys.is_empty() {
                // Root collapse: a merge left a single child.
                let child = root.children[0];
                self.pager.destroy(root_id)?;
                self.pager.set_root(Some(child))?;
                trace!("root collapsed onto {}", child);
            }
        }
        Ok(removed)
    }

    /// Scans `[lower, upper]` lazily in ascending key order.
    pub fn range(&mut self, lower: Bound<K>, upper: Bound<K>) -> Result<TreeCursor<'_, K, V, P>> {
        let Some(mut id) = self.pager.root() else {
            return Ok(TreeCursor::empty(&mut self.pager, upper));
        };
        let leaf = loop {
            let node = self.pager.read(id)?;
            if node.leaf {
                break node;
            }
            id = node.children[match &lower {
                Bound::Unbounded => 0,
                Bound::Included(key) | Bound::Excluded(key) => descent_index(&node, key),
            }];
        };
        Ok(TreeCursor::start(&mut self.pager, leaf, &lower, upper))
    }

    /// Scans the whole tree in ascending key order.
    pub fn iter(&mut self) -> Result<TreeCursor<'_, K, V, P>> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    /// Destroys every node, leaving an empty tree.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(root) = self.pager.root() {
            self.destroy_subtree(root)?;
            self.pager.set_root(None)?;
        }
        Ok(())
    }

    fn destroy_subtree(&mut self, id: NodeId) -> Result<()> {
        let node = self.pager.read(id)?;
        if !node.leaf {
            for child in &node.children {
                self.destroy_subtree(*child)?;
            }
        }
        self.pager.destroy(id)
    }

    fn insert_into(&mut self, id: NodeId, key: K, value: V) -> Result<Option<(K, NodeId)>> {
        let mut node = self.pager.read(id)?;

        if node.leaf {
            match node.keys.binary_search(&key) {
                Ok(_) => return Err(Error::duplicate_key(&key)),
                Err(pos) => {
                    node.keys.insert(pos, key);
                    node.values.insert(pos, value);
                }
            }
            if node.keys.len() <= self.order {
                self.pager.write(id, &node)?;
                return Ok(None);
            }

            // Leaf split: the median key is copied up, both halves keep it
            // reachable through the sibling chain.
            let mid = node.keys.len() / 2;
            let mut right = Node::leaf();
            right.keys = node.keys.split_off(mid);
            right.values = node.values.split_off(mid);
            right.prev = id;
            right.next = node.next;
            let sep = right.keys[0].clone();

            let right_id = self.pager.create(&right)?;
            if node.next != NIL {
                let mut after = self.pager.read(node.next)?;
                after.prev = right_id;
                self.pager.write(node.next, &after)?;
            }
            node.next = right_id;
            self.pager.write(id, &node)?;
            Ok(Some((sep, right_id)))
        } else {
            let idx = descent_index(&node, &key);
            let Some((sep, new_child)) = self.insert_into(node.children[idx], key, value)? else {
                return Ok(None);
            };

            node.keys.insert(idx, sep);
            node.children.insert(idx + 1, new_child);
            if node.keys.len() <= self.order {
                self.pager.write(id, &node)?;
                return Ok(None);
            }

            // Internal split: the median key moves up.
            let mid = node.keys.len() / 2;
            let sep = node.keys[mid].clone();
            let mut right = Node::internal();
            right.keys = node.keys.split_off(mid + 1);
            right.children = node.children.split_off(mid + 1);
            node.keys.pop();

            let right_id = self.pager.create(&right)?;
            self.pager.write(id, &node)?;
            Ok(Some((sep, right_id)))
        }
    }

    fn remove_from(&mut self, id: NodeId, key: &K) -> Result<Option<V>> {
        let mut node = self.pager.read(id)?;
        if node.leaf {
            return match node.keys.binary_search(key) {
                Ok(pos) => {
                    node.keys.remove(pos);
                    let value = node.values.remove(pos);
                    self.pager.write(id, &node)?;
                    Ok(Some(value))
                }
                Err(_) => Ok(None),
            };
        }

        let idx = descent_index(&node, key);
        let removed = self.remove_from(node.children[idx], key)?;
        if removed.is_some() {
            self.rebalance_child(id, &mut node, idx)?;
        }
        Ok(removed)
    }

    /// Restores the minimum-occupancy invariant for `parent.children[idx]`
    /// after a deletion underneath it: borrow from a richer sibling, else
    /// merge with one.
    fn rebalance_child(
        &mut self,
        parent_id: NodeId,
        parent: &mut Node<K, V>,
        idx: usize,
    ) -> Result<()> {
        let min_keys = self.order / 2;
        let child_id = parent.children[idx];
        let mut child = self.pager.read(child_id)?;
        if child.keys.len() >= min_keys {
            return Ok(());
        }

        if idx > 0 {
            let left_id = parent.children[idx - 1];
            let mut left = self.pager.read(left_id)?;
            if left.keys.len() > min_keys {
                if child.leaf {
                    let key = left.keys.pop().expect("left sibling is non-empty");
                    let value = left.values.pop().expect("left sibling is non-empty");
                    parent.keys[idx - 1] = key.clone();
                    child.keys.insert(0, key);
                    child.values.insert(0, value);
                } else {
                    let key = left.keys.pop().expect("left sibling is non-empty");
                    let grand = left.children.pop().expect("left sibling is non-empty");
                    let sep = std::mem::replace(&mut parent.keys[idx - 1], key);
                    child.keys.insert(0, sep);
                    child.children.insert(0, grand);
                }
                self.pager.write(left_id, &left)?;
                self.pager.write(child_id, &child)?;
                self.pager.write(parent_id, parent)?;
                return Ok(());
            }
        }

        if idx + 1 < parent.children.len() {
            let right_id = parent.children[idx + 1];
            let mut right = self.pager.read(right_id)?;
            if right.keys.len() > min_keys {
                if child.leaf {
                    child.keys.push(right.keys.remove(0));
                    child.values.push(right.values.remove(0));
                    parent.keys[idx] = right.keys[0].clone();
                } else {
                    let key = right.keys.remove(0);
                    let grand = right.children.remove(0);
                    let sep = std::mem::replace(&mut parent.keys[idx], key);
                    child.keys.push(sep);
                    child.children.push(grand);
                }
                self.pager.write(right_id, &right)?;
                self.pager.write(child_id, &child)?;
                self.pager.write(parent_id, parent)?;
                return Ok(());
            }
        }

        // Both siblings at minimum: merge the child with one of them.
        let (sep_idx, left_id, right_id) = if idx > 0 {
            (idx - 1, parent.children[idx - 1], child_id)
        } else {
            (idx, child_id, parent.children[idx + 1])
        };
        let mut left = self.pager.read(left_id)?;
        let right = self.pager.read(right_id)?;
        let sep = parent.keys.remove(sep_idx);
        parent.children.remove(sep_idx + 1);

        if left.leaf {
            // The separator was a copy of a leaf key; it vanishes with the
            // merge.
            left.keys.extend(right.keys);
            left.values.extend(right.values);
            left.next = right.next;
            if right.next != NIL {
                let mut after = self.pager.read(right.next)?;
                after.prev = left_id;
                self.pager.write(right.next, &after)?;
            }
        } else {
            left.keys.push(sep);
            left.keys.extend(right.keys);
            left.children.extend(right.children);
        }

        self.pager.destroy(right_id)?;
        self.pager.write(left_id, &left)?;
        self.pager.write(parent_id, parent)?;
        trace!("merged node {} into {}", right_id, left_id);
        Ok(())
    }
}

/// Child slot to descend into for `key`. Keys equal to a separator route
/// right, matching leaf-split promotion.
fn descent_index<K: Ord, V>(node: &Node<K, V>, key: &K) -> usize {
    match node.keys.binary_search(key) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

/// A lazy, strictly key-ordered scan over a tree range.
///
/// Loads one leaf at a time and walks the sibling chain, so the cost of a
/// short scan over a large tree stays proportional to what is consumed.
pub struct TreeCursor<'a, K, V, P> {
    pager: &'a mut P,
    entries: std::vec::IntoIter<(K, V)>,
    next_leaf: NodeId,
    upper: Bound<K>,
    done: bool,
}

impl<'a, K, V, P> TreeCursor<'a, K, V, P>
where
    K: Serializer + Ord + Clone,
    V: Serializer + Clone,
    P: NodePager<K, V>,
{
    fn empty(pager: &'a mut P, upper: Bound<K>) -> Self {
        Self { pager, entries: Vec::new().into_iter(), next_leaf: NIL, upper, done: true }
    }

    fn start(pager: &'a mut P, leaf: Node<K, V>, lower: &Bound<K>, upper: Bound<K>) -> Self {
        let mut cursor =
            Self { pager, entries: Vec::new().into_iter(), next_leaf: NIL, upper, done: false };
        cursor.load(leaf, lower);
        cursor
    }

    /// Buffers a leaf's in-range entries and remembers its successor.
    fn load(&mut self, leaf: Node<K, V>, lower: &Bound<K>) {
        self.next_leaf = leaf.next;
        let mut entries = Vec::with_capacity(leaf.keys.len());
        for (key, value) in leaf.keys.into_iter().zip(leaf.values) {
            let above_lower = match lower {
                Bound::Unbounded => true,
                Bound::Included(bound) => key >= *bound,
                Bound::Excluded(bound) => key > *bound,
            };
            if !above_lower {
                continue;
            }
            let below_upper = match &self.upper {
                Bound::Unbounded => true,
                Bound::Included(bound) => key <= *bound,
                Bound::Excluded(bound) => key < *bound,
            };
            if !below_upper {
                // Keys only grow from here; the scan is over.
                self.done = true;
                break;
            }
            entries.push((key, value));
        }
        self.entries = entries.into_iter();
    }
}

impl<K, V, P> Iterator for TreeCursor<'_, K, V, P>
where
    K: Serializer + Ord + Clone,
    V: Serializer + Clone,
    P: NodePager<K, V>,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entries.next() {
                return Some(Ok(entry));
            }
            if self.done || self.next_leaf == NIL {
                return None;
            }
            match self.pager.read(self.next_leaf) {
                Ok(leaf) => self.load(leaf, &Bound::Unbounded),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
