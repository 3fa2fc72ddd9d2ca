//! Index pages and their binary layout.
//!
//! ## Node Format
//!
//! ```text
//! [flags: 1 byte]        // bit 0: leaf
//! [padding: 1 byte]
//! [entry count: 2 bytes]
//! [prev leaf: 8 bytes]   // NIL for internal nodes and first leaf
//! [next leaf: 8 bytes]   // NIL for internal nodes and last leaf
//! [first child: 8 bytes] // internal nodes only
//! [entry]*
//! ```
//!
//! Each entry is `[key length: 2 bytes][key bytes]` followed by the entry's
//! value (leaves, fixed-size per the value's [`Serializer`]) or the child to
//! the right of the key (internal nodes, 8 bytes).

use bytes::{BufMut, BytesMut};

use crate::block::NIL;
use crate::error::{Error, Result};
use crate::serializer::{ByteReader, Serializer};

/// Identifier of a node: the record holding its serialized form.
pub type NodeId = u64;

const FLAG_LEAF: u8 = 0b0000_0001;

/// One page of the tree.
///
/// A leaf holds `keys.len()` values and its sibling links; an internal node
/// holds `keys.len() + 1` children and leaves the sibling links at NIL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<K, V> {
    /// Whether this node is a leaf.
    pub leaf: bool,
    /// Keys, strictly ascending.
    pub keys: Vec<K>,
    /// Values, parallel to `keys`. Empty for internal nodes.
    pub values: Vec<V>,
    /// Children, one more than `keys`. Empty for leaves.
    pub children: Vec<NodeId>,
    /// Previous leaf in key order, NIL when none.
    pub prev: NodeId,
    /// Next leaf in key order, NIL when none.
    pub next: NodeId,
}

impl<K, V> Node<K, V> {
    /// Creates an empty leaf.
    pub fn leaf() -> Self {
        Self { leaf: true, keys: Vec::new(), values: Vec::new(), children: Vec::new(), prev: NIL, next: NIL }
    }

    /// Creates an empty internal node.
    pub fn internal() -> Self {
        Self { leaf: false, keys: Vec::new(), values: Vec::new(), children: Vec::new(), prev: NIL, next: NIL }
    }
}

impl<K, V> Serializer for Node<K, V>
where
    K: Serializer,
    V: Serializer,
{
    const FIXED_SIZE: Option<usize> = None;

    fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(if self.leaf { FLAG_LEAF } else { 0 });
        buf.put_u8(0);
        buf.put_u16_le(self.keys.len() as u16);
        buf.put_u64_le(self.prev);
        buf.put_u64_le(self.next);

        if !self.leaf {
            buf.put_u64_le(self.children[0]);
        }
        for (i, key) in self.keys.iter().enumerate() {
            let key_bytes = key.serialize();
            buf.put_u16_le(key_bytes.len() as u16);
            buf.put_slice(&key_bytes);
            if self.leaf {
                buf.put_slice(&self.values[i].serialize());
            } else {
                buf.put_u64_le(self.children[i + 1]);
            }
        }
        buf.to_vec()
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let value_size = V::FIXED_SIZE.ok_or_else(|| {
            Error::invalid_argument("tree values must have a fixed-size serializer")
        })?;

        let mut reader = ByteReader::new(data);
        let flags = reader.read_u8()?;
        if flags & !FLAG_LEAF != 0 {
            return Err(Error::invalid_format(format!("unknown node flags {:#x}", flags)));
        }
        let leaf = flags & FLAG_LEAF != 0;
        reader.read_u8()?; // padding
        let count = reader.read_u16()? as usize;
        let prev = reader.read_u64()?;
        let next = reader.read_u64()?;

        let mut node = if leaf { Node::leaf() } else { Node::internal() };
        node.prev = prev;
        node.next = next;
        node.keys.reserve(count);

        if !leaf {
            node.children.reserve(count + 1);
            node.children.push(reader.read_u64()?);
        } else {
            node.values.reserve(count);
        }

        for _ in 0..count {
            let key_len = reader.read_u16()? as usize;
            node.keys.push(K::deserialize(reader.take(key_len)?)?);
            if leaf {
                node.values.push(V::deserialize(reader.take(value_size)?)?);
            } else {
                node.children.push(reader.read_u64()?);
            }
        }

        if reader.remaining() != 0 {
            return Err(Error::invalid_format(format!(
                "{} trailing bytes after node",
                reader.remaining()
            )));
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_round_trip() {
        let mut node: Node<String, u64> = Node::leaf();
        node.keys = vec!["apple".into(), "pear".into()];
        node.values = vec![10, 20];
        node.prev = 3;
        node.next = 9;

        let decoded = Node::deserialize(&node.serialize()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_internal_round_trip() {
        let mut node: Node<i64, u64> = Node::internal();
        node.keys = vec![5, 17];
        node.children = vec![1, 2, 3];

        let decoded = Node::deserialize(&node.serialize()).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.prev, NIL);
        assert_eq!(decoded.next, NIL);
    }

    #[test]
    fn test_empty_leaf_round_trip() {
        let node: Node<String, u64> = Node::leaf();
        let decoded: Node<String, u64> = Node::deserialize(&node.serialize()).unwrap();
        assert!(decoded.leaf);
        assert!(decoded.keys.is_empty());
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let node: Node<i64, u64> = Node::leaf();
        let mut bytes = node.serialize();
        bytes[0] |= 0b0100_0000;
        assert!(matches!(
            Node::<i64, u64>::deserialize(&bytes),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_node_rejected() {
        let mut node: Node<i64, u64> = Node::leaf();
        node.keys = vec![1, 2, 3];
        node.values = vec![1, 2, 3];
        let bytes = node.serialize();
        assert!(matches!(
            Node::<i64, u64>::deserialize(&bytes[..bytes.len() - 4]),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_variable_size_value_rejected() {
        let node: Node<i64, String> = Node::leaf();
        assert!(matches!(
            Node::<i64, String>::deserialize(&node.serialize()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
