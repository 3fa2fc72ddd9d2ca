//! Persisted ordered index: a disk-resident B+Tree.
//!
//! The tree maps a comparable key type to a fixed-size value (in practice
//! a record locator) and keeps its nodes in storage pages rather than an
//! in-memory pointer graph. Node persistence goes through the [`NodePager`]
//! abstraction, which has two implementations:
//!
//! - [`MemoryNodePager`] keeps serialized nodes in a map, for tests and
//!   scratch indexes.
//! - [`RecordNodePager`] pages nodes through [record
//!   storage](crate::record::RecordStorage), with the root pointer persisted
//!   in a small header record.
//!
//! Both round-trip every node through the same binary codec, so the memory
//! variant exercises exactly the layout the disk variant stores.

pub mod btree;
pub mod node;
pub mod pager;

pub use btree::{BTree, TreeCursor};
pub use node::{Node, NodeId};
pub use pager::{MemoryNodePager, NodePager, RecordNodePager};
