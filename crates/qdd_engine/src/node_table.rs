//! The node table: hash-consed storage for unweighted QDD nodes.
//!
//! A node is identified purely by its variable index and the two (edge-weight,
//! child-node) pairs below it; nodes carry no weight of their own (invariant
//! 5). Uniqueness here is what makes the whole structure a DAG rather than a
//! tree: two callers building the same sub-decision get back the same handle.

use dashmap::DashMap;
use qdd_core::config::NodeTableConfig;
use qdd_core::error::{QddError, Result, TableKind};
use qdd_core::handles::{Edge, NodeHandle, TERMINAL};
use std::sync::atomic::{AtomicU64, Ordering};

/// The three-field key identifying a node: its variable index and its two
/// children (each a full weighted edge, since sharing is keyed on the
/// *unweighted* sub-diagram but an edge is how a child is referenced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub var: u32,
    pub low: Edge,
    pub high: Edge,
}

pub struct NodeTable {
    capacity: usize,
    forward: DashMap<NodeKey, NodeHandle>,
    reverse: DashMap<u64, NodeKey>,
    next: AtomicU64,
}

impl NodeTable {
    pub fn new(config: &NodeTableConfig) -> Self {
        let table = Self {
            capacity: config.table_size,
            forward: DashMap::new(),
            reverse: DashMap::new(),
            next: AtomicU64::new(0),
        };
        // TERMINAL is reserved handle 0; it has no real key, but reserving the
        // counter slot keeps every other handle's numeric value stable.
        table.next.store(1, Ordering::SeqCst);
        table
    }

    /// Finds the existing node matching `key`, or inserts and returns a new
    /// handle. Returns `TableFull` once the configured logical capacity is
    /// exhausted.
    pub fn find_or_put(&self, key: NodeKey) -> Result<NodeHandle> {
        if let Some(existing) = self.forward.get(&key) {
            return Ok(*existing);
        }
        if self.reverse.len() >= self.capacity {
            return Err(QddError::TableFull(TableKind::Node));
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let handle = NodeHandle(id);
        self.reverse.insert(id, key);
        self.forward.entry(key).or_insert(handle);
        Ok(*self.forward.get(&key).expect("just inserted"))
    }

    /// Looks up a node's key. Panics on `TERMINAL`, which has no key: callers
    /// must check `node == TERMINAL` before calling this (every recursive DAG
    /// walk does, since it is also the recursion base case).
    pub fn get(&self, handle: NodeHandle) -> NodeKey {
        debug_assert_ne!(handle, TERMINAL, "terminal node has no key");
        *self
            .reverse
            .get(&handle.0)
            .expect("node handle from this table")
    }

    pub fn count(&self) -> usize {
        self.reverse.len()
    }

    /// Clears every entry, for use only by the GC rebuild.
    pub fn clear(&self) {
        self.forward.clear();
        self.reverse.clear();
        self.next.store(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize) -> NodeTableConfig {
        NodeTableConfig { table_size: size }
    }

    #[test]
    fn identical_keys_share_a_handle() {
        let table = NodeTable::new(&config(16));
        let key = NodeKey {
            var: 0,
            low: Edge::zero(),
            high: Edge::one(),
        };
        let a = table.find_or_put(key).unwrap();
        let b = table.find_or_put(key).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_handles() {
        let table = NodeTable::new(&config(16));
        let a = table
            .find_or_put(NodeKey {
                var: 0,
                low: Edge::zero(),
                high: Edge::one(),
            })
            .unwrap();
        let b = table
            .find_or_put(NodeKey {
                var: 1,
                low: Edge::zero(),
                high: Edge::one(),
            })
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn table_full_once_capacity_exhausted() {
        let table = NodeTable::new(&config(1));
        table
            .find_or_put(NodeKey {
                var: 0,
                low: Edge::zero(),
                high: Edge::one(),
            })
            .unwrap();
        let err = table
            .find_or_put(NodeKey {
                var: 1,
                low: Edge::zero(),
                high: Edge::one(),
            })
            .unwrap_err();
        assert!(err.is_table_full());
    }
}
