//! The operation cache: best-effort memoization of recursive DAG operations.
//!
//! Entries are replaced on collision rather than chained — a cache miss just
//! means recomputation, never incorrect output, so there is no need for the
//! bookkeeping a correctness-critical cache would require. Commutative
//! operations canonicalize their operand order before probing so that
//! `plus(a, b)` and `plus(b, a)` share one entry, and a multiply-shaped
//! result additionally seeds its two cheap division inverses.

use dashmap::DashMap;
use qdd_core::config::OpCacheConfig;
use qdd_core::handles::Edge;

/// Which recursive operation produced (or is probing for) a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    ApplyGate,
    ApplyControlledGate,
    Plus,
    Mul,
    Div,
    MatVecMult,
    MatMatMult,
}

impl OpKind {
    /// Commutative op kinds get their two data operands canonically ordered
    /// before the key is built, so `op(a, b)` and `op(b, a)` probe the same
    /// slot.
    fn is_commutative(self) -> bool {
        matches!(self, OpKind::Plus | OpKind::Mul)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    op: OpKind,
    a: Edge,
    b: Edge,
    /// Third operand when present (e.g. the gate id packed as a weight-free
    /// edge); `Edge::zero()` otherwise. Unused for two-operand ops, where it
    /// is always `Edge::zero()` and so never collides across operand shapes.
    c: Edge,
}

/// Canonicalizes operand order for a commutative op kind. Ordering is over
/// the raw handle values, not operand magnitude: any total order is fine, it
/// only needs to be consistent between the two calls being deduplicated.
fn order_inputs(op: OpKind, a: Edge, b: Edge) -> (Edge, Edge) {
    if op.is_commutative() && (a.weight.0, a.node.0) > (b.weight.0, b.node.0) {
        (b, a)
    } else {
        (a, b)
    }
}

pub struct OpCache {
    capacity: usize,
    table: DashMap<CacheKey, Edge>,
    insert_inverses: bool,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl OpCache {
    pub fn new(config: &OpCacheConfig) -> Self {
        Self {
            capacity: config.table_size,
            table: DashMap::new(),
            insert_inverses: config.insert_inverses,
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn key2(op: OpKind, a: Edge, b: Edge) -> CacheKey {
        let (a, b) = order_inputs(op, a, b);
        CacheKey {
            op,
            a,
            b,
            c: Edge::zero(),
        }
    }

    fn key3(op: OpKind, a: Edge, b: Edge, c: Edge) -> CacheKey {
        CacheKey { op, a, b, c }
    }

    pub fn get2(&self, op: OpKind, a: Edge, b: Edge) -> Option<Edge> {
        use std::sync::atomic::Ordering::Relaxed;
        let hit = self.table.get(&Self::key2(op, a, b)).map(|r| *r);
        if hit.is_some() {
            self.hits.fetch_add(1, Relaxed);
        } else {
            self.misses.fetch_add(1, Relaxed);
        }
        hit
    }

    pub fn get3(&self, op: OpKind, a: Edge, b: Edge, c: Edge) -> Option<Edge> {
        use std::sync::atomic::Ordering::Relaxed;
        let hit = self.table.get(&Self::key3(op, a, b, c)).map(|r| *r);
        if hit.is_some() {
            self.hits.fetch_add(1, Relaxed);
        } else {
            self.misses.fetch_add(1, Relaxed);
        }
        hit
    }

    /// Inserts a two-operand result. Silently overwrites the previous entry
    /// at this slot, if any, once the table is at capacity — no eviction
    /// policy beyond "last writer wins".
    pub fn put2(&self, op: OpKind, a: Edge, b: Edge, result: Edge) {
        if self.table.len() < self.capacity || self.table.contains_key(&Self::key2(op, a, b)) {
            self.table.insert(Self::key2(op, a, b), result);
        }
    }

    pub fn put3(&self, op: OpKind, a: Edge, b: Edge, c: Edge, result: Edge) {
        if self.table.len() < self.capacity || self.table.contains_key(&Self::key3(op, a, b, c)) {
            self.table.insert(Self::key3(op, a, b, c), result);
        }
    }

    /// Inserts a `Mul(a, b) = c` result, and when `insert_inverses` is
    /// enabled also seeds the two cheap division facts it implies:
    /// `Div(c, a) = b` and `Div(c, b) = a`.
    pub fn put_mul(&self, a: Edge, b: Edge, c: Edge) {
        self.put2(OpKind::Mul, a, b, c);
        if self.insert_inverses {
            self.put2(OpKind::Div, c, a, b);
            self.put2(OpKind::Div, c, b, a);
        }
    }

    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn hit_rate(&self) -> f64 {
        use std::sync::atomic::Ordering::Relaxed;
        let hits = self.hits.load(Relaxed) as f64;
        let misses = self.misses.load(Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }

    /// Drops every entry. Called on GC (handles are about to be invalidated)
    /// and whenever the dynamic gate-id ring wraps (a cached entry keyed on a
    /// ring slot could otherwise alias a stale angle onto a fresh one).
    pub fn clear(&self) {
        self.table.clear();
        self.hits.store(0, std::sync::atomic::Ordering::SeqCst);
        self.misses.store(0, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::handles::{NodeHandle, WeightHandle};

    fn config() -> OpCacheConfig {
        OpCacheConfig {
            table_size: 64,
            cache_granularity: 1,
            insert_inverses: true,
        }
    }

    fn edge(w: u64, n: u64) -> Edge {
        Edge::new(WeightHandle(w), NodeHandle(n))
    }

    #[test]
    fn commutative_op_shares_entry_regardless_of_order() {
        let cache = OpCache::new(&config());
        let a = edge(1, 2);
        let b = edge(3, 4);
        let result = edge(5, 6);
        cache.put2(OpKind::Plus, a, b, result);
        assert_eq!(cache.get2(OpKind::Plus, b, a), Some(result));
    }

    #[test]
    fn non_commutative_op_distinguishes_order() {
        let cache = OpCache::new(&config());
        let a = edge(1, 2);
        let b = edge(3, 4);
        cache.put2(OpKind::Div, a, b, edge(9, 9));
        assert_eq!(cache.get2(OpKind::Div, b, a), None);
    }

    #[test]
    fn mul_seeds_inverse_relations() {
        let cache = OpCache::new(&config());
        let a = edge(1, 1);
        let b = edge(2, 2);
        let c = edge(3, 3);
        cache.put_mul(a, b, c);
        assert_eq!(cache.get2(OpKind::Div, c, a), Some(b));
        assert_eq!(cache.get2(OpKind::Div, c, b), Some(a));
    }

    #[test]
    fn clear_empties_the_table_and_stats() {
        let cache = OpCache::new(&config());
        cache.put2(OpKind::Plus, edge(1, 1), edge(2, 2), edge(3, 3));
        cache.get2(OpKind::Plus, edge(1, 1), edge(2, 2));
        cache.clear();
        assert_eq!(cache.count(), 0);
        assert_eq!(cache.hit_rate(), 0.0);
    }
}
