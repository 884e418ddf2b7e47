//! Garbage collection: the only operation that replaces the weight store,
//! node table and op cache wholesale instead of mutating them in place.
//!
//! There is no mark-and-sweep over the existing tables — hash-consed,
//! append-only tables like these don't support freeing an individual entry
//! cheaply, since any other live node could share it. Instead GC rebuilds
//! fresh tables by walking every registered root and re-interning what it
//! finds, memoizing the (old node -> new edge) mapping so shared structure
//! is re-shared rather than duplicated. Everything not reachable from a
//! registered root is simply never copied over — that is the "collection".
//!
//! `Engine` treats this as a global barrier: it takes the write lock on its
//! table snapshot only for the brief pointer swap at the end, after the
//! (potentially large) rebuild has already completed against a read-only
//! view of the old tables.

use std::collections::HashMap;

use qdd_core::config::EngineConfig;
use qdd_core::handles::{Edge, NodeHandle, TERMINAL};
use qdd_core::Result;

use crate::gate_catalogue::GateCatalogue;
use crate::node_table::{NodeKey, NodeTable};
use crate::op_cache::OpCache;
use crate::weight_store::WeightStore;

/// The three hash-consed tables plus the interned gate catalogue, rebuilt
/// together as one unit on every GC cycle.
pub struct Tables {
    pub weights: WeightStore,
    pub nodes: NodeTable,
    pub op_cache: OpCache,
    pub gates: GateCatalogue,
}

impl Tables {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let weights = WeightStore::new(&config.weight_store);
        let nodes = NodeTable::new(&config.node_table);
        let op_cache = OpCache::new(&config.op_cache);
        let gates = GateCatalogue::new(&weights)?;
        Ok(Self {
            weights,
            nodes,
            op_cache,
            gates,
        })
    }
}

fn reintern_edge(
    old: &Tables,
    new_weights: &WeightStore,
    new_nodes: &NodeTable,
    memo: &mut HashMap<NodeHandle, NodeHandle>,
    edge: Edge,
) -> Result<Edge> {
    if edge.is_zero() {
        return Ok(Edge::zero());
    }
    let value = old.weights.get(edge.weight);
    let new_weight = new_weights.find_or_put(value)?;
    if edge.node == TERMINAL {
        return Ok(Edge::new(new_weight, TERMINAL));
    }
    if let Some(&new_node) = memo.get(&edge.node) {
        return Ok(Edge::new(new_weight, new_node));
    }
    let key = old.nodes.get(edge.node);
    let new_low = reintern_edge(old, new_weights, new_nodes, memo, key.low)?;
    let new_high = reintern_edge(old, new_weights, new_nodes, memo, key.high)?;
    let new_node = new_nodes.find_or_put(NodeKey {
        var: key.var,
        low: new_low,
        high: new_high,
    })?;
    memo.insert(edge.node, new_node);
    Ok(Edge::new(new_weight, new_node))
}

/// Rebuilds every root in `roots` against fresh tables, and returns the
/// fresh `Tables` together with the rewritten root edges (in the same order
/// they were given). Reserved handles (`W_ZERO`/`W_ONE`/`W_MINUS_ONE`,
/// `TERMINAL`) are preserved automatically: every fresh table seeds them
/// identically at construction, before any rebuild traffic touches it.
pub fn collect(
    config: &EngineConfig,
    old: &Tables,
    roots: &[Edge],
) -> Result<(Tables, Vec<Edge>)> {
    let fresh = Tables::new(config)?;
    let mut memo = HashMap::new();
    let mut rewritten = Vec::with_capacity(roots.len());
    for &root in roots {
        rewritten.push(reintern_edge(
            old,
            &fresh.weights,
            &fresh.nodes,
            &mut memo,
            root,
        )?);
    }
    Ok((fresh, rewritten))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::config::NormalisationScheme;
    use qdd_core::handles::W_ONE;

    #[test]
    fn gc_preserves_amplitudes_of_a_registered_root() {
        let config = EngineConfig::default();
        let old = Tables::new(&config).unwrap();
        let scheme = NormalisationScheme::LowNonZero;
        let state = crate::dag_ops::all_zero_state(&old.weights, &old.nodes, &old.op_cache, scheme, 2).unwrap();
        let h = old.gates.static_entry(qdd_core::gate_catalogue::GATE_H);
        let x = old.gates.static_entry(qdd_core::gate_catalogue::GATE_X);
        let after_h =
            crate::dag_ops::apply_gate(&old.weights, &old.nodes, &old.op_cache, scheme, state, &h, 0, 0, 1)
                .unwrap();
        let bell = crate::dag_ops::apply_controlled_gate(
            &old.weights,
            &old.nodes,
            &old.op_cache,
            scheme,
            after_h,
            &x,
            &[0],
            1,
            0,
            1,
        )
        .unwrap();

        let (fresh, rewritten) = collect(&config, &old, &[bell]).unwrap();
        let new_bell = rewritten[0];
        assert_eq!(fresh.weights.get(W_ONE), old.weights.get(W_ONE));

        let amp00_old =
            crate::measurement::get_amplitude(&old.weights, &old.nodes, &old.op_cache, bell, &[false, false]).unwrap();
        let amp00_new =
            crate::measurement::get_amplitude(&fresh.weights, &fresh.nodes, &fresh.op_cache, new_bell, &[false, false])
                .unwrap();
        assert!((amp00_old - amp00_new).norm() < 1e-9);

        let amp11_old =
            crate::measurement::get_amplitude(&old.weights, &old.nodes, &old.op_cache, bell, &[true, true]).unwrap();
        let amp11_new =
            crate::measurement::get_amplitude(&fresh.weights, &fresh.nodes, &fresh.op_cache, new_bell, &[true, true])
                .unwrap();
        assert!((amp11_old - amp11_new).norm() < 1e-9);
    }

    #[test]
    fn gc_rebuild_shares_structure_across_multiple_roots() {
        let config = EngineConfig::default();
        let old = Tables::new(&config).unwrap();
        let scheme = NormalisationScheme::LowNonZero;
        let a = crate::dag_ops::all_zero_state(&old.weights, &old.nodes, &old.op_cache, scheme, 3).unwrap();
        let b = crate::dag_ops::all_zero_state(&old.weights, &old.nodes, &old.op_cache, scheme, 3).unwrap();
        assert_eq!(a.node, b.node);

        let (fresh, rewritten) = collect(&config, &old, &[a, b]).unwrap();
        assert_eq!(rewritten[0].node, rewritten[1].node);
        assert!(fresh.nodes.count() <= old.nodes.count());
    }
}
