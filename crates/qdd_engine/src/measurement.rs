//! Amplitude extraction and measurement: Born-rule probability, collapse,
//! renormalisation, and shot sampling.
//!
//! The shape mirrors `StateVectorSimulator::measure`/`measure_qubit` from the
//! dense state-vector simulator this engine replaces — marginal probability
//! by summing squared magnitudes, rejection-free sampling against a single
//! uniform draw, collapse by zeroing the unchosen branch, renormalise by
//! `1/sqrt(p)` — re-expressed as a DAG walk instead of a linear scan over a
//! dense amplitude array.

use std::collections::HashMap;

use qdd_core::config::NormalisationScheme;
use qdd_core::handles::{Edge, NodeHandle, C64, TERMINAL, W_ZERO};
use qdd_core::Result;
use rand::Rng;

use crate::dag_ops::{self};
use crate::node_table::NodeTable;
use crate::op_cache::OpCache;
use crate::weight_store::WeightStore;

fn var_of(nodes: &NodeTable, node: NodeHandle) -> u32 {
    if node == TERMINAL {
        u32::MAX
    } else {
        nodes.get(node).var
    }
}

/// Reads a single basis-state amplitude by walking the DAG along the path
/// `bits` dictates, multiplying edge weights as it goes. `bits[i]` is qubit
/// `i`'s value.
pub fn get_amplitude(store: &WeightStore, nodes: &NodeTable, cache: &OpCache, edge: Edge, bits: &[bool]) -> Result<C64> {
    let mut cur = edge;
    for (i, &bit) in bits.iter().enumerate() {
        if cur.is_zero() {
            return Ok(C64::new(0.0, 0.0));
        }
        let (c0, c1) = dag_ops::cofactor_at(nodes, store, cache, cur, i as u32)?;
        cur = if bit { c1 } else { c0 };
    }
    if cur.is_zero() {
        return Ok(C64::new(0.0, 0.0));
    }
    Ok(store.get(cur.weight))
}

/// Sum of squared edge-weight magnitudes over every basis state reachable
/// from `node`, assuming `node` is reached with weight 1. Memoized per node,
/// since this value depends only on the node's own subtree.
fn subtree_norm_sqr(store: &WeightStore, nodes: &NodeTable, node: NodeHandle, memo: &mut HashMap<NodeHandle, f64>) -> f64 {
    if node == TERMINAL {
        return 1.0;
    }
    if let Some(&v) = memo.get(&node) {
        return v;
    }
    let key = nodes.get(node);
    let low_w2 = store.get(key.low.weight).norm_sqr();
    let high_w2 = store.get(key.high.weight).norm_sqr();
    let low_total = if key.low.is_zero() {
        0.0
    } else {
        subtree_norm_sqr(store, nodes, key.low.node, memo)
    };
    let high_total = if key.high.is_zero() {
        0.0
    } else {
        subtree_norm_sqr(store, nodes, key.high.node, memo)
    };
    let v = low_w2 * low_total + high_w2 * high_total;
    memo.insert(node, v);
    v
}

/// Total squared norm of the state rooted at `edge` — should be 1 for any
/// properly normalised state; exposed mainly for self-test / invariant
/// checks and for the "random sequence sums to 1" testable property.
pub fn total_norm_sqr(store: &WeightStore, nodes: &NodeTable, edge: Edge) -> f64 {
    if edge.is_zero() {
        return 0.0;
    }
    let w2 = store.get(edge.weight).norm_sqr();
    let mut memo = HashMap::new();
    w2 * subtree_norm_sqr(store, nodes, edge.node, &mut memo)
}

/// `(p0, p1)` mass for `node`'s subtree split by qubit `q`'s value, assuming
/// unit incoming weight. A node whose variable is past `q` (q missing from
/// the diagram below this point) contributes half its total mass to each
/// branch — the two basis-state families differing only in bit `q` share
/// the exact same amplitude at every such node, by the non-redundancy
/// collapse that got them merged in the first place.
fn unit_prob0_prob1(
    store: &WeightStore,
    nodes: &NodeTable,
    node: NodeHandle,
    q: u32,
    memo: &mut HashMap<NodeHandle, (f64, f64)>,
) -> (f64, f64) {
    if node == TERMINAL {
        return (0.5, 0.5);
    }
    if let Some(&v) = memo.get(&node) {
        return v;
    }
    let key = nodes.get(node);
    let result = if key.var == q {
        let low_w2 = store.get(key.low.weight).norm_sqr();
        let high_w2 = store.get(key.high.weight).norm_sqr();
        let low_total = if key.low.is_zero() {
            0.0
        } else {
            subtree_norm_sqr(store, nodes, key.low.node, &mut HashMap::new())
        };
        let high_total = if key.high.is_zero() {
            0.0
        } else {
            subtree_norm_sqr(store, nodes, key.high.node, &mut HashMap::new())
        };
        (low_w2 * low_total, high_w2 * high_total)
    } else if key.var > q {
        let total = subtree_norm_sqr(store, nodes, node, &mut HashMap::new());
        (0.5 * total, 0.5 * total)
    } else {
        let low_w2 = store.get(key.low.weight).norm_sqr();
        let high_w2 = store.get(key.high.weight).norm_sqr();
        let (l0, l1) = if key.low.is_zero() {
            (0.0, 0.0)
        } else {
            unit_prob0_prob1(store, nodes, key.low.node, q, memo)
        };
        let (h0, h1) = if key.high.is_zero() {
            (0.0, 0.0)
        } else {
            unit_prob0_prob1(store, nodes, key.high.node, q, memo)
        };
        (low_w2 * l0 + high_w2 * h0, low_w2 * l1 + high_w2 * h1)
    };
    memo.insert(node, result);
    result
}

/// Marginal probability that qubit `q` measures `0`.
pub fn probability_zero(store: &WeightStore, nodes: &NodeTable, edge: Edge, q: u32) -> f64 {
    if edge.is_zero() {
        return 0.0;
    }
    let w2 = store.get(edge.weight).norm_sqr();
    let v = var_of(nodes, edge.node);
    if v > q {
        return 0.5 * w2 * subtree_norm_sqr(store, nodes, edge.node, &mut HashMap::new());
    }
    let mut memo = HashMap::new();
    let (p0, _p1) = unit_prob0_prob1(store, nodes, edge.node, q, &mut memo);
    w2 * p0
}

/// Projects `edge` onto qubit `q == outcome` and rescales by `inv_sqrt_p` so
/// the result is renormalised. Rebuilds the DAG bottom-up rather than
/// mutating any shared node in place, since nodes are immutable and may be
/// reachable from other roots that should not observe this collapse.
fn collapse_qubit(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    edge: Edge,
    q: u32,
    outcome: u8,
    inv_sqrt_p: f64,
) -> Result<Edge> {
    if edge.is_zero() {
        return Ok(Edge::zero());
    }
    let v = var_of(nodes, edge.node);
    if v > q {
        let scaled = store.get(edge.weight) * C64::new(inv_sqrt_p, 0.0);
        let nw = store.find_or_put(scaled)?;
        return Ok(if nw == W_ZERO {
            Edge::zero()
        } else {
            Edge::new(nw, edge.node)
        });
    }
    if v < q {
        let key = nodes.get(edge.node);
        let low_r = collapse_qubit(store, nodes, cache, scheme, key.low, q, outcome, inv_sqrt_p)?;
        let high_r = collapse_qubit(store, nodes, cache, scheme, key.high, q, outcome, inv_sqrt_p)?;
        let built = dag_ops::normalise_build(store, nodes, cache, scheme, v, low_r, high_r)?;
        let w = crate::arithmetic::mul(store, cache, edge.weight, built.weight)?;
        return Ok(if w == W_ZERO {
            Edge::zero()
        } else {
            Edge::new(w, built.node)
        });
    }
    // v == q: project onto the chosen branch, discard the other.
    let key = nodes.get(edge.node);
    let kept = if outcome == 0 { key.low } else { key.high };
    if kept.is_zero() {
        return Ok(Edge::zero());
    }
    let combined = store.get(kept.weight) * store.get(edge.weight) * C64::new(inv_sqrt_p, 0.0);
    let nw = store.find_or_put(combined)?;
    Ok(if nw == W_ZERO {
        Edge::zero()
    } else {
        Edge::new(nw, kept.node)
    })
}

/// Samples qubit `q`'s outcome against `rng`, collapses and renormalises.
/// Returns `(outcome, probability of that outcome, collapsed edge)`.
///
/// A branch probability below the store's tolerance is a precision-loss
/// condition, not a hard error: the collapse still proceeds (division is
/// clamped against the tolerance floor) so the caller always gets a usable
/// edge back, with the near-zero probability as a signal to treat the
/// outcome with suspicion.
pub fn measure_qubit(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    edge: Edge,
    q: u32,
    rng: &mut impl Rng,
) -> Result<(u8, f64, Edge)> {
    let p0 = probability_zero(store, nodes, edge, q);
    let draw: f64 = rng.gen();
    let (outcome, p) = if draw < p0 { (0u8, p0) } else { (1u8, 1.0 - p0) };
    let floor = store.tolerance().max(1e-300);
    let safe_p = p.max(floor);
    let inv_sqrt_p = 1.0 / safe_p.sqrt();
    let collapsed = collapse_qubit(store, nodes, cache, scheme, edge, q, outcome, inv_sqrt_p)?;
    Ok((outcome, p, collapsed))
}

/// Measures every qubit `0..num_qubits` in ascending order, each collapse
/// informing the probabilities seen by the next (eager ordering — see the
/// doc comment on `Engine::measure_all`, which carries the same design
/// decision).
pub fn measure_all(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    edge: Edge,
    num_qubits: usize,
    rng: &mut impl Rng,
) -> Result<(Vec<u8>, Edge)> {
    let mut cur = edge;
    let mut outcomes = Vec::with_capacity(num_qubits);
    for q in 0..num_qubits as u32 {
        let (bit, _p, next) = measure_qubit(store, nodes, cache, scheme, cur, q, rng)?;
        outcomes.push(bit);
        cur = next;
    }
    Ok((outcomes, cur))
}

/// Samples `shots` independent full-register measurements against the same
/// root, without ever collapsing it: each shot runs `measure_all` starting
/// fresh from `edge` (an `Edge` is a cheap value to copy; nothing in the
/// shared tables is mutated by reading it). Returns bitstring counts keyed
/// MSB-first by qubit index (qubit 0's outcome is the leftmost character).
pub fn sample(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    edge: Edge,
    num_qubits: usize,
    shots: usize,
    rng: &mut impl Rng,
) -> Result<HashMap<String, usize>> {
    let mut counts = HashMap::new();
    for _ in 0..shots {
        let (bits, _collapsed) = measure_all(store, nodes, cache, scheme, edge, num_qubits, rng)?;
        let s: String = bits.iter().map(|&b| if b == 1 { '1' } else { '0' }).collect();
        *counts.entry(s).or_insert(0) += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::config::{NodeTableConfig, OpCacheConfig, WeightBackend, WeightStoreConfig};
    use qdd_core::physics;
    use rand::SeedableRng;

    fn fresh() -> (WeightStore, NodeTable, OpCache) {
        let store = WeightStore::new(&WeightStoreConfig {
            table_size: 1 << 12,
            tolerance: 1e-10,
            backend: WeightBackend::ComplexMap,
        });
        let nodes = NodeTable::new(&NodeTableConfig { table_size: 1 << 12 });
        let cache = OpCache::new(&OpCacheConfig {
            table_size: 256,
            cache_granularity: 1,
            insert_inverses: true,
        });
        (store, nodes, cache)
    }

    fn gate(store: &WeightStore, m: physics::Matrix2x2) -> crate::gate_catalogue::GateEntry {
        crate::gate_catalogue::GateEntry {
            m00: store.find_or_put(m[0][0]).unwrap(),
            m01: store.find_or_put(m[0][1]).unwrap(),
            m10: store.find_or_put(m[1][0]).unwrap(),
            m11: store.find_or_put(m[1][1]).unwrap(),
        }
    }

    #[test]
    fn bell_pair_marginal_is_fair_coin() {
        let (store, nodes, cache) = fresh();
        let scheme = NormalisationScheme::LowNonZero;
        let state = crate::dag_ops::all_zero_state(&store, &nodes, &cache, scheme, 2).unwrap();
        let h = gate(&store, physics::HADAMARD);
        let x = gate(&store, physics::PAULI_X);
        let after_h = crate::dag_ops::apply_gate(&store, &nodes, &cache, scheme, state, &h, 0, 0, 1).unwrap();
        let bell = crate::dag_ops::apply_controlled_gate(
            &store, &nodes, &cache, scheme, after_h, &x, &[0], 1, 0, 1,
        )
        .unwrap();
        let p0 = probability_zero(&store, &nodes, bell, 0);
        assert!((p0 - 0.5).abs() < 1e-9);
        assert!((total_norm_sqr(&store, &nodes, bell) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn measuring_bell_pair_gives_matching_outcomes() {
        let (store, nodes, cache) = fresh();
        let scheme = NormalisationScheme::LowNonZero;
        let state = crate::dag_ops::all_zero_state(&store, &nodes, &cache, scheme, 2).unwrap();
        let h = gate(&store, physics::HADAMARD);
        let x = gate(&store, physics::PAULI_X);
        let after_h = crate::dag_ops::apply_gate(&store, &nodes, &cache, scheme, state, &h, 0, 0, 1).unwrap();
        let bell = crate::dag_ops::apply_controlled_gate(
            &store, &nodes, &cache, scheme, after_h, &x, &[0], 1, 0, 1,
        )
        .unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let (outcomes, collapsed) = measure_all(&store, &nodes, &cache, scheme, bell, 2, &mut rng).unwrap();
        assert_eq!(outcomes[0], outcomes[1]);
        assert!((total_norm_sqr(&store, &nodes, collapsed) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sample_counts_only_correlated_bitstrings() {
        let (store, nodes, cache) = fresh();
        let scheme = NormalisationScheme::LowNonZero;
        let state = crate::dag_ops::all_zero_state(&store, &nodes, &cache, scheme, 2).unwrap();
        let h = gate(&store, physics::HADAMARD);
        let x = gate(&store, physics::PAULI_X);
        let after_h = crate::dag_ops::apply_gate(&store, &nodes, &cache, scheme, state, &h, 0, 0, 1).unwrap();
        let bell = crate::dag_ops::apply_controlled_gate(
            &store, &nodes, &cache, scheme, after_h, &x, &[0], 1, 0, 1,
        )
        .unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let counts = sample(&store, &nodes, &cache, scheme, bell, 2, 200, &mut rng).unwrap();
        for key in counts.keys() {
            assert!(key == "00" || key == "11");
        }
    }

    #[test]
    fn get_amplitude_matches_basis_state() {
        let (store, nodes, cache) = fresh();
        let scheme = NormalisationScheme::LowNonZero;
        let state = crate::dag_ops::all_zero_state(&store, &nodes, &cache, scheme, 2).unwrap();
        let amp00 = get_amplitude(&store, &nodes, &cache, state, &[false, false]).unwrap();
        let amp01 = get_amplitude(&store, &nodes, &cache, state, &[false, true]).unwrap();
        assert!((amp00 - C64::new(1.0, 0.0)).norm() < 1e-9);
        assert!(amp01.norm() < 1e-9);
    }
}
