//! Recursive DAG operations: gate application, controlled-gate application,
//! edge-edge addition, and matrix-vector / matrix-matrix multiply.
//!
//! Every operation here follows the same shape, borrowed from the classic
//! BDD apply algorithm (terminal/base case -> probe the op cache -> cofactor
//! by the smallest remaining variable -> recurse on each cofactor -> rebuild
//! and normalise -> insert into the op cache -> return). The cofactor step is
//! what encodes the "missing variable" convention: a level the DAG hasn't
//! branched on yet behaves as if both children were the same edge.
//!
//! Top-level callers (`engine.rs`) strip the incoming edge's weight to
//! `W_ONE` before recursing and re-multiply it back in afterwards, so the op
//! cache only ever sees structurally-shaped keys; that is the discipline
//! described for the op cache module, applied here rather than there.
//!
//! Near the root, a node's two cofactors are independent subproblems and are
//! forked onto `rayon`'s work-stealing pool with `rayon::join` rather than
//! computed back-to-back; `should_fork` stops spawning once the recursion
//! passes a fixed depth, where the subtrees are too small to be worth the
//! task overhead.

use qdd_core::config::NormalisationScheme;
use qdd_core::handles::{Edge, NodeHandle, TERMINAL, W_ZERO};
use qdd_core::Result;

use crate::gate_catalogue::GateEntry;
use crate::node_table::{NodeKey, NodeTable};
use crate::op_cache::{OpCache, OpKind};
use crate::weight_store::WeightStore;
use crate::{arithmetic, normaliser};

/// Skip cache probes below this recursion depth relative to `granularity`;
/// `granularity == 1` probes every level, matching the common case.
fn should_probe(depth: u32, granularity: u32) -> bool {
    granularity <= 1 || depth % granularity == 0
}

/// Recursion depth below which a node's two cofactors are still forked as
/// independent `rayon` tasks (per the work-stealing scheduling model: each
/// DAG operation may spawn its two children and join them). Past this depth
/// the subtrees are small enough that spawning overhead would outweigh the
/// parallelism, so the recursion continues sequentially.
const PARALLEL_DEPTH_CUTOFF: u32 = 6;

fn should_fork(depth: u32) -> bool {
    depth < PARALLEL_DEPTH_CUTOFF
}

fn var_of(nodes: &NodeTable, node: NodeHandle) -> u32 {
    if node == TERMINAL {
        u32::MAX
    } else {
        nodes.get(node).var
    }
}

/// Scales an edge's weight by `w`, collapsing to the canonical zero edge
/// (invariant 5) if the product vanishes.
pub(crate) fn scale(store: &WeightStore, cache: &OpCache, edge: Edge, w: qdd_core::handles::WeightHandle) -> Result<Edge> {
    if edge.is_zero() {
        return Ok(Edge::zero());
    }
    let nw = arithmetic::mul_downward(store, cache, edge.weight, w)?;
    Ok(if nw == W_ZERO {
        Edge::zero()
    } else {
        Edge::new(nw, edge.node)
    })
}

/// Returns `(low, high)` for `edge` at `var`: the node's real children,
/// scaled by the incoming edge weight, if `edge` branches on `var`; or the
/// same edge twice if `var` is missing from the diagram below this point
/// (the "don't care" convention — the value is identical either way).
pub(crate) fn cofactor_at(
    nodes: &NodeTable,
    store: &WeightStore,
    cache: &OpCache,
    edge: Edge,
    var: u32,
) -> Result<(Edge, Edge)> {
    if edge.is_zero() {
        return Ok((Edge::zero(), Edge::zero()));
    }
    let v = var_of(nodes, edge.node);
    if v > var {
        return Ok((edge, edge));
    }
    debug_assert_eq!(v, var, "cofactor_at called below the node's own variable");
    let key = nodes.get(edge.node);
    Ok((
        scale(store, cache, key.low, edge.weight)?,
        scale(store, cache, key.high, edge.weight)?,
    ))
}

/// Builds a node at `var` from two already-computed child edges, applying
/// weight normalisation and the non-redundancy collapse (invariant 2): if
/// the normalised children are identical, the node is never inserted and the
/// shared child edge is returned directly, scaled by the extracted scalar.
pub(crate) fn normalise_build(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    var: u32,
    low: Edge,
    high: Edge,
) -> Result<Edge> {
    let n = normaliser::normalise(store, cache, scheme, low.weight, high.weight)?;
    let low_e = if n.low == W_ZERO {
        Edge::zero()
    } else {
        Edge::new(n.low, low.node)
    };
    let high_e = if n.high == W_ZERO {
        Edge::zero()
    } else {
        Edge::new(n.high, high.node)
    };
    if low_e == high_e {
        return Ok(Edge::new(n.scalar, low_e.node));
    }
    let node = nodes.find_or_put(NodeKey {
        var,
        low: low_e,
        high: high_e,
    })?;
    Ok(Edge::new(n.scalar, node))
}

/// Edge-edge addition. `a.node == b.node` is the fast path the store's
/// arithmetic already exploits everywhere else: same sub-diagram, so the
/// edges simply add their weights. Otherwise cofactors on the smaller of the
/// two variables and recurses, same shape as every other op here.
pub fn plus(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    a: Edge,
    b: Edge,
    depth: u32,
    granularity: u32,
) -> Result<Edge> {
    if a.is_zero() {
        return Ok(b);
    }
    if b.is_zero() {
        return Ok(a);
    }
    if a.node == b.node {
        let w = arithmetic::add(store, a.weight, b.weight)?;
        return Ok(if w == W_ZERO {
            Edge::zero()
        } else {
            Edge::new(w, a.node)
        });
    }
    let probe = should_probe(depth, granularity);
    if probe {
        if let Some(hit) = cache.get2(OpKind::Plus, a, b) {
            return Ok(hit);
        }
    }
    let v = var_of(nodes, a.node).min(var_of(nodes, b.node));
    let (a0, a1) = cofactor_at(nodes, store, cache, a, v)?;
    let (b0, b1) = cofactor_at(nodes, store, cache, b, v)?;
    let (low, high) = if should_fork(depth) {
        let (lo, hi) = rayon::join(
            || plus(store, nodes, cache, scheme, a0, b0, depth + 1, granularity),
            || plus(store, nodes, cache, scheme, a1, b1, depth + 1, granularity),
        );
        (lo?, hi?)
    } else {
        (
            plus(store, nodes, cache, scheme, a0, b0, depth + 1, granularity)?,
            plus(store, nodes, cache, scheme, a1, b1, depth + 1, granularity)?,
        )
    };
    let result = normalise_build(store, nodes, cache, scheme, v, low, high)?;
    if probe {
        cache.put2(OpKind::Plus, a, b, result);
    }
    Ok(result)
}

/// Packs a gate entry and a target qubit into a synthetic `Edge` used only
/// as the op cache's third key component; never dereferenced as a real edge.
fn gate_tag(gate: &GateEntry, target: u32) -> Edge {
    let mut h: u64 = 0xcbf29ce484222325;
    for part in [gate.m00.0, gate.m01.0, gate.m10.0, gate.m11.0, target as u64] {
        h ^= part;
        h = h.wrapping_mul(0x100000001b3);
    }
    Edge::new(
        qdd_core::handles::WeightHandle(target as u64),
        NodeHandle(h),
    )
}

/// Applies a single-qubit unitary to `edge` at `target`.
///
/// `v > target` (including the terminal, `var == u32::MAX`) and `v ==
/// target` both cofactor cleanly through `cofactor_at` and combine via the
/// same linear formula — that unification is what collapses what would
/// otherwise be two separate branches in the textbook description into one.
/// Only `v < target` needs its own branch, recursing past an intervening
/// variable and reassembling at `v`.
#[allow(clippy::too_many_arguments)]
pub fn apply_gate(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    edge: Edge,
    gate: &GateEntry,
    target: u32,
    depth: u32,
    granularity: u32,
) -> Result<Edge> {
    if edge.is_zero() {
        return Ok(Edge::zero());
    }
    let structural = Edge::new(qdd_core::handles::W_ONE, edge.node);
    let tag = gate_tag(gate, target);
    let probe = should_probe(depth, granularity);
    if probe {
        if let Some(cached) = cache.get3(OpKind::ApplyGate, structural, Edge::zero(), tag) {
            let w = arithmetic::mul(store, cache, edge.weight, cached.weight)?;
            return Ok(Edge::new(w, cached.node));
        }
    }
    let v = var_of(nodes, edge.node);
    let structural_result = if v >= target {
        let (c0, c1) = cofactor_at(nodes, store, cache, structural, target)?;
        let low0 = scale(store, cache, c0, gate.m00)?;
        let low1 = scale(store, cache, c1, gate.m01)?;
        let high0 = scale(store, cache, c0, gate.m10)?;
        let high1 = scale(store, cache, c1, gate.m11)?;
        let (new_low, new_high) = if should_fork(depth) {
            let (lo, hi) = rayon::join(
                || plus(store, nodes, cache, scheme, low0, low1, depth + 1, granularity),
                || plus(store, nodes, cache, scheme, high0, high1, depth + 1, granularity),
            );
            (lo?, hi?)
        } else {
            (
                plus(store, nodes, cache, scheme, low0, low1, depth + 1, granularity)?,
                plus(store, nodes, cache, scheme, high0, high1, depth + 1, granularity)?,
            )
        };
        normalise_build(store, nodes, cache, scheme, target, new_low, new_high)?
    } else {
        let key = nodes.get(edge.node);
        let (low_r, high_r) = if should_fork(depth) {
            let (lo, hi) = rayon::join(
                || apply_gate(store, nodes, cache, scheme, key.low, gate, target, depth + 1, granularity),
                || apply_gate(store, nodes, cache, scheme, key.high, gate, target, depth + 1, granularity),
            );
            (lo?, hi?)
        } else {
            (
                apply_gate(store, nodes, cache, scheme, key.low, gate, target, depth + 1, granularity)?,
                apply_gate(store, nodes, cache, scheme, key.high, gate, target, depth + 1, granularity)?,
            )
        };
        normalise_build(store, nodes, cache, scheme, v, low_r, high_r)?
    };
    if probe {
        cache.put3(
            OpKind::ApplyGate,
            structural,
            Edge::zero(),
            tag,
            structural_result,
        );
    }
    let w = arithmetic::mul(store, cache, edge.weight, structural_result.weight)?;
    Ok(Edge::new(w, structural_result.node))
}

/// Packs a gate, target and remaining-control-count into a cache tag; the
/// control count distinguishes partially-resolved recursive calls at the
/// same node from each other.
fn controlled_tag(gate: &GateEntry, target: u32, controls: &[u32]) -> Edge {
    let mut h: u64 = 0x84222325cbf29ce4;
    for part in [
        gate.m00.0,
        gate.m01.0,
        gate.m10.0,
        gate.m11.0,
        target as u64,
    ]
    .into_iter()
    .chain(controls.iter().map(|&c| c as u64))
    {
        h ^= part;
        h = h.wrapping_mul(0x100000001b3);
    }
    Edge::new(
        qdd_core::handles::WeightHandle(controls.len() as u64),
        NodeHandle(h),
    )
}

/// Applies a multi-controlled single-qubit unitary.
///
/// `controls` must be sorted ascending and every control index must be
/// strictly less than `target` (i.e. controls precede the target in
/// variable order), since the recursion below carries a single
/// already-combined edge and has nowhere to hold a control that is only
/// resolved after the target level. `Engine::apply_cgate` is the only
/// caller and rejects any other ordering with `QddError::UnorderedControls`
/// before reaching here (see `DESIGN.md`); this function itself trusts its
/// precondition and only asserts it in debug builds.
#[allow(clippy::too_many_arguments)]
pub fn apply_controlled_gate(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    edge: Edge,
    gate: &GateEntry,
    controls: &[u32],
    target: u32,
    depth: u32,
    granularity: u32,
) -> Result<Edge> {
    if edge.is_zero() {
        return Ok(Edge::zero());
    }
    let Some((&c0, rest)) = controls.split_first() else {
        return apply_gate(store, nodes, cache, scheme, edge, gate, target, depth, granularity);
    };
    debug_assert!(c0 < target, "control must precede target in variable order");

    let structural = Edge::new(qdd_core::handles::W_ONE, edge.node);
    let tag = controlled_tag(gate, target, controls);
    let probe = should_probe(depth, granularity);
    if probe {
        if let Some(cached) =
            cache.get3(OpKind::ApplyControlledGate, structural, Edge::zero(), tag)
        {
            let w = arithmetic::mul(store, cache, edge.weight, cached.weight)?;
            return Ok(Edge::new(w, cached.node));
        }
    }

    let v = var_of(nodes, edge.node);
    let structural_result = if v >= c0 {
        let (low, high) = if v == c0 {
            let key = nodes.get(edge.node);
            (key.low, key.high)
        } else {
            (structural, structural)
        };
        let high_r = apply_controlled_gate(
            store, nodes, cache, scheme, high, gate, rest, target, depth + 1, granularity,
        )?;
        normalise_build(store, nodes, cache, scheme, c0, low, high_r)?
    } else {
        let key = nodes.get(edge.node);
        let (low_r, high_r) = if should_fork(depth) {
            let (lo, hi) = rayon::join(
                || apply_controlled_gate(store, nodes, cache, scheme, key.low, gate, controls, target, depth + 1, granularity),
                || apply_controlled_gate(store, nodes, cache, scheme, key.high, gate, controls, target, depth + 1, granularity),
            );
            (lo?, hi?)
        } else {
            (
                apply_controlled_gate(store, nodes, cache, scheme, key.low, gate, controls, target, depth + 1, granularity)?,
                apply_controlled_gate(store, nodes, cache, scheme, key.high, gate, controls, target, depth + 1, granularity)?,
            )
        };
        normalise_build(store, nodes, cache, scheme, v, low_r, high_r)?
    };

    if probe {
        cache.put3(
            OpKind::ApplyControlledGate,
            structural,
            Edge::zero(),
            tag,
            structural_result,
        );
    }
    let w = arithmetic::mul(store, cache, edge.weight, structural_result.weight)?;
    Ok(Edge::new(w, structural_result.node))
}

/// Treats a unitary matrix as a QDD over `2n` variables: rows on variables
/// `0..n`, columns on `n..2n` (a simpler, still-general variable order than
/// true bit-interleaving — noted in `DESIGN.md`). Multiplies it by a vector
/// QDD over variables `0..n`.
pub fn matvec_mult(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    matrix: Edge,
    vector: Edge,
    num_qubits: usize,
    granularity: u32,
) -> Result<Edge> {
    matvec_rows(
        store,
        nodes,
        cache,
        scheme,
        matrix,
        vector,
        num_qubits,
        0,
        0,
        granularity,
    )
}

#[allow(clippy::too_many_arguments)]
fn matvec_rows(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    m: Edge,
    v: Edge,
    n: usize,
    row_level: usize,
    depth: u32,
    granularity: u32,
) -> Result<Edge> {
    if row_level == n {
        return matvec_contract(store, nodes, cache, scheme, m, v, n, 0, depth, granularity);
    }
    let (m0, m1) = cofactor_at(nodes, store, cache, m, row_level as u32)?;
    let (low, high) = if should_fork(depth) {
        let (lo, hi) = rayon::join(
            || matvec_rows(store, nodes, cache, scheme, m0, v, n, row_level + 1, depth + 1, granularity),
            || matvec_rows(store, nodes, cache, scheme, m1, v, n, row_level + 1, depth + 1, granularity),
        );
        (lo?, hi?)
    } else {
        (
            matvec_rows(store, nodes, cache, scheme, m0, v, n, row_level + 1, depth + 1, granularity)?,
            matvec_rows(store, nodes, cache, scheme, m1, v, n, row_level + 1, depth + 1, granularity)?,
        )
    };
    normalise_build(store, nodes, cache, scheme, row_level as u32, low, high)
}

#[allow(clippy::too_many_arguments)]
fn matvec_contract(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    m: Edge,
    v: Edge,
    n: usize,
    col_level: usize,
    depth: u32,
    granularity: u32,
) -> Result<Edge> {
    if col_level == n {
        if m.is_zero() || v.is_zero() {
            return Ok(Edge::zero());
        }
        let w = arithmetic::mul(store, cache, m.weight, v.weight)?;
        return Ok(if w == W_ZERO {
            Edge::zero()
        } else {
            Edge::new(w, TERMINAL)
        });
    }
    let (m0, m1) = cofactor_at(nodes, store, cache, m, (n + col_level) as u32)?;
    let (v0, v1) = cofactor_at(nodes, store, cache, v, col_level as u32)?;
    let (t0, t1) = if should_fork(depth) {
        let (a, b) = rayon::join(
            || matvec_contract(store, nodes, cache, scheme, m0, v0, n, col_level + 1, depth + 1, granularity),
            || matvec_contract(store, nodes, cache, scheme, m1, v1, n, col_level + 1, depth + 1, granularity),
        );
        (a?, b?)
    } else {
        (
            matvec_contract(store, nodes, cache, scheme, m0, v0, n, col_level + 1, depth + 1, granularity)?,
            matvec_contract(store, nodes, cache, scheme, m1, v1, n, col_level + 1, depth + 1, granularity)?,
        )
    };
    plus(store, nodes, cache, scheme, t0, t1, depth + 1, granularity)
}

/// Multiplies two `2n`-variable matrix QDDs, contracting the shared inner
/// index (`a`'s columns against `b`'s rows).
pub fn matmat_mult(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    a: Edge,
    b: Edge,
    num_qubits: usize,
    granularity: u32,
) -> Result<Edge> {
    matmat_rows(store, nodes, cache, scheme, a, b, num_qubits, 0, 0, granularity)
}

#[allow(clippy::too_many_arguments)]
fn matmat_rows(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    a: Edge,
    b: Edge,
    n: usize,
    row_level: usize,
    depth: u32,
    granularity: u32,
) -> Result<Edge> {
    if row_level == n {
        return matmat_cols(store, nodes, cache, scheme, a, b, n, 0, depth, granularity);
    }
    let (a0, a1) = cofactor_at(nodes, store, cache, a, row_level as u32)?;
    let (low, high) = if should_fork(depth) {
        let (lo, hi) = rayon::join(
            || matmat_rows(store, nodes, cache, scheme, a0, b, n, row_level + 1, depth + 1, granularity),
            || matmat_rows(store, nodes, cache, scheme, a1, b, n, row_level + 1, depth + 1, granularity),
        );
        (lo?, hi?)
    } else {
        (
            matmat_rows(store, nodes, cache, scheme, a0, b, n, row_level + 1, depth + 1, granularity)?,
            matmat_rows(store, nodes, cache, scheme, a1, b, n, row_level + 1, depth + 1, granularity)?,
        )
    };
    normalise_build(store, nodes, cache, scheme, row_level as u32, low, high)
}

#[allow(clippy::too_many_arguments)]
fn matmat_cols(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    a: Edge,
    b: Edge,
    n: usize,
    col_level: usize,
    depth: u32,
    granularity: u32,
) -> Result<Edge> {
    if col_level == n {
        return matmat_inner(store, nodes, cache, scheme, a, b, n, 0, depth, granularity);
    }
    let (b0, b1) = cofactor_at(nodes, store, cache, b, (n + col_level) as u32)?;
    let (low, high) = if should_fork(depth) {
        let (lo, hi) = rayon::join(
            || matmat_cols(store, nodes, cache, scheme, a, b0, n, col_level + 1, depth + 1, granularity),
            || matmat_cols(store, nodes, cache, scheme, a, b1, n, col_level + 1, depth + 1, granularity),
        );
        (lo?, hi?)
    } else {
        (
            matmat_cols(store, nodes, cache, scheme, a, b0, n, col_level + 1, depth + 1, granularity)?,
            matmat_cols(store, nodes, cache, scheme, a, b1, n, col_level + 1, depth + 1, granularity)?,
        )
    };
    normalise_build(store, nodes, cache, scheme, (n + col_level) as u32, low, high)
}

#[allow(clippy::too_many_arguments)]
fn matmat_inner(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    a: Edge,
    b: Edge,
    n: usize,
    k: usize,
    depth: u32,
    granularity: u32,
) -> Result<Edge> {
    if k == n {
        if a.is_zero() || b.is_zero() {
            return Ok(Edge::zero());
        }
        let w = arithmetic::mul(store, cache, a.weight, b.weight)?;
        return Ok(if w == W_ZERO {
            Edge::zero()
        } else {
            Edge::new(w, TERMINAL)
        });
    }
    let (a0, a1) = cofactor_at(nodes, store, cache, a, (n + k) as u32)?;
    let (b0, b1) = cofactor_at(nodes, store, cache, b, k as u32)?;
    let (t0, t1) = if should_fork(depth) {
        let (x, y) = rayon::join(
            || matmat_inner(store, nodes, cache, scheme, a0, b0, n, k + 1, depth + 1, granularity),
            || matmat_inner(store, nodes, cache, scheme, a1, b1, n, k + 1, depth + 1, granularity),
        );
        (x?, y?)
    } else {
        (
            matmat_inner(store, nodes, cache, scheme, a0, b0, n, k + 1, depth + 1, granularity)?,
            matmat_inner(store, nodes, cache, scheme, a1, b1, n, k + 1, depth + 1, granularity)?,
        )
    };
    plus(store, nodes, cache, scheme, t0, t1, depth + 1, granularity)
}

/// Builds the all-zero `n`-qubit state: a chain of `n` nodes, one per qubit,
/// each with `low` pointing at the next (weight 1) and `high` the zero edge.
/// Qubits are never dropped from this initial chain because `low != high` at
/// every level (one branch carries the full amplitude, the other none), so
/// invariant 2's collapse never applies until a gate actually entangles or
/// superposes something.
pub fn all_zero_state(
    store: &WeightStore,
    nodes: &NodeTable,
    cache: &OpCache,
    scheme: NormalisationScheme,
    num_qubits: usize,
) -> Result<Edge> {
    let mut edge = Edge::one();
    for q in (0..num_qubits).rev() {
        edge = normalise_build(store, nodes, cache, scheme, q as u32, edge, Edge::zero())?;
    }
    Ok(edge)
}

/// Counts the number of distinct reachable nodes from `edge`, terminal
/// included if reached (an all-zero weight edge reaches nothing).
pub fn count_nodes(nodes: &NodeTable, edge: Edge) -> usize {
    if edge.is_zero() {
        return 0;
    }
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![edge.node];
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        if n == TERMINAL {
            continue;
        }
        let key = nodes.get(n);
        if !key.low.is_zero() {
            stack.push(key.low.node);
        }
        if !key.high.is_zero() {
            stack.push(key.high.node);
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::config::{OpCacheConfig, WeightBackend, WeightStoreConfig};
    use qdd_core::handles::W_ONE;

    fn fresh() -> (WeightStore, NodeTable, OpCache) {
        let store = WeightStore::new(&WeightStoreConfig {
            table_size: 1 << 14,
            tolerance: 1e-10,
            backend: WeightBackend::ComplexMap,
        });
        let nodes = NodeTable::new(&qdd_core::config::NodeTableConfig { table_size: 1 << 14 });
        let cache = OpCache::new(&OpCacheConfig {
            table_size: 1 << 10,
            cache_granularity: 1,
            insert_inverses: true,
        });
        (store, nodes, cache)
    }

    fn gate(store: &WeightStore, m: qdd_core::physics::Matrix2x2) -> GateEntry {
        GateEntry {
            m00: store.find_or_put(m[0][0]).unwrap(),
            m01: store.find_or_put(m[0][1]).unwrap(),
            m10: store.find_or_put(m[1][0]).unwrap(),
            m11: store.find_or_put(m[1][1]).unwrap(),
        }
    }

    #[test]
    fn all_zero_state_has_one_node_per_qubit() {
        let (store, nodes, cache) = fresh();
        let edge = all_zero_state(&store, &nodes, &cache, NormalisationScheme::LowNonZero, 3).unwrap();
        assert_eq!(edge.weight, W_ONE);
        assert_eq!(count_nodes(&nodes, edge), 4); // 3 internal + terminal
    }

    #[test]
    fn hadamard_on_single_qubit_collapses_to_one_node() {
        let (store, nodes, cache) = fresh();
        let scheme = NormalisationScheme::LowNonZero;
        let state = all_zero_state(&store, &nodes, &cache, scheme, 1).unwrap();
        let h = gate(&store, qdd_core::physics::HADAMARD);
        let result = apply_gate(&store, &nodes, &cache, scheme, state, &h, 0, 0, 1).unwrap();
        let amp0 = store.get(
            cofactor_at(&nodes, &store, &cache, result, 0).unwrap().0.weight,
        );
        let amp1 = store.get(
            cofactor_at(&nodes, &store, &cache, result, 0).unwrap().1.weight,
        );
        assert!((amp0.norm() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        assert!((amp1.norm() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn x_gate_flips_basis_state() {
        let (store, nodes, cache) = fresh();
        let scheme = NormalisationScheme::LowNonZero;
        let state = all_zero_state(&store, &nodes, &cache, scheme, 1).unwrap();
        let x = gate(&store, qdd_core::physics::PAULI_X);
        let result = apply_gate(&store, &nodes, &cache, scheme, state, &x, 0, 0, 1).unwrap();
        let (low, high) = cofactor_at(&nodes, &store, &cache, result, 0).unwrap();
        assert!(low.is_zero());
        assert!((store.get(high.weight) - qdd_core::handles::C64::new(1.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn controlled_not_entangles_bell_pair() {
        let (store, nodes, cache) = fresh();
        let scheme = NormalisationScheme::LowNonZero;
        let state = all_zero_state(&store, &nodes, &cache, scheme, 2).unwrap();
        let h = gate(&store, qdd_core::physics::HADAMARD);
        let x = gate(&store, qdd_core::physics::PAULI_X);
        let after_h = apply_gate(&store, &nodes, &cache, scheme, state, &h, 0, 0, 1).unwrap();
        let bell = apply_controlled_gate(
            &store, &nodes, &cache, scheme, after_h, &x, &[0], 1, 0, 1,
        )
        .unwrap();
        // |00> and |11> each carry amplitude 1/sqrt2; |01>, |10> are zero.
        let amp = |bits: &[bool]| {
            let mut cur = bell;
            for (i, &b) in bits.iter().enumerate() {
                let (c0, c1) = cofactor_at(&nodes, &store, &cache, cur, i as u32).unwrap();
                cur = if b { c1 } else { c0 };
            }
            store.get(cur.weight)
        };
        assert!((amp(&[false, false]).norm() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        assert!((amp(&[true, true]).norm() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        assert!(amp(&[false, true]).norm() < 1e-9);
        assert!(amp(&[true, false]).norm() < 1e-9);
        assert_eq!(count_nodes(&nodes, bell), 3); // terminal + 2 internal, invariant 2 merges the rest
    }

    #[test]
    fn matvec_identity_is_a_no_op() {
        let (store, nodes, cache) = fresh();
        let scheme = NormalisationScheme::LowNonZero;
        let state = all_zero_state(&store, &nodes, &cache, scheme, 1).unwrap();
        let h = gate(&store, qdd_core::physics::HADAMARD);
        let after_h = apply_gate(&store, &nodes, &cache, scheme, state, &h, 0, 0, 1).unwrap();

        // Build identity as a 2-variable (1 qubit) matrix QDD: row 0 -> col 0 amp 1, row1->col1 amp1.
        let row1 = normalise_build(&store, &nodes, &cache, scheme, 1, Edge::zero(), Edge::one()).unwrap();
        let row0 = normalise_build(&store, &nodes, &cache, scheme, 1, Edge::one(), Edge::zero()).unwrap();
        let identity = normalise_build(&store, &nodes, &cache, scheme, 0, row0, row1).unwrap();

        let result = matvec_mult(&store, &nodes, &cache, scheme, identity, after_h, 1, 1).unwrap();
        assert_eq!(result.node, after_h.node);
        assert!((store.get(result.weight) - store.get(after_h.weight)).norm() < 1e-9);
    }
}
