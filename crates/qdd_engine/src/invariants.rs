//! Optional self-test invariant checking, enabled by `EngineConfig::self_test`.
//!
//! A single post-operation walk over the reachable nodes of a result edge,
//! checking variable ordering (invariant 1), edge normalisation
//! (invariant 4) and zero-absorption (invariant 5). Uniqueness (invariants
//! 2/3) holds by construction of `NodeTable::find_or_put`'s find-or-put
//! discipline and cannot regress from a single walk, so it is not
//! re-checked here. Total-probability (unitarity) is checked separately by
//! the caller via `measurement::total_norm_sqr`, since that requires the
//! full register's qubit count, which this module doesn't know about.

use std::collections::HashSet;

use qdd_core::config::NormalisationScheme;
use qdd_core::handles::{Edge, WeightHandle, TERMINAL, W_ONE, W_ZERO};
use qdd_core::{QddError, Result};

use crate::node_table::NodeTable;
use crate::weight_store::WeightStore;

fn check_zero_absorption(edge: Edge) -> Result<()> {
    if edge.weight == W_ZERO && edge.node != TERMINAL {
        return Err(QddError::invariant_violation(
            "zero-weight edge does not point to the terminal",
        ));
    }
    Ok(())
}

fn check_normalisation(
    store: &WeightStore,
    scheme: NormalisationScheme,
    low: WeightHandle,
    high: WeightHandle,
) -> Result<()> {
    if low == W_ZERO && high == W_ZERO {
        return Ok(());
    }
    match scheme {
        NormalisationScheme::LowNonZero => {
            let canonical = if low != W_ZERO { low } else { high };
            if canonical != W_ONE {
                return Err(QddError::invariant_violation(
                    "low-non-zero scheme requires the extracted weight to equal W_ONE",
                ));
            }
        }
        NormalisationScheme::Largest => {
            if low != W_ONE && high != W_ONE {
                return Err(QddError::invariant_violation(
                    "largest-magnitude scheme requires one child weight to equal W_ONE",
                ));
            }
        }
        NormalisationScheme::L2 => {
            let total = store.get(low).norm_sqr() + store.get(high).norm_sqr();
            if (total - 1.0).abs() >= 10.0 * store.tolerance() {
                return Err(QddError::invariant_violation(format!(
                    "l2 scheme requires |low|^2 + |high|^2 == 1, got {total}"
                )));
            }
        }
    }
    Ok(())
}

/// Walks every node reachable from `root` exactly once, failing fast on the
/// first structural invariant it finds broken.
pub fn check_structural_invariants(
    nodes: &NodeTable,
    store: &WeightStore,
    scheme: NormalisationScheme,
    root: Edge,
) -> Result<()> {
    check_zero_absorption(root)?;
    if root.node == TERMINAL {
        return Ok(());
    }
    let mut seen = HashSet::new();
    let mut stack = vec![root.node];
    while let Some(handle) = stack.pop() {
        if !seen.insert(handle) {
            continue;
        }
        let key = nodes.get(handle);
        check_zero_absorption(key.low)?;
        check_zero_absorption(key.high)?;
        check_normalisation(store, scheme, key.low.weight, key.high.weight)?;
        for child in [key.low, key.high] {
            if child.node == TERMINAL {
                continue;
            }
            let child_var = nodes.get(child.node).var;
            if child_var <= key.var {
                return Err(QddError::invariant_violation(format!(
                    "variable ordering violated: child var {child_var} <= parent var {}",
                    key.var
                )));
            }
            stack.push(child.node);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::config::{NodeTableConfig, WeightBackend, WeightStoreConfig};
    use qdd_core::handles::W_MINUS_ONE;

    use crate::node_table::NodeKey;

    fn store() -> WeightStore {
        WeightStore::new(&WeightStoreConfig {
            table_size: 256,
            tolerance: 1e-9,
            backend: WeightBackend::ComplexMap,
        })
    }

    fn nodes() -> NodeTable {
        NodeTable::new(&NodeTableConfig { table_size: 256 })
    }

    #[test]
    fn terminal_edge_passes() {
        let s = store();
        let n = nodes();
        assert!(check_structural_invariants(&n, &s, NormalisationScheme::LowNonZero, Edge::new(W_ONE, TERMINAL)).is_ok());
    }

    #[test]
    fn low_non_zero_node_with_canonical_low_passes() {
        let s = store();
        let n = nodes();
        let node = n
            .find_or_put(NodeKey {
                var: 0,
                low: Edge::new(W_ONE, TERMINAL),
                high: Edge::new(W_MINUS_ONE, TERMINAL),
            })
            .unwrap();
        let root = Edge::new(W_ONE, node);
        assert!(check_structural_invariants(&n, &s, NormalisationScheme::LowNonZero, root).is_ok());
    }

    #[test]
    fn non_canonical_weight_is_rejected() {
        let s = store();
        let n = nodes();
        let skewed = s.find_or_put(qdd_core::handles::C64::new(0.3, 0.0)).unwrap();
        let node = n
            .find_or_put(NodeKey {
                var: 0,
                low: Edge::new(skewed, TERMINAL),
                high: Edge::new(W_MINUS_ONE, TERMINAL),
            })
            .unwrap();
        let root = Edge::new(W_ONE, node);
        assert!(check_structural_invariants(&n, &s, NormalisationScheme::LowNonZero, root).is_err());
    }

    #[test]
    fn out_of_order_child_variable_is_rejected() {
        let s = store();
        let n = nodes();
        let child = n
            .find_or_put(NodeKey {
                var: 0,
                low: Edge::new(W_ONE, TERMINAL),
                high: Edge::new(W_MINUS_ONE, TERMINAL),
            })
            .unwrap();
        let parent = n
            .find_or_put(NodeKey {
                var: 1,
                low: Edge::new(W_ONE, child),
                high: Edge::new(W_ZERO, TERMINAL),
            })
            .unwrap();
        let root = Edge::new(W_ONE, parent);
        assert!(check_structural_invariants(&n, &s, NormalisationScheme::LowNonZero, root).is_err());
    }
}
