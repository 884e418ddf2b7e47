//! Weight arithmetic: complex-number operations lifted to `WeightHandle`s.
//!
//! Every binary operation checks a handful of cheap identities before
//! touching the store at all (`mul(W_ONE, x) == x`, `div(x, x) == W_ONE`, …).
//! These fast paths are what make the op cache worth having: a circuit with a
//! lot of structural zero and identity weights never even probes the cache
//! for them.

use qdd_core::handles::{Edge, WeightHandle, C64, TERMINAL, W_MINUS_ONE, W_ONE, W_ZERO};
use qdd_core::Result;

use crate::op_cache::{OpCache, OpKind};
use crate::weight_store::WeightStore;

/// Wraps a bare weight handle as an `Edge` (node fixed at `TERMINAL`) so the
/// op cache — keyed on `Edge` pairs everywhere else — can also memoise pure
/// weight-handle arithmetic without a second cache implementation.
fn as_edge(w: WeightHandle) -> Edge {
    Edge::new(w, TERMINAL)
}

pub fn abs(store: &WeightStore, a: WeightHandle) -> Result<WeightHandle> {
    if a == W_ZERO {
        return Ok(W_ZERO);
    }
    if a == W_ONE || a == W_MINUS_ONE {
        return Ok(W_ONE);
    }
    let value = store.get(a);
    store.find_or_put(C64::new(value.norm(), 0.0))
}

pub fn neg(store: &WeightStore, a: WeightHandle) -> Result<WeightHandle> {
    if a == W_ZERO {
        return Ok(W_ZERO);
    }
    if a == W_ONE {
        return Ok(W_MINUS_ONE);
    }
    if a == W_MINUS_ONE {
        return Ok(W_ONE);
    }
    let value = store.get(a);
    store.find_or_put(-value)
}

pub fn sqr(store: &WeightStore, a: WeightHandle) -> Result<WeightHandle> {
    if a == W_ZERO {
        return Ok(W_ZERO);
    }
    if a == W_ONE || a == W_MINUS_ONE {
        return Ok(W_ONE);
    }
    let value = store.get(a);
    store.find_or_put(value * value)
}

pub fn add(store: &WeightStore, a: WeightHandle, b: WeightHandle) -> Result<WeightHandle> {
    if a == W_ZERO {
        return Ok(b);
    }
    if b == W_ZERO {
        return Ok(a);
    }
    let va = store.get(a);
    let vb = store.get(b);
    store.find_or_put(va + vb)
}

pub fn sub(store: &WeightStore, a: WeightHandle, b: WeightHandle) -> Result<WeightHandle> {
    if b == W_ZERO {
        return Ok(a);
    }
    if a == b {
        return Ok(W_ZERO);
    }
    let va = store.get(a);
    let vb = store.get(b);
    store.find_or_put(va - vb)
}

/// Multiplies two weight handles. Reserved-handle identities are checked
/// before the op cache is ever probed (§4.5): `mul(W_ONE, x) = x`,
/// `mul(W_ZERO, x) = W_ZERO`, `mul(W_MINUS_ONE, x) = neg(x)`. The slow path
/// probes the cache, and on a miss interns the product and seeds both
/// division inverses (`c/a = b`, `c/b = a`) that `div` can hit later for
/// free.
pub fn mul(store: &WeightStore, cache: &OpCache, a: WeightHandle, b: WeightHandle) -> Result<WeightHandle> {
    if a == W_ONE {
        return Ok(b);
    }
    if b == W_ONE {
        return Ok(a);
    }
    if a == W_ZERO || b == W_ZERO {
        return Ok(W_ZERO);
    }
    if a == W_MINUS_ONE {
        return neg(store, b);
    }
    if b == W_MINUS_ONE {
        return neg(store, a);
    }
    let ea = as_edge(a);
    let eb = as_edge(b);
    if let Some(hit) = cache.get2(OpKind::Mul, ea, eb) {
        return Ok(hit.weight);
    }
    let va = store.get(a);
    let vb = store.get(b);
    let result = store.find_or_put(va * vb)?;
    cache.put_mul(ea, eb, as_edge(result));
    Ok(result)
}

/// Same semantics as `mul`, used specifically for propagating a parent edge's
/// weight down through a subtree while building and normalising a node. Kept
/// as a distinct entry point so the store's `mul_downward_hit_rate` can
/// report this traffic's fast-path rate separately from general `mul` calls
/// (division inverse seeding, invariant checks, and so on).
pub fn mul_downward(
    store: &WeightStore,
    cache: &OpCache,
    a: WeightHandle,
    b: WeightHandle,
) -> Result<WeightHandle> {
    let fast = a == W_ONE || b == W_ONE || a == W_ZERO || b == W_ZERO || a == W_MINUS_ONE || b == W_MINUS_ONE;
    store.record_mul_downward(fast);
    mul(store, cache, a, b)
}

/// Divides two weight handles, following the same cache discipline as `mul`:
/// fast paths first (`div(x, x) = W_ONE`, `div(x, W_ONE) = x`), then an
/// op-cache probe that `mul`'s inverse-seeding frequently already satisfies.
pub fn div(store: &WeightStore, cache: &OpCache, a: WeightHandle, b: WeightHandle) -> Result<WeightHandle> {
    if a == b {
        return Ok(W_ONE);
    }
    if b == W_ONE {
        return Ok(a);
    }
    if a == W_ZERO {
        return Ok(W_ZERO);
    }
    if b == W_MINUS_ONE {
        return neg(store, a);
    }
    let ea = as_edge(a);
    let eb = as_edge(b);
    if let Some(hit) = cache.get2(OpKind::Div, ea, eb) {
        return Ok(hit.weight);
    }
    let va = store.get(a);
    let vb = store.get(b);
    let result = store.find_or_put(va / vb)?;
    cache.put2(OpKind::Div, ea, eb, as_edge(result));
    Ok(result)
}

/// Handle-identity equality: true only when `a` and `b` are the literal same
/// handle. Since the store interns by tolerance, this already implies
/// within-tolerance equality; it is not a numeric comparison.
pub fn eq(a: WeightHandle, b: WeightHandle) -> bool {
    a == b
}

/// Numeric within-tolerance equality, for values that were computed outside
/// the store (e.g. a probability sum) and never interned.
pub fn eps_close(store: &WeightStore, a: WeightHandle, b: WeightHandle) -> bool {
    if a == b {
        return true;
    }
    (store.get(a) - store.get(b)).norm() < store.tolerance()
}

/// True if `|a| > |b|` beyond tolerance; used by the largest-magnitude
/// normalisation scheme to pick which edge to extract from.
pub fn greater(store: &WeightStore, a: WeightHandle, b: WeightHandle) -> bool {
    if a == b {
        return false;
    }
    store.get(a).norm() - store.get(b).norm() > store.tolerance()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::config::{OpCacheConfig, WeightBackend, WeightStoreConfig};

    fn store() -> WeightStore {
        WeightStore::new(&WeightStoreConfig {
            table_size: 256,
            tolerance: 1e-12,
            backend: WeightBackend::ComplexMap,
        })
    }

    fn cache() -> OpCache {
        OpCache::new(&OpCacheConfig {
            table_size: 256,
            cache_granularity: 1,
            insert_inverses: true,
        })
    }

    #[test]
    fn mul_identities() {
        let s = store();
        let c = cache();
        let h = s.find_or_put(C64::new(0.3, 0.4)).unwrap();
        assert_eq!(mul(&s, &c, W_ONE, h).unwrap(), h);
        assert_eq!(mul(&s, &c, h, W_ONE).unwrap(), h);
        assert_eq!(mul(&s, &c, W_ZERO, h).unwrap(), W_ZERO);
        assert_eq!(mul(&s, &c, h, W_MINUS_ONE).unwrap(), neg(&s, h).unwrap());
    }

    #[test]
    fn div_self_is_one() {
        let s = store();
        let c = cache();
        let h = s.find_or_put(C64::new(0.3, 0.4)).unwrap();
        assert_eq!(div(&s, &c, h, h).unwrap(), W_ONE);
    }

    #[test]
    fn mul_seeds_division_inverse_in_the_op_cache() {
        let s = store();
        let c = cache();
        let a = s.find_or_put(C64::new(0.3, 0.4)).unwrap();
        let b = s.find_or_put(C64::new(0.7, -0.2)).unwrap();
        let product = mul(&s, &c, a, b).unwrap();
        // div(product, a) should hit the seeded inverse rather than recompute.
        assert_eq!(div(&s, &c, product, a).unwrap(), b);
        assert_eq!(div(&s, &c, product, b).unwrap(), a);
    }

    #[test]
    fn add_and_sub_roundtrip() {
        let s = store();
        let a = s.find_or_put(C64::new(0.2, -0.1)).unwrap();
        let b = s.find_or_put(C64::new(0.05, 0.3)).unwrap();
        let sum = add(&s, a, b).unwrap();
        let back = sub(&s, sum, b).unwrap();
        assert!(eps_close(&s, back, a));
    }

    #[test]
    fn greater_respects_tolerance() {
        let s = store();
        let a = s.find_or_put(C64::new(0.9, 0.0)).unwrap();
        let b = s.find_or_put(C64::new(0.1, 0.0)).unwrap();
        assert!(greater(&s, a, b));
        assert!(!greater(&s, b, a));
        assert!(!greater(&s, a, a));
    }

    #[test]
    fn mul_downward_tracks_fast_path() {
        let s = store();
        let c = cache();
        let h = s.find_or_put(C64::new(0.3, 0.4)).unwrap();
        assert_eq!(s.mul_downward_hit_rate(), None);
        mul_downward(&s, &c, W_ONE, h).unwrap();
        assert_eq!(s.mul_downward_hit_rate(), Some(1.0));
        mul_downward(&s, &c, h, h).unwrap();
        assert_eq!(s.mul_downward_hit_rate(), Some(0.5));
    }
}
