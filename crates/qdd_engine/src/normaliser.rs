//! Edge-weight normalisation: the step that turns a freshly built two-child
//! node into the canonical form required by invariant 4 (exactly one
//! outgoing edge carries weight `W_ONE`, with the extracted scalar handed
//! back to the caller to fold into the parent edge).

use qdd_core::config::NormalisationScheme;
use qdd_core::handles::{WeightHandle, C64, W_ONE, W_ZERO};
use qdd_core::Result;

use crate::arithmetic;
use crate::op_cache::OpCache;
use crate::weight_store::WeightStore;

/// Result of normalising a pair of child edge weights: the scalar to
/// propagate up to the parent, and the two weights to actually store on the
/// node (one of which is always `W_ONE`, unless both inputs were zero).
pub struct Normalised {
    pub scalar: WeightHandle,
    pub low: WeightHandle,
    pub high: WeightHandle,
}

/// Normalises `(low, high)` under `scheme`.
pub fn normalise(
    store: &WeightStore,
    cache: &OpCache,
    scheme: NormalisationScheme,
    low: WeightHandle,
    high: WeightHandle,
) -> Result<Normalised> {
    if low == W_ZERO && high == W_ZERO {
        return Ok(Normalised {
            scalar: W_ZERO,
            low: W_ZERO,
            high: W_ZERO,
        });
    }
    match scheme {
        NormalisationScheme::LowNonZero => normalise_low_non_zero(store, cache, low, high),
        NormalisationScheme::Largest => normalise_largest(store, cache, low, high),
        NormalisationScheme::L2 => normalise_l2(store, cache, low, high),
    }
}

fn normalise_low_non_zero(
    store: &WeightStore,
    cache: &OpCache,
    low: WeightHandle,
    high: WeightHandle,
) -> Result<Normalised> {
    let scalar = if low != W_ZERO { low } else { high };
    let new_low = arithmetic::div(store, cache, low, scalar)?;
    let new_high = arithmetic::div(store, cache, high, scalar)?;
    Ok(Normalised {
        scalar,
        low: new_low,
        high: new_high,
    })
}

fn normalise_largest(
    store: &WeightStore,
    cache: &OpCache,
    low: WeightHandle,
    high: WeightHandle,
) -> Result<Normalised> {
    let scalar = if low == W_ZERO {
        high
    } else if high == W_ZERO {
        low
    } else if arithmetic::greater(store, high, low) {
        high
    } else {
        low
    };
    let new_low = arithmetic::div(store, cache, low, scalar)?;
    let new_high = arithmetic::div(store, cache, high, scalar)?;
    Ok(Normalised {
        scalar,
        low: new_low,
        high: new_high,
    })
}

/// L2 normalisation: extracts a scalar `s` such that `|low/s|^2 + |high/s|^2
/// == 1`, then fixes the remaining global phase by rotating `s` so the new
/// `low` weight is real and non-negative. When the new `low` weight is zero
/// (only `high` survives), the phase is instead fixed against `high`.
fn normalise_l2(store: &WeightStore, cache: &OpCache, low: WeightHandle, high: WeightHandle) -> Result<Normalised> {
    let vl = store.get(low);
    let vh = store.get(high);
    let norm = (vl.norm_sqr() + vh.norm_sqr()).sqrt();
    let phase_ref = if vl.norm() > store.tolerance() {
        vl
    } else {
        vh
    };
    let phase = phase_ref / phase_ref.norm();
    let scalar_value = phase * C64::new(norm, 0.0);
    let scalar = store.find_or_put(scalar_value)?;

    let new_low = if low == W_ZERO {
        W_ZERO
    } else {
        arithmetic::div(store, cache, low, scalar)?
    };
    let new_high = if high == W_ZERO {
        W_ZERO
    } else {
        arithmetic::div(store, cache, high, scalar)?
    };
    let (new_low, new_high) = renormalise_drifted_low(store, new_low, new_high)?;
    Ok(Normalised {
        scalar,
        low: new_low,
        high: new_high,
    })
}

/// Re-normalises a node whose extracted `low` weight has drifted below
/// tolerance of zero without being exactly zero (can happen after repeated
/// L2 rescaling, since each division is itself only accurate to floating
/// point precision); snaps it to `W_ZERO` and rescales `high` to unit
/// magnitude so `|low|^2 + |high|^2 == 1` continues to hold exactly rather
/// than accumulating the dropped `|low|^2` term as drift.
pub fn renormalise_drifted_low(
    store: &WeightStore,
    low: WeightHandle,
    high: WeightHandle,
) -> Result<(WeightHandle, WeightHandle)> {
    if low == W_ZERO {
        return Ok((low, high));
    }
    let vl = store.get(low);
    if vl.norm() >= store.tolerance() {
        return Ok((low, high));
    }
    let vh = store.get(high);
    if vh.norm() < store.tolerance() {
        return Ok((low, high));
    }
    let rescaled = vh / vh.norm();
    let new_high = store.find_or_put(rescaled)?;
    Ok((W_ZERO, new_high))
}
