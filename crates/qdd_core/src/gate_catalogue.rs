//! Gate identifiers and their classification.
//!
//! A `GateId` names a gate without carrying its matrix: the matrix lives in
//! `physics`, and the interned `WeightHandle`s for each matrix entry live in
//! `qdd_engine`'s gate catalogue (which needs a weight store to intern into).
//! This module only needs to answer "what kind of id is this" so that
//! `dag_ops` can route an apply_gate call to the right matrix generator.

use std::fmt;

/// Number of fixed single-qubit gate ids: I, X, Y, Z, H, S, T, Tdag, sqrtX, sqrtY.
pub const STATIC_GATE_COUNT: u32 = 10;

pub const GATE_I: u32 = 0;
pub const GATE_X: u32 = 1;
pub const GATE_Y: u32 = 2;
pub const GATE_Z: u32 = 3;
pub const GATE_H: u32 = 4;
pub const GATE_S: u32 = 5;
pub const GATE_T: u32 = 6;
pub const GATE_TDAG: u32 = 7;
pub const GATE_SQRT_X: u32 = 8;
pub const GATE_SQRT_Y: u32 = 9;

/// First id of the `Rk` family: `RK_BASE + k` is `Rk(k)` for `k` in `1..=RK_SPAN`.
pub const RK_BASE: u32 = STATIC_GATE_COUNT;
/// Number of distinct `k` values reserved for `Rk`, and separately for `Rk_dag`.
pub const RK_SPAN: u32 = 64;
/// First id of the `Rk_dag` family.
pub const RK_DAG_BASE: u32 = RK_BASE + RK_SPAN;

/// First id of the dynamic ring reserved for runtime Rx/Ry/Rz angles.
pub const DYNAMIC_RING_BASE: u32 = RK_DAG_BASE + RK_SPAN;
/// Size of the dynamic ring; wrapping past it clears the op cache (stale
/// entries would otherwise alias a new angle onto an old id).
pub const DYNAMIC_RING_SIZE: u32 = 1 << 16;

/// An identified gate: either one of the ten fixed single-qubit unitaries, a
/// member of the `Rk`/`Rk_dag` dyadic-phase families, or a slot in the
/// dynamic ring used for continuously-parameterised Rx/Ry/Rz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateId {
    Static(u32),
    Rk(u32),
    RkDag(u32),
    Dynamic(u32),
}

impl GateId {
    /// Classifies a raw numeric gate id.
    pub fn from_raw(id: u32) -> Self {
        if id < STATIC_GATE_COUNT {
            GateId::Static(id)
        } else if id < RK_DAG_BASE {
            GateId::Rk(id - RK_BASE + 1)
        } else if id < DYNAMIC_RING_BASE {
            GateId::RkDag(id - RK_DAG_BASE + 1)
        } else {
            GateId::Dynamic((id - DYNAMIC_RING_BASE) % DYNAMIC_RING_SIZE)
        }
    }

    /// Recovers the raw numeric id, inverse of `from_raw`.
    pub fn raw(self) -> u32 {
        match self {
            GateId::Static(id) => id,
            GateId::Rk(k) => RK_BASE + k - 1,
            GateId::RkDag(k) => RK_DAG_BASE + k - 1,
            GateId::Dynamic(slot) => DYNAMIC_RING_BASE + slot,
        }
    }

    pub fn is_static(self) -> bool {
        matches!(self, GateId::Static(_))
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, GateId::Dynamic(_))
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateId::Static(id) => write!(f, "static#{id}"),
            GateId::Rk(k) => write!(f, "Rk({k})"),
            GateId::RkDag(k) => write!(f, "Rk_dag({k})"),
            GateId::Dynamic(slot) => write!(f, "dynamic#{slot}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_ids_roundtrip() {
        for id in 0..STATIC_GATE_COUNT {
            assert_eq!(GateId::from_raw(id), GateId::Static(id));
            assert_eq!(GateId::from_raw(id).raw(), id);
        }
    }

    #[test]
    fn rk_family_roundtrips() {
        let gid = GateId::from_raw(RK_BASE + 1); // Rk(2) == S
        assert_eq!(gid, GateId::Rk(2));
        assert_eq!(gid.raw(), RK_BASE + 1);
    }

    #[test]
    fn rk_dag_family_roundtrips() {
        let gid = GateId::from_raw(RK_DAG_BASE + 2); // Rk_dag(3) == Tdag
        assert_eq!(gid, GateId::RkDag(3));
        assert_eq!(gid.raw(), RK_DAG_BASE + 2);
    }

    #[test]
    fn dynamic_ring_wraps() {
        let gid = GateId::from_raw(DYNAMIC_RING_BASE + DYNAMIC_RING_SIZE);
        assert_eq!(gid, GateId::Dynamic(0));
        assert!(gid.is_dynamic());
    }

    #[test]
    fn no_separate_sdag_id() {
        // S-dagger is Rk_dag(2), not a dedicated static id: the ten static
        // ids are I, X, Y, Z, H, S, T, Tdag, sqrtX, sqrtY.
        assert_eq!(GateId::from_raw(RK_DAG_BASE + 1), GateId::RkDag(2));
    }
}
