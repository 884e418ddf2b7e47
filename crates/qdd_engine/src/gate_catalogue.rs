//! Interned gate matrices: the bridge between `qdd_core`'s gate-id
//! classification and this engine's weight store.
//!
//! The ten static gates are interned once, eagerly, at catalogue
//! construction. The `Rk`/`Rk_dag` families are interned lazily and cached by
//! `k`, since a circuit typically only touches a handful of distinct angles.
//! The dynamic ring (continuously-parameterised Rx/Ry/Rz) is allocated a
//! fresh slot per distinct angle and wraps once `DYNAMIC_RING_SIZE` distinct
//! angles have been seen in a single engine lifetime; wrapping invalidates
//! the op cache, since a stale cache entry keyed on a reused ring slot would
//! otherwise silently apply the wrong angle.

use dashmap::DashMap;
use parking_lot::Mutex;
use qdd_core::gate_catalogue::{
    GateId, DYNAMIC_RING_SIZE, GATE_H, GATE_I, GATE_S, GATE_SQRT_X, GATE_SQRT_Y, GATE_T,
    GATE_TDAG, GATE_X, GATE_Y, GATE_Z, STATIC_GATE_COUNT,
};
use qdd_core::handles::WeightHandle;
use qdd_core::physics::{self, Matrix2x2};
use qdd_core::Result;

use crate::weight_store::WeightStore;

/// The four interned entries of a 2x2 unitary, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateEntry {
    pub m00: WeightHandle,
    pub m01: WeightHandle,
    pub m10: WeightHandle,
    pub m11: WeightHandle,
}

fn intern_matrix(store: &WeightStore, m: &Matrix2x2) -> Result<GateEntry> {
    Ok(GateEntry {
        m00: store.find_or_put(m[0][0])?,
        m01: store.find_or_put(m[0][1])?,
        m10: store.find_or_put(m[1][0])?,
        m11: store.find_or_put(m[1][1])?,
    })
}

fn static_matrix(id: u32) -> Matrix2x2 {
    match id {
        GATE_I => physics::IDENTITY,
        GATE_X => physics::PAULI_X,
        GATE_Y => physics::PAULI_Y,
        GATE_Z => physics::PAULI_Z,
        GATE_H => physics::HADAMARD,
        GATE_S => physics::S_GATE,
        GATE_T => physics::T_GATE,
        GATE_TDAG => physics::T_DAGGER,
        GATE_SQRT_X => physics::SQRT_X,
        GATE_SQRT_Y => physics::SQRT_Y,
        other => unreachable!("static gate id {other} out of range"),
    }
}

/// Allocates dynamic-ring slots, one per distinct runtime angle, and reports
/// when the ring has just wrapped.
struct DynamicRing {
    next_slot: Mutex<u32>,
}

impl DynamicRing {
    fn new() -> Self {
        Self {
            next_slot: Mutex::new(0),
        }
    }

    /// Returns the next slot and whether allocating it wrapped the ring.
    fn allocate(&self) -> (u32, bool) {
        let mut next = self.next_slot.lock();
        let slot = *next;
        let wrapped = slot == DYNAMIC_RING_SIZE - 1;
        *next = (*next + 1) % DYNAMIC_RING_SIZE;
        (slot, wrapped)
    }
}

pub struct GateCatalogue {
    static_entries: [GateEntry; STATIC_GATE_COUNT as usize],
    rk_entries: DashMap<u32, GateEntry>,
    rk_dag_entries: DashMap<u32, GateEntry>,
    dynamic_entries: DashMap<u32, GateEntry>,
    dynamic_angles: DashMap<(u64, u8), u32>,
    ring: DynamicRing,
}

impl GateCatalogue {
    /// Eagerly interns the ten static gates.
    pub fn new(store: &WeightStore) -> Result<Self> {
        let mut static_entries = [GateEntry {
            m00: qdd_core::handles::W_ZERO,
            m01: qdd_core::handles::W_ZERO,
            m10: qdd_core::handles::W_ZERO,
            m11: qdd_core::handles::W_ZERO,
        }; STATIC_GATE_COUNT as usize];
        for id in 0..STATIC_GATE_COUNT {
            static_entries[id as usize] = intern_matrix(store, &static_matrix(id))?;
        }
        Ok(Self {
            static_entries,
            rk_entries: DashMap::new(),
            rk_dag_entries: DashMap::new(),
            dynamic_entries: DashMap::new(),
            dynamic_angles: DashMap::new(),
            ring: DynamicRing::new(),
        })
    }

    pub fn static_entry(&self, id: u32) -> GateEntry {
        self.static_entries[id as usize]
    }

    pub fn rk_entry(&self, store: &WeightStore, k: u32) -> Result<GateEntry> {
        if let Some(e) = self.rk_entries.get(&k) {
            return Ok(*e);
        }
        let entry = intern_matrix(store, &physics::rk(k))?;
        self.rk_entries.entry(k).or_insert(entry);
        Ok(*self.rk_entries.get(&k).expect("just inserted"))
    }

    pub fn rk_dag_entry(&self, store: &WeightStore, k: u32) -> Result<GateEntry> {
        if let Some(e) = self.rk_dag_entries.get(&k) {
            return Ok(*e);
        }
        let entry = intern_matrix(store, &physics::rk_dag(k))?;
        self.rk_dag_entries.entry(k).or_insert(entry);
        Ok(*self.rk_dag_entries.get(&k).expect("just inserted"))
    }

    /// Interns an Rx/Ry/Rz matrix for a runtime angle, allocating a dynamic
    /// ring slot if this exact (axis, angle) pair hasn't been seen yet.
    /// Returns the entry and whether allocating the slot wrapped the ring
    /// (the caller must clear the op cache when it did).
    pub fn dynamic_entry(
        &self,
        store: &WeightStore,
        axis: DynamicAxis,
        theta: f64,
        matrix: Matrix2x2,
    ) -> Result<(GateEntry, bool)> {
        let angle_key = (theta.to_bits(), axis as u8);
        if let Some(slot) = self.dynamic_angles.get(&angle_key) {
            let entry = *self
                .dynamic_entries
                .get(&slot)
                .expect("allocated slot has an entry");
            return Ok((entry, false));
        }
        let (slot, wrapped) = self.ring.allocate();
        if wrapped {
            self.dynamic_entries.clear();
            self.dynamic_angles.clear();
        }
        let entry = intern_matrix(store, &matrix)?;
        self.dynamic_entries.insert(slot, entry);
        self.dynamic_angles.insert(angle_key, slot);
        Ok((entry, wrapped))
    }

    /// Resolves any `GateId` to its interned entry, given the raw matrix to
    /// use for the `Dynamic` case (the caller always knows which of
    /// Rx/Ry/Rz and which angle produced a dynamic id).
    pub fn entry_for(&self, store: &WeightStore, id: GateId) -> Result<GateEntry> {
        match id {
            GateId::Static(raw) => Ok(self.static_entry(raw)),
            GateId::Rk(k) => self.rk_entry(store, k),
            GateId::RkDag(k) => self.rk_dag_entry(store, k),
            GateId::Dynamic(_) => {
                Err(qdd_core::QddError::invariant_violation(
                    "dynamic gate ids must be resolved through dynamic_entry, which carries the angle",
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicAxis {
    Rx = 0,
    Ry = 1,
    Rz = 2,
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::config::{WeightBackend, WeightStoreConfig};

    fn store() -> WeightStore {
        WeightStore::new(&WeightStoreConfig {
            table_size: 1 << 16,
            tolerance: 1e-12,
            backend: WeightBackend::ComplexMap,
        })
    }

    #[test]
    fn static_gates_interned_eagerly() {
        let s = store();
        let cat = GateCatalogue::new(&s).unwrap();
        let h = cat.static_entry(GATE_H);
        assert_eq!(s.get(h.m00).re, s.get(h.m01).re);
    }

    #[test]
    fn rk_matches_named_static_gates() {
        let s = store();
        let cat = GateCatalogue::new(&s).unwrap();
        let rk2 = cat.rk_entry(&s, 2).unwrap();
        let s_gate = cat.static_entry(GATE_S);
        assert_eq!(s.get(rk2.m11), s.get(s_gate.m11));
    }

    #[test]
    fn dynamic_entry_reuses_same_angle_without_new_slot() {
        let s = store();
        let cat = GateCatalogue::new(&s).unwrap();
        let matrix = physics::rx(0.37);
        let (e1, wrapped1) = cat
            .dynamic_entry(&s, DynamicAxis::Rx, 0.37, matrix)
            .unwrap();
        let (e2, wrapped2) = cat
            .dynamic_entry(&s, DynamicAxis::Rx, 0.37, matrix)
            .unwrap();
        assert_eq!(e1, e2);
        assert!(!wrapped1);
        assert!(!wrapped2);
    }

    #[test]
    fn dynamic_ring_wraps_and_reports_it() {
        let s = store();
        let cat = GateCatalogue::new(&s).unwrap();
        let mut wrapped_once = false;
        for i in 0..DYNAMIC_RING_SIZE {
            let theta = i as f64 * 1e-3;
            let (_, wrapped) = cat
                .dynamic_entry(&s, DynamicAxis::Rz, theta, physics::rz(theta))
                .unwrap();
            if wrapped {
                wrapped_once = true;
            }
        }
        assert!(wrapped_once);
    }
}
