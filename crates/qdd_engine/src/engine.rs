//! The public, thread-safe entry point tying weight store, node table,
//! op cache, gate catalogue, DAG operations, measurement and GC together.
//!
//! `Engine` holds its four shared tables behind a single `RwLock<Arc<Tables>>`.
//! Every public operation takes a brief read lock only long enough to clone
//! the `Arc`, then runs entirely lock-free against that snapshot — satisfying
//! "no task holds a lock across a spawn/join". GC is the one operation that
//! takes the write lock, and only to publish the rebuilt snapshot; the
//! (potentially large) rebuild itself runs against a read-only view of the
//! old tables, so no DAG operation is blocked while it computes.
//!
//! State is addressed by `RootId`, not by `Edge` directly: GC rewrites the
//! `Edge` a root resolves to, so a client that held on to an `Edge` across a
//! GC cycle would silently be looking at stale, no-longer-reachable nodes.
//! `RootId` is the handle that survives a GC cycle; `resolve_root` always
//! returns the current edge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use qdd_core::config::{EngineConfig, NormalisationScheme};
use qdd_core::gate_catalogue::GateId;
use qdd_core::handles::{Edge, C64};
use qdd_core::physics::Matrix2x2;
use qdd_core::{QddError, Result};
use rand::Rng;

use crate::dag_ops;
use crate::gate_catalogue::{DynamicAxis, GateEntry};
use crate::gc::{self, Tables};
use crate::invariants;
use crate::measurement;

/// Opaque handle to a registered root. Stable across GC cycles; resolve with
/// [`Engine::resolve_root`] to get the `Edge` current as of this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(u64);

pub struct Engine {
    config: EngineConfig,
    tables: parking_lot::RwLock<Arc<Tables>>,
    roots: DashMap<RootId, Edge>,
    /// Qubit count a root was created/derived with, so gate and measurement
    /// calls can reject an out-of-range index at the public boundary
    /// (`BadQubitIndex`) instead of asserting deep inside `dag_ops`.
    qubit_counts: DashMap<RootId, usize>,
    next_root: AtomicU64,
    granularity: u32,
    /// Fixed work-stealing pool every DAG operation runs on; `dag_ops`'s
    /// `rayon::join` calls spawn onto whichever pool is current when they
    /// run, so every public operation installs itself on this one rather
    /// than the global default pool. Sized from `config.workers` (`0` defers
    /// to `rayon`'s own default, `std::thread::available_parallelism`).
    pool: rayon::ThreadPool,
}

impl Engine {
    /// Builds a fresh engine instance: a new weight store, node table, op
    /// cache and gate catalogue, all empty except for the reserved handles
    /// and the eagerly-interned static gates.
    #[tracing::instrument(skip(config))]
    pub fn init(config: EngineConfig) -> Result<Self> {
        let tables = Tables::new(&config)?;
        let mut builder = rayon::ThreadPoolBuilder::new();
        if config.workers > 0 {
            builder = builder.num_threads(config.workers);
        }
        let pool = builder
            .build()
            .map_err(|e| QddError::config(format!("failed to start worker pool: {e}")))?;
        Ok(Self {
            granularity: config.op_cache.cache_granularity,
            config,
            tables: parking_lot::RwLock::new(Arc::new(tables)),
            roots: DashMap::new(),
            qubit_counts: DashMap::new(),
            next_root: AtomicU64::new(0),
            pool,
        })
    }

    fn snapshot(&self) -> Arc<Tables> {
        self.tables.read().clone()
    }

    fn scheme(&self) -> NormalisationScheme {
        self.config.normalisation
    }

    /// Registers an edge as a root with no associated qubit count (used for
    /// operands, such as a bare matrix QDD, that aren't a state vector in
    /// their own right). State-producing calls use [`Self::register_state`].
    pub fn register_root(&self, edge: Edge) -> RootId {
        let id = RootId(self.next_root.fetch_add(1, Ordering::Relaxed));
        self.roots.insert(id, edge);
        id
    }

    /// Registers a freshly produced state vector QDD as a root. When
    /// `config.self_test` is set, also re-checks unitarity (testable
    /// property 5: `sum |amplitude|^2 == 1` within `10 * tau`) before
    /// registering, since this is the one place every state-producing
    /// operation funnels through regardless of which gate or combinator
    /// built it.
    fn register_state(&self, edge: Edge, num_qubits: usize) -> Result<RootId> {
        if self.config.self_test {
            let tables = self.snapshot();
            let total = measurement::total_norm_sqr(&tables.weights, &tables.nodes, edge);
            let tolerance = tables.weights.tolerance();
            if (total - 1.0).abs() >= 10.0 * tolerance {
                return Err(QddError::invariant_violation(format!(
                    "unitarity check failed: sum |amplitude|^2 = {total}"
                )));
            }
        }
        let id = self.register_root(edge);
        self.qubit_counts.insert(id, num_qubits);
        Ok(id)
    }

    pub fn unregister_root(&self, id: RootId) {
        self.roots.remove(&id);
        self.qubit_counts.remove(&id);
    }

    pub fn resolve_root(&self, id: RootId) -> Result<Edge> {
        self.roots
            .get(&id)
            .map(|r| *r)
            .ok_or_else(|| QddError::invariant_violation(format!("unknown root {:?}", id)))
    }

    fn num_qubits(&self, id: RootId) -> Result<usize> {
        self.qubit_counts
            .get(&id)
            .map(|r| *r)
            .ok_or_else(|| QddError::invariant_violation(format!("root {:?} has no tracked qubit count", id)))
    }

    fn check_qubit(&self, qubit: u32, num_qubits: usize) -> Result<()> {
        if qubit as usize >= num_qubits {
            Err(QddError::BadQubitIndex {
                qubit: qubit as usize,
                num_qubits,
            })
        } else {
            Ok(())
        }
    }

    /// Rejects controls the `apply_controlled_gate` recursion can't carry:
    /// anything unsorted or not strictly below `target`. See `DESIGN.md` for
    /// why this is a real boundary check rather than a debug assertion.
    fn check_control_order(&self, controls: &[u32], target: u32) -> Result<()> {
        let sorted_ascending = controls.windows(2).all(|w| w[0] < w[1]);
        let all_below_target = controls.last().map_or(true, |&last| last < target);
        if sorted_ascending && all_below_target {
            Ok(())
        } else {
            Err(QddError::UnorderedControls {
                controls: controls.to_vec(),
                target,
            })
        }
    }

    fn fill_fraction(&self, tables: &Tables) -> f64 {
        tables.weights.count() as f64 / self.config.weight_store.table_size.max(1) as f64
    }

    fn should_gc(&self, tables: &Tables) -> bool {
        self.config.gc_threshold > 0.0 && self.fill_fraction(tables) >= self.config.gc_threshold
    }

    /// Runs `op` against the current table snapshot on the engine's worker
    /// pool. Before running it, triggers a proactive GC cycle if the weight
    /// store's fill fraction has crossed `config.gc_threshold`; on
    /// `TableFull` regardless of that check, triggers one GC cycle and
    /// retries exactly once, per the crate's unwind-and-retry cancellation
    /// model. When `config.self_test` is set, the result is re-walked for
    /// structural invariant violations before being handed back.
    fn with_retry<F>(&self, mut op: F) -> Result<Edge>
    where
        F: FnMut(&Tables) -> Result<Edge>,
    {
        self.pool.install(|| {
            let mut tables = self.snapshot();
            if self.should_gc(&tables) {
                tracing::debug!(fill = self.fill_fraction(&tables), "gc_threshold crossed, running proactive gc");
                self.gc()?;
                tables = self.snapshot();
            }
            let result = match op(&tables) {
                Err(e) if e.is_table_full() => {
                    tracing::debug!("table full, triggering gc and retrying");
                    self.gc()?;
                    tables = self.snapshot();
                    op(&tables)
                }
                other => other,
            }?;
            if self.config.self_test {
                invariants::check_structural_invariants(&tables.nodes, &tables.weights, self.scheme(), result)?;
            }
            Ok(result)
        })
    }

    pub fn create_all_zero_state(&self, num_qubits: usize) -> Result<RootId> {
        let edge = self.with_retry(|t| {
            dag_ops::all_zero_state(&t.weights, &t.nodes, &t.op_cache, self.scheme(), num_qubits)
        })?;
        self.register_state(edge, num_qubits)
    }

    #[tracing::instrument(skip(self))]
    pub fn apply_gate(&self, root: RootId, gate_id: u32, target: u32) -> Result<RootId> {
        let n = self.num_qubits(root)?;
        self.check_qubit(target, n)?;
        // Re-resolved inside the closure on every attempt: a gc-and-retry
        // cycle rewrites `root`'s edge, and the retry must see the rewritten
        // one, not the pre-gc handle it was called with.
        let result = self.with_retry(|t| {
            let edge = self.resolve_root(root)?;
            let gate = t.gates.entry_for(&t.weights, GateId::from_raw(gate_id))?;
            dag_ops::apply_gate(
                &t.weights,
                &t.nodes,
                &t.op_cache,
                self.scheme(),
                edge,
                &gate,
                target,
                0,
                self.granularity,
            )
        })?;
        self.register_state(result, n)
    }

    /// Applies a dynamic (runtime-angle) Rx/Ry/Rz rotation. Wrapping the
    /// gate catalogue's angle ring invalidates the op cache, since a cached
    /// entry keyed on a reused ring slot would otherwise alias a stale angle.
    pub fn apply_dynamic_gate(
        &self,
        root: RootId,
        axis: DynamicAxis,
        theta: f64,
        matrix: Matrix2x2,
        target: u32,
    ) -> Result<RootId> {
        let n = self.num_qubits(root)?;
        self.check_qubit(target, n)?;
        let result = self.with_retry(|t| {
            let edge = self.resolve_root(root)?;
            let (gate, wrapped) = t.gates.dynamic_entry(&t.weights, axis, theta, matrix)?;
            if wrapped {
                t.op_cache.clear();
            }
            dag_ops::apply_gate(
                &t.weights,
                &t.nodes,
                &t.op_cache,
                self.scheme(),
                edge,
                &gate,
                target,
                0,
                self.granularity,
            )
        })?;
        self.register_state(result, n)
    }

    /// Applies a gate controlled on every qubit in `controls`. All control
    /// indices must precede `target` in variable order (the one- and
    /// two-control Bell/GHZ/Grover scenarios in the test suite all take this
    /// shape); see `dag_ops::apply_controlled_gate` for the restriction.
    #[tracing::instrument(skip(self, controls))]
    pub fn apply_cgate(
        &self,
        root: RootId,
        gate_id: u32,
        controls: &[u32],
        target: u32,
    ) -> Result<RootId> {
        let n = self.num_qubits(root)?;
        self.check_qubit(target, n)?;
        for &c in controls {
            self.check_qubit(c, n)?;
        }
        self.check_control_order(controls, target)?;
        let result = self.with_retry(|t| {
            let edge = self.resolve_root(root)?;
            let gate = t.gates.entry_for(&t.weights, GateId::from_raw(gate_id))?;
            dag_ops::apply_controlled_gate(
                &t.weights,
                &t.nodes,
                &t.op_cache,
                self.scheme(),
                edge,
                &gate,
                controls,
                target,
                0,
                self.granularity,
            )
        })?;
        self.register_state(result, n)
    }

    /// Applies a gate given directly as an interned [`GateEntry`], bypassing
    /// the gate-id catalogue lookup (used when the caller already resolved
    /// a `GateEntry`, e.g. for custom-matrix experimentation).
    pub fn apply_gate_entry(&self, root: RootId, gate: &GateEntry, target: u32) -> Result<RootId> {
        let n = self.num_qubits(root)?;
        self.check_qubit(target, n)?;
        let result = self.with_retry(|t| {
            let edge = self.resolve_root(root)?;
            dag_ops::apply_gate(
                &t.weights,
                &t.nodes,
                &t.op_cache,
                self.scheme(),
                edge,
                gate,
                target,
                0,
                self.granularity,
            )
        })?;
        self.register_state(result, n)
    }

    pub fn plus(&self, a: RootId, b: RootId) -> Result<RootId> {
        let na = self.num_qubits(a)?;
        let nb = self.num_qubits(b)?;
        if na != nb {
            return Err(QddError::invariant_violation(format!(
                "plus operands carry {na} and {nb} qubits"
            )));
        }
        let result = self.with_retry(|t| {
            let ea = self.resolve_root(a)?;
            let eb = self.resolve_root(b)?;
            dag_ops::plus(
                &t.weights,
                &t.nodes,
                &t.op_cache,
                self.scheme(),
                ea,
                eb,
                0,
                self.granularity,
            )
        })?;
        self.register_state(result, na)
    }

    /// Multiplies a 2n-variable matrix QDD by an n-variable vector QDD.
    /// `num_qubits` is `n`, matching the vector's own qubit count.
    pub fn matvec_mult(&self, matrix: RootId, vector: RootId, num_qubits: usize) -> Result<RootId> {
        let result = self.with_retry(|t| {
            let m = self.resolve_root(matrix)?;
            let v = self.resolve_root(vector)?;
            dag_ops::matvec_mult(
                &t.weights,
                &t.nodes,
                &t.op_cache,
                self.scheme(),
                m,
                v,
                num_qubits,
                self.granularity,
            )
        })?;
        self.register_state(result, num_qubits)
    }

    pub fn matmat_mult(&self, a: RootId, b: RootId, num_qubits: usize) -> Result<RootId> {
        let result = self.with_retry(|t| {
            let ea = self.resolve_root(a)?;
            let eb = self.resolve_root(b)?;
            dag_ops::matmat_mult(
                &t.weights,
                &t.nodes,
                &t.op_cache,
                self.scheme(),
                ea,
                eb,
                num_qubits,
                self.granularity,
            )
        })?;
        Ok(self.register_root(result))
    }

    pub fn get_amplitude(&self, root: RootId, bits: &[bool]) -> Result<C64> {
        let edge = self.resolve_root(root)?;
        let tables = self.snapshot();
        measurement::get_amplitude(&tables.weights, &tables.nodes, &tables.op_cache, edge, bits)
    }

    pub fn count_nodes(&self, root: RootId) -> Result<usize> {
        let edge = self.resolve_root(root)?;
        let tables = self.snapshot();
        Ok(dag_ops::count_nodes(&tables.nodes, edge))
    }

    /// Total `sum |amplitude|^2` over every basis state, computed by a single
    /// DAG walk rather than enumerating `2^n` basis states. Should equal 1
    /// (within tolerance) for any state reachable by unitary gate application
    /// alone; exposed for the unitarity testable property and for self-test
    /// mode's sanity checks.
    pub fn total_norm_sqr(&self, root: RootId) -> Result<f64> {
        let edge = self.resolve_root(root)?;
        let tables = self.snapshot();
        Ok(measurement::total_norm_sqr(&tables.weights, &tables.nodes, edge))
    }

    /// Measures a single qubit, collapsing the registered root in place
    /// (the stored `Edge` for `root` is replaced by the post-collapse edge)
    /// and returning the observed bit and its probability.
    ///
    /// Eager: this is a plain measurement with no notion of a "pending"
    /// measurement deferred to a later point in a circuit. Mid-circuit
    /// measurement ordering (if any) is a parser-side concern above this
    /// crate.
    pub fn measure_qubit(
        &self,
        root: RootId,
        q: u32,
        rng: &mut impl Rng,
    ) -> Result<(u8, f64)> {
        let edge = self.resolve_root(root)?;
        let n = self.num_qubits(root)?;
        self.check_qubit(q, n)?;
        let tables = self.snapshot();
        let (bit, prob, new_edge) =
            measurement::measure_qubit(&tables.weights, &tables.nodes, &tables.op_cache, self.scheme(), edge, q, rng)?;
        self.roots.insert(root, new_edge);
        Ok((bit, prob))
    }

    /// Measures every qubit `0..num_qubits` in order, collapsing the
    /// registered root as it goes, and returns the observed bitstring.
    pub fn measure_all(&self, root: RootId, num_qubits: usize, rng: &mut impl Rng) -> Result<Vec<u8>> {
        let edge = self.resolve_root(root)?;
        let n = self.num_qubits(root)?;
        if num_qubits > n {
            return Err(QddError::BadQubitIndex {
                qubit: num_qubits.saturating_sub(1),
                num_qubits: n,
            });
        }
        let tables = self.snapshot();
        let (bits, new_edge) = measurement::measure_all(
            &tables.weights,
            &tables.nodes,
            &tables.op_cache,
            self.scheme(),
            edge,
            num_qubits,
            rng,
        )?;
        self.roots.insert(root, new_edge);
        Ok(bits)
    }

    /// Samples `shots` independent full-register measurements against the
    /// current state of `root`, without collapsing it: each shot measures a
    /// throwaway copy of the root edge.
    pub fn sample(
        &self,
        root: RootId,
        num_qubits: usize,
        shots: usize,
        rng: &mut impl Rng,
    ) -> Result<std::collections::HashMap<String, usize>> {
        let edge = self.resolve_root(root)?;
        let n = self.num_qubits(root)?;
        if num_qubits > n {
            return Err(QddError::BadQubitIndex {
                qubit: num_qubits.saturating_sub(1),
                num_qubits: n,
            });
        }
        let tables = self.snapshot();
        measurement::sample(
            &tables.weights,
            &tables.nodes,
            &tables.op_cache,
            self.scheme(),
            edge,
            num_qubits,
            shots,
            rng,
        )
    }

    /// Rebuilds the weight store, node table and op cache from scratch,
    /// keeping only what is reachable from a currently registered root.
    /// A global barrier: no other `Engine` method may run concurrently with
    /// this one (enforced by the write lock held for the whole rebuild).
    #[tracing::instrument(skip(self))]
    pub fn gc(&self) -> Result<()> {
        let mut guard = self.tables.write();
        let old = guard.clone();
        let (ids, roots): (Vec<RootId>, Vec<Edge>) =
            self.roots.iter().map(|r| (*r.key(), *r.value())).unzip();
        let (fresh, rewritten) = gc::collect(&self.config, &old, &roots)?;
        for (id, edge) in ids.into_iter().zip(rewritten.into_iter()) {
            self.roots.insert(id, edge);
        }
        *guard = Arc::new(fresh);
        tracing::info!(
            nodes = guard.nodes.count(),
            weights = guard.weights.count(),
            "gc complete"
        );
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.snapshot().nodes.count()
    }

    pub fn weight_count(&self) -> usize {
        self.snapshot().weights.count()
    }

    pub fn op_cache_hit_rate(&self) -> f64 {
        self.snapshot().op_cache.hit_rate()
    }

    /// Fraction of downward weight-propagation multiplications (the
    /// dominant arithmetic traffic pattern while normalising freshly built
    /// nodes) that took a reserved-handle fast path, or `None` before the
    /// first gate application.
    pub fn mul_downward_hit_rate(&self) -> Option<f64> {
        self.snapshot().weights.mul_downward_hit_rate()
    }

    /// Drops every registered root. Subsequent operations on roots created
    /// before this call return `InvariantViolation`. The tables themselves
    /// are reclaimed by ordinary `Arc` drop once the last snapshot held by
    /// an in-flight operation is released.
    pub fn shutdown(&self) {
        self.roots.clear();
        self.qubit_counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::gate_catalogue::{GATE_H, GATE_X, GATE_Z};

    fn engine() -> Engine {
        Engine::init(EngineConfig::default()).unwrap()
    }

    #[test]
    fn bell_state_has_three_nodes_and_correct_amplitudes() {
        let e = engine();
        let s = e.create_all_zero_state(2).unwrap();
        let s = e.apply_gate(s, GATE_H, 0).unwrap();
        let s = e.apply_cgate(s, GATE_X, &[0], 1).unwrap();

        let amp00 = e.get_amplitude(s, &[false, false]).unwrap();
        let amp11 = e.get_amplitude(s, &[true, true]).unwrap();
        let amp01 = e.get_amplitude(s, &[false, true]).unwrap();
        let amp10 = e.get_amplitude(s, &[true, false]).unwrap();

        let expect = std::f64::consts::FRAC_1_SQRT_2;
        assert!((amp00.re - expect).abs() < 1e-9);
        assert!((amp11.re - expect).abs() < 1e-9);
        assert!(amp01.norm() < 1e-9);
        assert!(amp10.norm() < 1e-9);
        assert_eq!(e.count_nodes(s).unwrap(), 3);
    }

    #[test]
    fn phase_kickback_h_z_h_matches_direct_x() {
        let e = engine();
        let s = e.create_all_zero_state(1).unwrap();
        let via_hzh = e.apply_gate(s, GATE_H, 0).unwrap();
        let via_hzh = e.apply_gate(via_hzh, GATE_Z, 0).unwrap();
        let via_hzh = e.apply_gate(via_hzh, GATE_H, 0).unwrap();

        let direct_x = e.apply_gate(s, GATE_X, 0).unwrap();

        let edge_hzh = e.resolve_root(via_hzh).unwrap();
        let edge_x = e.resolve_root(direct_x).unwrap();
        assert_eq!(edge_hzh, edge_x);
    }

    #[test]
    fn measuring_collapses_the_registered_root() {
        use rand::SeedableRng;
        let e = engine();
        let s = e.create_all_zero_state(2).unwrap();
        let s = e.apply_gate(s, GATE_H, 0).unwrap();
        let s = e.apply_cgate(s, GATE_X, &[0], 1).unwrap();

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let (b0, _) = e.measure_qubit(s, 0, &mut rng).unwrap();
        let (b1, _) = e.measure_qubit(s, 1, &mut rng).unwrap();
        assert_eq!(b0, b1);
    }

    #[test]
    fn gc_preserves_amplitudes_of_registered_roots() {
        let e = engine();
        let s = e.create_all_zero_state(2).unwrap();
        let s = e.apply_gate(s, GATE_H, 0).unwrap();
        let s = e.apply_cgate(s, GATE_X, &[0], 1).unwrap();
        let before = e.get_amplitude(s, &[true, true]).unwrap();

        e.gc().unwrap();

        let after = e.get_amplitude(s, &[true, true]).unwrap();
        assert!((before - after).norm() < 1e-9);
    }

    #[test]
    fn out_of_range_qubit_is_rejected_at_the_boundary() {
        let e = engine();
        let s = e.create_all_zero_state(2).unwrap();
        let err = e.apply_gate(s, GATE_X, 5).unwrap_err();
        assert!(matches!(err, QddError::BadQubitIndex { qubit: 5, num_qubits: 2 }));
    }

    #[test]
    fn control_past_target_is_rejected_instead_of_silently_wrong() {
        let e = engine();
        let s = e.create_all_zero_state(3).unwrap();
        let err = e.apply_cgate(s, GATE_X, &[2], 0).unwrap_err();
        assert!(matches!(
            err,
            QddError::UnorderedControls { target: 0, .. }
        ));
    }

    #[test]
    fn unsorted_controls_are_rejected() {
        let e = engine();
        let s = e.create_all_zero_state(3).unwrap();
        let err = e.apply_cgate(s, GATE_X, &[1, 0], 2).unwrap_err();
        assert!(matches!(
            err,
            QddError::UnorderedControls { target: 2, .. }
        ));
    }

    #[test]
    fn table_full_triggers_one_gc_and_retries() {
        let mut config = EngineConfig::default();
        config.node_table.table_size = 2;
        let e = Engine::init(config).unwrap();
        let s = e.create_all_zero_state(1).unwrap();
        let s2 = e.apply_gate(s, GATE_X, 0).unwrap();
        assert_eq!(e.node_count(), 2);

        // `s`'s node is now unreachable, but the table doesn't know that
        // until a GC sweep runs: it is still full at capacity 2.
        e.unregister_root(s);
        let s3 = e.apply_gate(s2, GATE_H, 0);
        assert!(s3.is_ok(), "table-full should recover via one gc-and-retry cycle");
    }
}
