//! The weight store: an intern-by-tolerance map from `C64` to `WeightHandle`.
//!
//! Three backends implement the same small capability set (create, clear,
//! find_or_put, get, count, tolerance) over different internal layouts. All
//! arithmetic (`arithmetic.rs`) is backend-agnostic: it only calls `get` and
//! `find_or_put`, so switching backends never changes an engine's semantics,
//! only its memory layout and concurrency characteristics.

use dashmap::DashMap;
use parking_lot::RwLock;
use qdd_core::config::WeightStoreConfig;
use qdd_core::error::{QddError, Result, TableKind};
use qdd_core::handles::{WeightHandle, C64, W_MINUS_ONE, W_ONE, W_ZERO};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Quantization key for tolerance-equivalence: two weights within `tolerance`
/// of each other hash to the same key once rounded onto this grid.
fn quantize(value: C64, tolerance: f64) -> (i64, i64) {
    let grid = tolerance.max(f64::EPSILON);
    let q = |x: f64| (x / grid).round() as i64;
    (q(value.re), q(value.im))
}

trait WeightStoreBackend: Send + Sync {
    fn new(config: &WeightStoreConfig) -> Self
    where
        Self: Sized;
    fn clear(&self);
    fn find_or_put(&self, value: C64) -> Result<WeightHandle>;
    fn get(&self, handle: WeightHandle) -> C64;
    fn count(&self) -> usize;
}

/// Interns the complex number directly, quantized by tolerance.
struct ComplexMapBackend {
    capacity: usize,
    forward: DashMap<(i64, i64), WeightHandle>,
    reverse: DashMap<u64, C64>,
    next: AtomicU64,
    tolerance: f64,
}

impl WeightStoreBackend for ComplexMapBackend {
    fn new(config: &WeightStoreConfig) -> Self {
        Self {
            capacity: config.table_size,
            forward: DashMap::new(),
            reverse: DashMap::new(),
            next: AtomicU64::new(0),
            tolerance: config.tolerance,
        }
    }

    fn clear(&self) {
        self.forward.clear();
        self.reverse.clear();
        self.next.store(0, Ordering::SeqCst);
    }

    fn find_or_put(&self, value: C64) -> Result<WeightHandle> {
        let key = quantize(value, self.tolerance);
        if let Some(existing) = self.forward.get(&key) {
            return Ok(*existing);
        }
        if self.reverse.len() >= self.capacity {
            return Err(QddError::TableFull(TableKind::Weight));
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let handle = WeightHandle(id);
        self.reverse.insert(id, value);
        self.forward.entry(key).or_insert(handle);
        Ok(*self.forward.get(&key).expect("just inserted"))
    }

    fn get(&self, handle: WeightHandle) -> C64 {
        *self
            .reverse
            .get(&handle.0)
            .expect("weight handle from this store")
    }

    fn count(&self) -> usize {
        self.reverse.len()
    }
}

/// Interns the real and imaginary parts independently in a shared component
/// table, then pairs their component ids into an outer handle. Effective for
/// circuits whose amplitudes share many rational-multiple real factors
/// (e.g. repeated 1/√2 terms) across both axes.
struct RealTupleMapBackend {
    capacity: usize,
    components: DashMap<i64, u32>,
    component_values: DashMap<u32, f64>,
    next_component: AtomicU64,
    combos: DashMap<u64, WeightHandle>,
    reverse: DashMap<u64, C64>,
    next_handle: AtomicU64,
    tolerance: f64,
}

impl RealTupleMapBackend {
    fn intern_component(&self, x: f64) -> Result<u32> {
        let grid = self.tolerance.max(f64::EPSILON);
        let key = (x / grid).round() as i64;
        if let Some(existing) = self.components.get(&key) {
            return Ok(*existing);
        }
        let id = self.next_component.fetch_add(1, Ordering::SeqCst) as u32;
        self.component_values.insert(id, x);
        self.components.entry(key).or_insert(id);
        Ok(*self.components.get(&key).expect("just inserted"))
    }
}

impl WeightStoreBackend for RealTupleMapBackend {
    fn new(config: &WeightStoreConfig) -> Self {
        Self {
            capacity: config.table_size,
            components: DashMap::new(),
            component_values: DashMap::new(),
            next_component: AtomicU64::new(0),
            combos: DashMap::new(),
            reverse: DashMap::new(),
            next_handle: AtomicU64::new(0),
            tolerance: config.tolerance,
        }
    }

    fn clear(&self) {
        self.components.clear();
        self.component_values.clear();
        self.next_component.store(0, Ordering::SeqCst);
        self.combos.clear();
        self.reverse.clear();
        self.next_handle.store(0, Ordering::SeqCst);
    }

    fn find_or_put(&self, value: C64) -> Result<WeightHandle> {
        let re_id = self.intern_component(value.re)?;
        let im_id = self.intern_component(value.im)?;
        let combo_key = ((re_id as u64) << 32) | im_id as u64;
        if let Some(existing) = self.combos.get(&combo_key) {
            return Ok(*existing);
        }
        if self.reverse.len() >= self.capacity {
            return Err(QddError::TableFull(TableKind::Weight));
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = WeightHandle(id);
        self.reverse.insert(id, value);
        self.combos.entry(combo_key).or_insert(handle);
        Ok(*self.combos.get(&combo_key).expect("just inserted"))
    }

    fn get(&self, handle: WeightHandle) -> C64 {
        *self
            .reverse
            .get(&handle.0)
            .expect("weight handle from this store")
    }

    fn count(&self) -> usize {
        self.reverse.len()
    }
}

/// Interns by an ordered-tree representative of the tolerance-equivalence
/// class. Lookup is O(log n) rather than O(1), but a `BTreeMap` walk lets a
/// future range query ("all weights near this magnitude") be answered
/// without scanning the whole table.
struct RealTreeMapBackend {
    capacity: usize,
    tree: RwLock<BTreeMap<(i64, i64), WeightHandle>>,
    reverse: RwLock<BTreeMap<u64, C64>>,
    next: AtomicU64,
    tolerance: f64,
}

impl WeightStoreBackend for RealTreeMapBackend {
    fn new(config: &WeightStoreConfig) -> Self {
        Self {
            capacity: config.table_size,
            tree: RwLock::new(BTreeMap::new()),
            reverse: RwLock::new(BTreeMap::new()),
            next: AtomicU64::new(0),
            tolerance: config.tolerance,
        }
    }

    fn clear(&self) {
        self.tree.write().clear();
        self.reverse.write().clear();
        self.next.store(0, Ordering::SeqCst);
    }

    fn find_or_put(&self, value: C64) -> Result<WeightHandle> {
        let key = quantize(value, self.tolerance);
        if let Some(existing) = self.tree.read().get(&key) {
            return Ok(*existing);
        }
        let mut tree = self.tree.write();
        if let Some(existing) = tree.get(&key) {
            return Ok(*existing);
        }
        let mut reverse = self.reverse.write();
        if reverse.len() >= self.capacity {
            return Err(QddError::TableFull(TableKind::Weight));
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let handle = WeightHandle(id);
        reverse.insert(id, value);
        tree.insert(key, handle);
        Ok(handle)
    }

    fn get(&self, handle: WeightHandle) -> C64 {
        *self
            .reverse
            .read()
            .get(&handle.0)
            .expect("weight handle from this store")
    }

    fn count(&self) -> usize {
        self.reverse.read().len()
    }
}

enum Backend {
    ComplexMap(ComplexMapBackend),
    RealTupleMap(RealTupleMapBackend),
    RealTree(RealTreeMapBackend),
}

/// Thread-safe intern table mapping complex amplitudes to stable handles.
///
/// Reserved handles `W_ZERO`, `W_ONE`, `W_MINUS_ONE` are seeded on
/// construction (and re-seeded first, in that order, during GC rebuild) so
/// they always compare equal across the table's lifetime.
pub struct WeightStore {
    backend: Backend,
    tolerance: f64,
    /// Thread-local-friendly coarse counter, flushed in batches of 1000 to
    /// avoid contending the backend's own atomic on every single insert.
    entries_estimate: AtomicU64,
    /// How often `arithmetic::mul_downward` (weight propagation while
    /// normalising a freshly built node, the dominant arithmetic traffic
    /// pattern) took a reserved-handle fast path vs. fell through to the
    /// store and op cache. Exposed via `Engine::mul_downward_hit_rate`.
    mul_downward_fast: AtomicU64,
    mul_downward_store: AtomicU64,
}

const ENTRIES_FLUSH_BATCH: u64 = 1000;

impl WeightStore {
    pub fn new(config: &WeightStoreConfig) -> Self {
        let backend = match config.backend {
            qdd_core::config::WeightBackend::ComplexMap => {
                Backend::ComplexMap(ComplexMapBackend::new(config))
            }
            qdd_core::config::WeightBackend::RealTupleMap => {
                Backend::RealTupleMap(RealTupleMapBackend::new(config))
            }
            qdd_core::config::WeightBackend::RealTree => {
                Backend::RealTree(RealTreeMapBackend::new(config))
            }
        };
        let store = Self {
            backend,
            tolerance: config.tolerance,
            entries_estimate: AtomicU64::new(0),
            mul_downward_fast: AtomicU64::new(0),
            mul_downward_store: AtomicU64::new(0),
        };
        store.seed_reserved();
        store
    }

    fn seed_reserved(&self) {
        let zero = self.find_or_put_raw(C64::new(0.0, 0.0)).expect("seed W_ZERO");
        let one = self.find_or_put_raw(C64::new(1.0, 0.0)).expect("seed W_ONE");
        let minus_one = self
            .find_or_put_raw(C64::new(-1.0, 0.0))
            .expect("seed W_MINUS_ONE");
        debug_assert_eq!(zero, W_ZERO);
        debug_assert_eq!(one, W_ONE);
        debug_assert_eq!(minus_one, W_MINUS_ONE);
    }

    fn find_or_put_raw(&self, value: C64) -> Result<WeightHandle> {
        match &self.backend {
            Backend::ComplexMap(b) => b.find_or_put(value),
            Backend::RealTupleMap(b) => b.find_or_put(value),
            Backend::RealTree(b) => b.find_or_put(value),
        }
    }

    /// Interns `value`, returning its stable handle. Fails with `TableFull`
    /// once the backend's logical capacity is exhausted.
    pub fn find_or_put(&self, value: C64) -> Result<WeightHandle> {
        let handle = self.find_or_put_raw(value)?;
        let batch = self.entries_estimate.fetch_add(1, Ordering::Relaxed) + 1;
        if batch % ENTRIES_FLUSH_BATCH == 0 {
            tracing::trace!(entries = self.count(), "weight store batch flush");
        }
        Ok(handle)
    }

    pub fn get(&self, handle: WeightHandle) -> C64 {
        match &self.backend {
            Backend::ComplexMap(b) => b.get(handle),
            Backend::RealTupleMap(b) => b.get(handle),
            Backend::RealTree(b) => b.get(handle),
        }
    }

    pub fn count(&self) -> usize {
        match &self.backend {
            Backend::ComplexMap(b) => b.count(),
            Backend::RealTupleMap(b) => b.count(),
            Backend::RealTree(b) => b.count(),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Records one `mul_downward` call taking the reserved-handle fast path
    /// (multiplying by `W_ZERO`/`W_ONE`/`W_MINUS_ONE`) or falling through to
    /// a genuine store lookup and op-cache probe.
    pub(crate) fn record_mul_downward(&self, fast: bool) {
        if fast {
            self.mul_downward_fast.fetch_add(1, Ordering::Relaxed);
        } else {
            self.mul_downward_store.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fraction of `mul_downward` calls that took the reserved-handle fast
    /// path, or `None` if it has never been called.
    pub fn mul_downward_hit_rate(&self) -> Option<f64> {
        let fast = self.mul_downward_fast.load(Ordering::Relaxed);
        let store = self.mul_downward_store.load(Ordering::Relaxed);
        let total = fast + store;
        if total == 0 {
            None
        } else {
            Some(fast as f64 / total as f64)
        }
    }

    /// Clears every entry and re-seeds the reserved handles. Used only by
    /// the GC rebuild, which discards this store after rewriting all live
    /// roots against a fresh one; kept here for symmetry with `NodeTable`.
    pub fn clear_and_reseed(&self) {
        match &self.backend {
            Backend::ComplexMap(b) => b.clear(),
            Backend::RealTupleMap(b) => b.clear(),
            Backend::RealTree(b) => b.clear(),
        }
        self.entries_estimate.store(0, Ordering::SeqCst);
        self.mul_downward_fast.store(0, Ordering::SeqCst);
        self.mul_downward_store.store(0, Ordering::SeqCst);
        self.seed_reserved();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdd_core::config::WeightBackend;

    fn config(backend: WeightBackend) -> WeightStoreConfig {
        WeightStoreConfig {
            table_size: 64,
            tolerance: 1e-9,
            backend,
        }
    }

    #[test]
    fn reserved_handles_seeded_for_every_backend() {
        for backend in [
            WeightBackend::ComplexMap,
            WeightBackend::RealTupleMap,
            WeightBackend::RealTree,
        ] {
            let store = WeightStore::new(&config(backend));
            assert_eq!(store.get(W_ZERO), C64::new(0.0, 0.0));
            assert_eq!(store.get(W_ONE), C64::new(1.0, 0.0));
            assert_eq!(store.get(W_MINUS_ONE), C64::new(-1.0, 0.0));
        }
    }

    #[test]
    fn find_or_put_interns_within_tolerance() {
        let store = WeightStore::new(&config(WeightBackend::ComplexMap));
        let a = store.find_or_put(C64::new(0.5, 0.5)).unwrap();
        let b = store.find_or_put(C64::new(0.5 + 1e-12, 0.5)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn table_full_once_capacity_exhausted() {
        let store = WeightStore::new(&WeightStoreConfig {
            table_size: 4,
            tolerance: 1e-9,
            backend: WeightBackend::ComplexMap,
        });
        // three reserved handles already consumed 3 of 4 slots.
        store.find_or_put(C64::new(2.0, 0.0)).unwrap();
        let err = store.find_or_put(C64::new(3.0, 0.0)).unwrap_err();
        assert!(err.is_table_full());
    }

    #[test]
    fn real_tuple_backend_shares_components_across_axes() {
        let store = WeightStore::new(&config(WeightBackend::RealTupleMap));
        let a = store.find_or_put(C64::new(0.25, 0.5)).unwrap();
        let b = store.find_or_put(C64::new(0.25, 0.5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get(a), C64::new(0.25, 0.5));
    }

    #[test]
    fn real_tree_backend_full_capability_set() {
        let store = WeightStore::new(&config(WeightBackend::RealTree));
        let h = store.find_or_put(C64::new(0.125, -0.25)).unwrap();
        assert_eq!(store.get(h), C64::new(0.125, -0.25));
        assert!(store.count() >= 4);
        assert_eq!(store.tolerance(), 1e-9);
        store.clear_and_reseed();
        assert_eq!(store.get(W_ONE), C64::new(1.0, 0.0));
    }
}
