//! Configuration for the QDD engine.

use serde::{Deserialize, Serialize};

/// Which normalisation scheme a node's outgoing edges are canonicalised under.
///
/// Exactly one scheme is active for the lifetime of an engine instance; see
/// `qdd_engine::normaliser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalisationScheme {
    /// Extract `low.weight` when non-zero, else `high.weight`.
    LowNonZero,
    /// Extract the larger-magnitude of the two edge weights (ties favour `low`).
    Largest,
    /// Extract by L2 norm so |wl|^2 + |wh|^2 = 1, fixing the remaining global phase.
    L2,
}

impl Default for NormalisationScheme {
    fn default() -> Self {
        Self::LowNonZero
    }
}

/// Which backend implements the weight store's intern-by-tolerance map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeightBackend {
    /// Intern (re, im) pairs directly, quantised by tolerance.
    ComplexMap,
    /// Intern the real and imaginary components independently.
    RealTupleMap,
    /// Intern by an ordered-tree representative of the tolerance-equivalence class.
    RealTree,
}

impl Default for WeightBackend {
    fn default() -> Self {
        Self::ComplexMap
    }
}

/// Capacity and tolerance configuration for the weight store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightStoreConfig {
    /// Logical capacity; a `find_or_put` beyond this returns `TableFull`.
    pub table_size: usize,
    /// epsilon for weight equality.
    pub tolerance: f64,
    /// Active backend.
    pub backend: WeightBackend,
}

impl Default for WeightStoreConfig {
    fn default() -> Self {
        Self {
            table_size: 1 << 20,
            tolerance: 1e-14,
            backend: WeightBackend::default(),
        }
    }
}

/// Capacity configuration for the node table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeTableConfig {
    /// Logical capacity; must be a power of two. A `find_or_put` beyond this
    /// returns `TableFull`.
    pub table_size: usize,
}

impl Default for NodeTableConfig {
    fn default() -> Self {
        Self {
            table_size: 1 << 20,
        }
    }
}

/// Capacity and granularity configuration for the operation cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpCacheConfig {
    /// Logical capacity; replace-on-collision once full, never returns `TableFull`.
    pub table_size: usize,
    /// How many recursion levels are skipped between cache probes (1 = every level).
    pub cache_granularity: u32,
    /// Whether to also cache the cheap inverse relations of a memoised binary op.
    pub insert_inverses: bool,
}

impl Default for OpCacheConfig {
    fn default() -> Self {
        Self {
            table_size: 1 << 20,
            cache_granularity: 1,
            insert_inverses: true,
        }
    }
}

/// Top-level configuration consumed by `Engine::init`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    pub weight_store: WeightStoreConfig,
    pub node_table: NodeTableConfig,
    pub op_cache: OpCacheConfig,
    pub normalisation: NormalisationScheme,
    /// Fill fraction of the weight store that triggers a GC cycle.
    pub gc_threshold: f64,
    /// Fixed worker-pool size for the work-stealing scheduler. `0` means "let
    /// the runtime choose" (`std::thread::available_parallelism`).
    pub workers: usize,
    /// When set, every public operation re-checks invariants 1-5 and unitarity
    /// (see the test suite) and returns `InvariantViolation` rather than
    /// silently continuing.
    pub self_test: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weight_store: WeightStoreConfig::default(),
            node_table: NodeTableConfig::default(),
            op_cache: OpCacheConfig::default(),
            normalisation: NormalisationScheme::default(),
            // Midpoint of the spec's default 0.25-0.5 fill-fraction range.
            gc_threshold: 0.375,
            workers: 0,
            self_test: false,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Serializes configuration to a JSON string.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }
}
