//! # qdd-engine
//!
//! Symbolic quantum circuit simulation over algebraic decision diagrams
//! (QDD/AADD): states and operators are represented as a canonical, edge
//! weighted DAG rather than a dense state vector, so that circuits with
//! internal structure (repeated substates, product states, stabiliser-like
//! symmetry) stay small regardless of qubit count.
//!
//! ## Modules
//! - **weight_store**: hash-consed interning of the complex edge weights.
//! - **node_table**: hash-consed interning of `(var, low, high)` nodes.
//! - **normaliser**: the edge-weight normalisation schemes that keep the DAG
//!   canonical (two equal states always share one representation).
//! - **op_cache**: memoization of recursive DAG operations.
//! - **arithmetic**: weight-handle arithmetic (add/mul/div/...) through the
//!   weight store, with no raw complex math outside it.
//! - **gate_catalogue**: interning of gate matrices, static and dynamic.
//! - **dag_ops**: the recursive DAG algorithms — gate application, addition,
//!   matrix/vector and matrix/matrix contraction, and the all-zero state.
//! - **measurement**: Born-rule probability, collapse, sampling.
//! - **gc**: table-rebuilding garbage collection.
//! - **invariants**: optional self-test structural invariant checking.
//! - **engine**: the public, thread-safe `Engine` handle tying the above
//!   together.

pub mod arithmetic;
pub mod dag_ops;
pub mod engine;
pub mod gate_catalogue;
pub mod gc;
pub mod invariants;
pub mod measurement;
pub mod node_table;
pub mod normaliser;
pub mod op_cache;
pub mod weight_store;

pub use engine::{Engine, RootId};
pub use gate_catalogue::{DynamicAxis, GateCatalogue, GateEntry};
pub use qdd_core::config::{EngineConfig, NormalisationScheme};
pub use qdd_core::handles::{Edge, NodeHandle, WeightHandle, C64};
pub use qdd_core::{QddError, Result};
