//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use qdd_core::prelude::*;
//! ```

pub use crate::config::{
    EngineConfig, NodeTableConfig, NormalisationScheme, OpCacheConfig, WeightBackend,
    WeightStoreConfig,
};
pub use crate::error::{QddError, Result, TableKind};
pub use crate::gate_catalogue::{
    GateId, DYNAMIC_RING_BASE, DYNAMIC_RING_SIZE, GATE_H, GATE_I, GATE_S, GATE_SQRT_X,
    GATE_SQRT_Y, GATE_T, GATE_TDAG, GATE_X, GATE_Y, GATE_Z, RK_BASE, RK_DAG_BASE, RK_SPAN,
    STATIC_GATE_COUNT,
};
pub use crate::handles::{Edge, NodeHandle, WeightHandle, C64, TERMINAL, W_MINUS_ONE, W_ONE, W_ZERO};
pub use crate::physics::Matrix2x2;
