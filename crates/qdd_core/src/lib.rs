//! # qdd-core
//!
//! Core types shared by the QDD (quantum decision diagram) engine:
//!
//! - `handles`: opaque, stable `WeightHandle`/`NodeHandle`/`Edge` types
//! - `gate_catalogue`: gate id classification (static, `Rk`/`Rk_dag`, dynamic ring)
//! - `physics`: gate matrix generators consumed when interning the catalogue
//! - `config`: `EngineConfig` and its nested table/cache/normalisation settings
//! - `error`: `QddError`, the unified error type for every fallible operation
//!
//! ## Example
//!
//! ```rust
//! use qdd_core::prelude::*;
//!
//! let edge = Edge::one();
//! assert!(!edge.is_zero());
//!
//! let gid = GateId::from_raw(GATE_H);
//! assert!(gid.is_static());
//! ```

pub mod config;
pub mod error;
pub mod gate_catalogue;
pub mod handles;
pub mod physics;
pub mod prelude;

pub use error::{QddError, Result};
pub use handles::{Edge, NodeHandle, WeightHandle, C64, TERMINAL, W_MINUS_ONE, W_ONE, W_ZERO};
