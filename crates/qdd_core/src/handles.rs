//! Opaque handles into the weight store and node table, and the edges built from them.
//!
//! Handles are stable for the lifetime of the tables that issued them: a table never
//! reuses or relocates a handle except as part of a full garbage-collection rebuild
//! (see `qdd_engine::gc`), at which point every root referencing the old handle is
//! rewritten before the old tables are dropped.

use num_complex::Complex64;
use std::fmt;

/// Complex amplitude type used throughout the engine.
pub type C64 = Complex64;

/// Opaque 64-bit handle into the weight store.
///
/// Equality of two handles implies the underlying values are within the store's
/// tolerance of one another (the intern invariant); it does not imply bitwise
/// equality of the underlying floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeightHandle(pub u64);

impl fmt::Display for WeightHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W#{}", self.0)
    }
}

/// Opaque 64-bit handle into the node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub u64);

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N#{}", self.0)
    }
}

/// Reserved weight handle for the scalar 0.
pub const W_ZERO: WeightHandle = WeightHandle(0);
/// Reserved weight handle for the scalar 1.
pub const W_ONE: WeightHandle = WeightHandle(1);
/// Reserved weight handle for the scalar -1.
pub const W_MINUS_ONE: WeightHandle = WeightHandle(2);

/// Reserved, child-less terminal node. Every path through a QDD ends here.
pub const TERMINAL: NodeHandle = NodeHandle(0);

/// An edge: the unit passed between a node and its parent (or held as a QDD root).
///
/// Nodes themselves carry no weight; all scaling lives on the edges that point to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub weight: WeightHandle,
    pub node: NodeHandle,
}

impl Edge {
    pub const fn new(weight: WeightHandle, node: NodeHandle) -> Self {
        Self { weight, node }
    }

    /// The canonical zero edge: weight `W_ZERO` pointing at the terminal (invariant 5).
    pub const fn zero() -> Self {
        Self::new(W_ZERO, TERMINAL)
    }

    /// The canonical edge for the scalar 1 applied to the terminal.
    pub const fn one() -> Self {
        Self::new(W_ONE, TERMINAL)
    }

    pub fn is_zero(&self) -> bool {
        self.weight == W_ZERO
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.weight, self.node)
    }
}
