//! Error types for the QDD engine.

use thiserror::Error;

/// Which table reported a capacity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Weight,
    Node,
    OpCache,
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableKind::Weight => write!(f, "weight store"),
            TableKind::Node => write!(f, "node table"),
            TableKind::OpCache => write!(f, "op cache"),
        }
    }
}

/// Unified error type for QDD engine operations.
#[derive(Error, Debug)]
pub enum QddError {
    /// A table could not accept a new entry (load factor exceeded). Recovered
    /// internally by triggering GC and retrying once; escalated if still full.
    #[error("{0} is full")]
    TableFull(TableKind),

    /// A canonical invariant was violated. Only raised when self-test mode is
    /// enabled; fatal to the operation that detected it.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An unrecognised gate id was requested.
    #[error("unknown gate id {0}")]
    UnknownGate(u32),

    /// A qubit index fell outside `[0, num_qubits)`.
    #[error("qubit index {qubit} out of range for {num_qubits} qubits")]
    BadQubitIndex { qubit: usize, num_qubits: usize },

    /// A multi-controlled gate's `controls` were not sorted ascending and
    /// strictly below `target` (the only ordering `apply_cgate`'s recursion
    /// carries a single combined edge through).
    #[error(
        "controls {controls:?} must be sorted ascending and strictly less than target {target}"
    )]
    UnorderedControls { controls: Vec<u32>, target: u32 },

    /// A numerical operation lost precision (e.g. normalising a near-zero edge).
    /// Non-fatal: the operation returns a best-effort result.
    #[error("precision loss: {0}")]
    PrecisionLoss(String),

    /// Engine configuration was invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error, surfaced from configuration load/save.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error, surfaced from configuration load/save.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for QDD engine operations.
pub type Result<T> = std::result::Result<T, QddError>;

impl QddError {
    pub fn invariant_violation(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn precision_loss(msg: impl Into<String>) -> Self {
        Self::PrecisionLoss(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the one class of error the engine recovers from automatically
    /// (trigger GC, retry once).
    pub fn is_table_full(&self) -> bool {
        matches!(self, Self::TableFull(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_full_display() {
        let err = QddError::TableFull(TableKind::Node);
        assert!(err.to_string().contains("node table"));
        assert!(err.is_table_full());
    }

    #[test]
    fn bad_qubit_display() {
        let err = QddError::BadQubitIndex {
            qubit: 5,
            num_qubits: 3,
        };
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn unordered_controls_display() {
        let err = QddError::UnorderedControls {
            controls: vec![2, 0],
            target: 1,
        };
        assert!(err.to_string().contains("target 1"));
    }

    #[test]
    fn constructors() {
        assert!(!QddError::invariant_violation("bad edge").is_table_full());
        assert!(matches!(
            QddError::precision_loss("underflow"),
            QddError::PrecisionLoss(_)
        ));
    }
}
