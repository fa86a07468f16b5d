use thiserror::Error;

use crate::engine::ValueId;

/// Structural failures raised while building or feeding a graph.
///
/// Numeric edge cases (division by zero, overflow) are not errors; they show
/// up as `inf`/`NaN` in the values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GradError {
    /// Data was written to a value that is derived from operands.
    #[error("Cannot set data on derived value {id} (op {op})")]
    InvalidMutation { id: ValueId, op: String },

    /// A vector fed into the network has the wrong width.
    #[error("Shape mismatch for {what}: expected {expected} values, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A layer or network was requested with zero neurons somewhere.
    #[error("Degenerate topology: {reason}")]
    DegenerateTopology { reason: String },
}

impl GradError {
    pub fn degenerate(reason: impl Into<String>) -> Self {
        GradError::DegenerateTopology {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GradError>;
