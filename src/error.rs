use thiserror::Error;
use crate::Float;

/// Result type used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A parameter was rejected at its setter
    #[error("invalid {name}: {value} (accepted range {min}..={max})")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Grid too small to hold an interior
    #[error("invalid grid dimensions {nx}x{ny}: both sides need at least 3 cells")]
    InvalidDimensions { nx: usize, ny: usize },

    /// The requested lattice could not be allocated
    #[error("unable to allocate a lattice of {cells} cells: {reason}")]
    Allocation { cells: usize, reason: String },

    /// A coordinate passed to an edit lies outside the grid
    #[error("cell ({x}, {y}) is outside the {nx}x{ny} grid")]
    OutOfBounds {
        x: isize,
        y: isize,
        nx: usize,
        ny: usize,
    },

    /// Numerical blow-up detected after a step
    #[error(
        "simulation diverged at iteration {iteration}: cell ({x}, {y}) direction {direction} holds {value}"
    )]
    Divergence {
        x: usize,
        y: usize,
        direction: usize,
        value: Float,
        iteration: u64,
    },

    /// The barrier layout does not accept edits
    #[error("barrier layout '{0}' is not editable")]
    ReadOnlyLayout(&'static str),

    /// The engine behind a control handle has been dropped
    #[error("engine is no longer receiving commands")]
    Disconnected,

    /// Failure inside a compute backend (device lost, mapping failed, ...)
    #[error("compute backend failure: {0}")]
    Backend(String),
}

impl EngineError {
    /// True for faults the surrounding layer can recover from by resetting a preset.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Divergence { .. }
                | EngineError::InvalidParameter { .. }
                | EngineError::OutOfBounds { .. }
                | EngineError::ReadOnlyLayout(_)
        )
    }
}
