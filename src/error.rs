//! Error types shared by the estimation and backtest components.
//!
//! Malformed input and malformed configuration are rejected at the
//! component boundary before any computation runs. Numerically degenerate
//! but well-defined outcomes (e.g. a non-mean-reverting AR(1) coefficient)
//! are encoded as NaN fields on an otherwise successful result, and
//! optimizer non-convergence is a flag on the fit; neither is an error.

use thiserror::Error;

/// Errors produced by the hedge estimation, fitting, and backtest components.
#[derive(Error, Debug)]
pub enum PairsError {
    /// Input series contains non-finite values or a non-increasing index
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Paired series have different lengths
    #[error("dimension mismatch: first series has {left} points, second has {right}")]
    Dimension { left: usize, right: usize },

    /// Series too short for the requested computation
    #[error("insufficient data: expected at least {expected} data points, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    /// Semantically invalid hyperparameters
    #[error("invalid configuration: {0}")]
    Configuration(String),
}
