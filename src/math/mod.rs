//! Mathematical primitives for the pairs research pipeline.
//!
//! This module provides the statistical machinery the pipeline is built
//! from: Kalman filtering for dynamic hedge ratio estimation, signal
//! smoothing with lag enforcement, Ornstein-Uhlenbeck parameter fitting,
//! and performance statistics.

pub mod kalman;
pub mod ou;
pub mod smoothing;
pub mod stats;

pub use kalman::{HedgePath, InterceptHedgePath, KalmanConfig, KalmanHedgeFilter};
pub use ou::{DiscreteOuFit, MleOuFit, OuMleConfig, OuReport};
pub use smoothing::{SmootherConfig, SmoothingMethod};

use crate::error::PairsError;

/// Reject paired series of different lengths.
pub(crate) fn ensure_aligned(left: &[f64], right: &[f64]) -> Result<(), PairsError> {
    if left.len() != right.len() {
        return Err(PairsError::Dimension {
            left: left.len(),
            right: right.len(),
        });
    }
    Ok(())
}

/// Reject series containing NaN or infinite values.
pub(crate) fn ensure_finite(name: &str, series: &[f64]) -> Result<(), PairsError> {
    if series.iter().any(|v| !v.is_finite()) {
        return Err(PairsError::InvalidInput(format!(
            "{name} series contains non-finite values"
        )));
    }
    Ok(())
}
