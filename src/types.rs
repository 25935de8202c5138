//! Common Types Module
//!
//! Shared types used across the estimation and backtest components.

use serde::{Deserialize, Serialize};

use crate::error::PairsError;

/// Two aligned price series sharing a strictly increasing timestamp index.
///
/// Alignment (no gaps, identical index) is the responsibility of the data
/// layer that produced the series; this type enforces the invariant on
/// construction so downstream components can assume it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePair {
    timestamps: Vec<i64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl PricePair {
    /// Build an aligned pair from a shared timestamp index and two price series.
    ///
    /// # Errors
    /// - [`PairsError::Dimension`] when the series lengths differ.
    /// - [`PairsError::InvalidInput`] when the index is not strictly
    ///   increasing or any price is non-finite.
    pub fn new(timestamps: Vec<i64>, x: Vec<f64>, y: Vec<f64>) -> Result<Self, PairsError> {
        if x.len() != y.len() {
            return Err(PairsError::Dimension {
                left: x.len(),
                right: y.len(),
            });
        }
        if timestamps.len() != x.len() {
            return Err(PairsError::Dimension {
                left: timestamps.len(),
                right: x.len(),
            });
        }
        if timestamps.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PairsError::InvalidInput(
                "timestamps must be strictly increasing".to_string(),
            ));
        }
        if x.iter().chain(y.iter()).any(|p| !p.is_finite()) {
            return Err(PairsError::InvalidInput(
                "price series contain non-finite values".to_string(),
            ));
        }
        Ok(Self { timestamps, x, y })
    }

    /// Build a pair with a synthetic `0..n` index, for series whose
    /// timestamps are implicit (e.g. already-resampled daily bars).
    pub fn from_prices(x: Vec<f64>, y: Vec<f64>) -> Result<Self, PairsError> {
        let timestamps = (0..x.len() as i64).collect();
        Self::new(timestamps, x, y)
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// True when the pair holds no observations.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Shared timestamp index.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Independent-leg prices (the regressor).
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Dependent-leg prices.
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Spread `y[t] - beta_used[t] * x[t]` under a per-step hedge ratio.
    ///
    /// `beta_used` should be the smoothed and lagged hedge path, so the
    /// spread at t only reflects information available before t.
    ///
    /// # Errors
    /// - [`PairsError::Dimension`] when `beta_used` has a different length.
    /// - [`PairsError::InvalidInput`] when `beta_used` contains non-finite values.
    pub fn hedged_spread(&self, beta_used: &[f64]) -> Result<Vec<f64>, PairsError> {
        if beta_used.len() != self.len() {
            return Err(PairsError::Dimension {
                left: self.len(),
                right: beta_used.len(),
            });
        }
        if beta_used.iter().any(|b| !b.is_finite()) {
            return Err(PairsError::InvalidInput(
                "hedge ratio series contains non-finite values".to_string(),
            ));
        }
        Ok(self
            .y
            .iter()
            .zip(self.x.iter())
            .zip(beta_used.iter())
            .map(|((y, x), b)| y - b * x)
            .collect())
    }
}
