//! Kalman filters for dynamic hedge ratio estimation.
//!
//! Tracks the hedge ratio (beta) between two co-moving assets one
//! observation at a time, so the spread used for signal generation adapts
//! to a drifting relationship instead of relying on a single full-sample
//! OLS fit.
//!
//! # Mathematical Model
//!
//! **State equation** (random walk):
//! ```text
//! β[t] = β[t-1] + w,  where w ~ N(0, Q)
//! ```
//!
//! **Observation equation**:
//! ```text
//! y[t] = β[t] * x[t] + v,  where v ~ N(0, R)
//! ```
//!
//! Where:
//! - `y[t]` is the dependent asset price
//! - `x[t]` is the independent asset price
//! - `β[t]` is the hedge ratio being estimated
//! - `Q` is process noise (how fast beta drifts)
//! - `R` is observation noise (measurement uncertainty)
//!
//! Two variants are provided:
//! - [`KalmanHedgeFilter`]: scalar state, O(1) per update, usable both for
//!   streaming updates and for producing a full `(β[t], P[t])` path.
//! - [`estimate_with_intercept`]: two-state filter `(β, intercept)` with
//!   observation row `[x, 1]`, for pairs whose relationship carries a
//!   level offset.
//!
//! Both variants are causal (forward-only): the estimate at time t uses
//! observations through t and never beyond. Neither applies smoothing or
//! lag; feed the beta path through [`crate::math::smoothing::smooth`]
//! before constructing a tradable spread.
//!
//! # Usage
//!
//! ```rust
//! use pairlab::math::kalman::{KalmanConfig, KalmanHedgeFilter};
//!
//! let x = vec![100.0, 101.0, 102.0, 103.0];
//! let y = vec![80.0, 80.8, 81.6, 82.4];
//!
//! let path = KalmanHedgeFilter::estimate_path(&KalmanConfig::default(), &x, &y).unwrap();
//! assert_eq!(path.beta.len(), 4);
//! ```
//!
//! # References
//!
//! - Chan, E. (2013). "Algorithmic Trading: Winning Strategies and Their Rationale"

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PairsError;
use crate::math::{ensure_aligned, ensure_finite};

/// Filter hyperparameters and initial belief.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanConfig {
    /// Process noise covariance Q. Higher values let beta drift faster
    /// but increase noise sensitivity. Typical range: 1e-6 to 1e-4.
    #[serde(default = "default_process_noise")]
    pub process_noise: f64,
    /// Observation noise covariance R. Higher values produce smoother
    /// but slower estimates. Typical range: 1e-4 to 1e-2.
    #[serde(default = "default_observation_noise")]
    pub observation_noise: f64,
    /// Initial hedge ratio estimate β[0].
    #[serde(default)]
    pub initial_beta: f64,
    /// Initial estimation variance P[0]. Large values let the filter
    /// converge quickly away from a poor initial beta.
    #[serde(default = "default_initial_variance")]
    pub initial_variance: f64,
}

fn default_process_noise() -> f64 {
    1e-5
}
fn default_observation_noise() -> f64 {
    1e-3
}
fn default_initial_variance() -> f64 {
    1.0
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_noise: default_process_noise(),
            observation_noise: default_observation_noise(),
            initial_beta: 0.0,
            initial_variance: default_initial_variance(),
        }
    }
}

impl KalmanConfig {
    /// Build a config from a forgetting factor `delta`, the common
    /// parametrization for recursive least squares: `Q = delta / (1 - delta)`.
    pub fn from_delta(delta: f64, observation_noise: f64) -> Result<Self, PairsError> {
        if !delta.is_finite() || !(0.0..1.0).contains(&delta) {
            return Err(PairsError::Configuration(format!(
                "delta must be in [0, 1), got {delta}"
            )));
        }
        let config = Self {
            process_noise: delta / (1.0 - delta),
            observation_noise,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate hyperparameters.
    pub fn validate(&self) -> Result<(), PairsError> {
        if !self.process_noise.is_finite() || self.process_noise < 0.0 {
            return Err(PairsError::Configuration(format!(
                "process_noise must be non-negative, got {}",
                self.process_noise
            )));
        }
        if !self.observation_noise.is_finite() || self.observation_noise <= 0.0 {
            return Err(PairsError::Configuration(format!(
                "observation_noise must be positive, got {}",
                self.observation_noise
            )));
        }
        if !self.initial_variance.is_finite() || self.initial_variance < 0.0 {
            return Err(PairsError::Configuration(format!(
                "initial_variance must be non-negative, got {}",
                self.initial_variance
            )));
        }
        if !self.initial_beta.is_finite() {
            return Err(PairsError::Configuration(format!(
                "initial_beta must be finite, got {}",
                self.initial_beta
            )));
        }
        Ok(())
    }
}

/// Per-step output of the scalar filter.
///
/// The variance path is retained as a diagnostic: it shows how confident
/// the filter is at each step and is useful for gating trading on filter
/// convergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgePath {
    /// Posterior hedge ratio estimate β[t].
    pub beta: Vec<f64>,
    /// Posterior estimation variance P[t].
    pub variance: Vec<f64>,
}

impl HedgePath {
    /// Number of steps in the path.
    pub fn len(&self) -> usize {
        self.beta.len()
    }

    /// True when the path is empty.
    pub fn is_empty(&self) -> bool {
        self.beta.is_empty()
    }

    /// Final beta estimate, if any observations were processed.
    pub fn final_beta(&self) -> Option<f64> {
        self.beta.last().copied()
    }
}

/// Scalar Kalman filter for hedge ratio estimation.
///
/// Runs in O(1) time and space per update, with no historical data
/// storage, so it is equally suited to tick-by-tick streaming use and to
/// offline path estimation via [`KalmanHedgeFilter::estimate_path`].
#[derive(Debug, Clone)]
pub struct KalmanHedgeFilter {
    beta: f64,
    variance: f64,
    process_noise: f64,
    obs_noise: f64,
    update_count: u64,
}

impl KalmanHedgeFilter {
    /// Create a filter with validated hyperparameters.
    pub fn new(config: &KalmanConfig) -> Result<Self, PairsError> {
        config.validate()?;
        Ok(Self {
            beta: config.initial_beta,
            variance: config.initial_variance,
            process_noise: config.process_noise,
            obs_noise: config.observation_noise,
            update_count: 0,
        })
    }

    /// Advance the filter by one observation and return the updated beta.
    ///
    /// This is the core predict/update recursion:
    /// 1. Predict: `P_pred = P + Q` (beta prediction is the random walk).
    /// 2. Innovation covariance: `S = x² * P_pred + R`.
    /// 3. Gain: `K = P_pred * x / S`, with `K = 0` when `S == 0` (a zero
    ///    regressor must not crash the filter; the prediction stands).
    /// 4. Update: `β += K * (y - β * x)`; `P = (1 - K * x) * P_pred`.
    ///
    /// Non-finite observations are skipped: the state is left unchanged
    /// rather than letting NaN poison the covariance.
    pub fn step(&mut self, x: f64, y: f64) -> f64 {
        if !x.is_finite() || !y.is_finite() {
            return self.beta;
        }

        let p_pred = self.variance + self.process_noise;
        let denom = x * x * p_pred + self.obs_noise;
        let gain = if denom == 0.0 { 0.0 } else { p_pred * x / denom };

        self.beta += gain * (y - self.beta * x);
        self.variance = (1.0 - gain * x) * p_pred;
        self.update_count += 1;

        self.beta
    }

    /// Current hedge ratio estimate.
    #[inline]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Current estimation variance. Lower values indicate higher
    /// confidence in the estimate.
    #[inline]
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Number of observations processed.
    #[inline]
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// True once at least `min_updates` observations have been processed.
    pub fn is_warmed_up(&self, min_updates: u64) -> bool {
        self.update_count >= min_updates
    }

    /// Run the filter over a full series pair and retain the per-step state.
    ///
    /// `β[0]` and `P[0]` come straight from the configuration; steps
    /// t ≥ 1 follow the predict/update recursion. The output has the same
    /// length as the input.
    ///
    /// # Errors
    /// - [`PairsError::Dimension`] when `x` and `y` differ in length.
    /// - [`PairsError::InvalidInput`] when any price is non-finite.
    /// - [`PairsError::Configuration`] for invalid hyperparameters.
    pub fn estimate_path(
        config: &KalmanConfig,
        x: &[f64],
        y: &[f64],
    ) -> Result<HedgePath, PairsError> {
        ensure_aligned(x, y)?;
        ensure_finite("x", x)?;
        ensure_finite("y", y)?;
        let mut filter = Self::new(config)?;

        let n = x.len();
        if n == 0 {
            return Ok(HedgePath {
                beta: Vec::new(),
                variance: Vec::new(),
            });
        }

        let mut beta = Vec::with_capacity(n);
        let mut variance = Vec::with_capacity(n);
        beta.push(config.initial_beta);
        variance.push(config.initial_variance);

        for t in 1..n {
            beta.push(filter.step(x[t], y[t]));
            variance.push(filter.variance());
        }

        debug!(
            points = n,
            final_beta = beta[n - 1],
            final_variance = variance[n - 1],
            "hedge ratio path estimated"
        );

        Ok(HedgePath { beta, variance })
    }
}

/// Per-step output of the two-state filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterceptHedgePath {
    /// Posterior hedge ratio estimate β[t].
    pub beta: Vec<f64>,
    /// Posterior intercept estimate.
    pub intercept: Vec<f64>,
    /// Trace of the 2×2 state covariance at each step.
    pub covariance_trace: Vec<f64>,
}

/// Two-state Kalman filter tracking `(β, intercept)` jointly, with
/// observation model `y = β * x + intercept + v`.
///
/// This is the forward (filtering) recursion only: it is causal, so the
/// path may be used for trading after the usual smoothing and lag steps.
/// A forward-backward smoother would use future observations and is
/// deliberately not provided here.
///
/// The state covariance starts at `initial_variance * I` and both state
/// components share the scalar `process_noise` on the diagonal. The
/// intercept starts at zero; `initial_beta` seeds the first component.
pub fn estimate_with_intercept(
    config: &KalmanConfig,
    x: &[f64],
    y: &[f64],
) -> Result<InterceptHedgePath, PairsError> {
    config.validate()?;
    ensure_aligned(x, y)?;
    ensure_finite("x", x)?;
    ensure_finite("y", y)?;

    let n = x.len();
    let mut beta_path = Vec::with_capacity(n);
    let mut intercept_path = Vec::with_capacity(n);
    let mut trace_path = Vec::with_capacity(n);
    if n == 0 {
        return Ok(InterceptHedgePath {
            beta: beta_path,
            intercept: intercept_path,
            covariance_trace: trace_path,
        });
    }

    let q = config.process_noise;
    let r = config.observation_noise;
    let mut beta = config.initial_beta;
    let mut intercept = 0.0f64;
    // Symmetric 2x2 covariance stored as (p00, p01, p11).
    let (mut p00, mut p01, mut p11) = (config.initial_variance, 0.0f64, config.initial_variance);

    beta_path.push(beta);
    intercept_path.push(intercept);
    trace_path.push(p00 + p11);

    for t in 1..n {
        let (xt, yt) = (x[t], y[t]);

        // Predict: random-walk state, covariance grows by Q on the diagonal.
        let (a00, a01, a11) = (p00 + q, p01, p11 + q);

        // Innovation covariance for observation row H = [x, 1].
        let s = a00 * xt * xt + 2.0 * a01 * xt + a11 + r;
        let (k0, k1) = if s == 0.0 {
            (0.0, 0.0)
        } else {
            ((a00 * xt + a01) / s, (a01 * xt + a11) / s)
        };

        let innovation = yt - (beta * xt + intercept);
        beta += k0 * innovation;
        intercept += k1 * innovation;

        // P = (I - K H) P_pred, then symmetrize the off-diagonal.
        let n00 = (1.0 - k0 * xt) * a00 - k0 * a01;
        let n01 = (1.0 - k0 * xt) * a01 - k0 * a11;
        let n10 = -k1 * xt * a00 + (1.0 - k1) * a01;
        let n11 = -k1 * xt * a01 + (1.0 - k1) * a11;
        p00 = n00;
        p01 = 0.5 * (n01 + n10);
        p11 = n11;

        beta_path.push(beta);
        intercept_path.push(intercept);
        trace_path.push(p00 + p11);
    }

    debug!(
        points = n,
        final_beta = beta,
        final_intercept = intercept,
        "two-state hedge path estimated"
    );

    Ok(InterceptHedgePath {
        beta: beta_path,
        intercept: intercept_path,
        covariance_trace: trace_path,
    })
}
