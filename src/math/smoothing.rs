//! Signal smoothing and lag enforcement.
//!
//! Raw filter output is too noisy to trade directly: high-frequency
//! wiggle in the hedge ratio translates into spurious spread moves and
//! overtrading. This module applies a fixed pipeline in a fixed order:
//! optional smoothing, optional clipping to an economically sane band,
//! and a mandatory lag.
//!
//! The lag is the lookahead guard: after [`smooth`] the value at index t
//! was computed from input data through `t - lag_steps` only, so a
//! decision taken at t never references information unavailable at
//! decision time.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PairsError;
use crate::math::ensure_finite;

/// Smoothing algorithm applied when the series is long enough for the
/// configured window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmoothingMethod {
    /// Rolling mean over the window, with an expanding warm-up so the
    /// head of the series is averaged over whatever is available.
    MovingAverage,
    /// Local quadratic least-squares regression over a centered window
    /// (Savitzky-Golay style), which preserves slope through turning
    /// points better than a plain mean.
    LocalPolynomial,
}

/// Configuration for the smoothing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmootherConfig {
    /// Window length for smoothing; `None` disables the smoothing step.
    #[serde(default)]
    pub smoothing_window: Option<usize>,
    /// Algorithm used when smoothing is enabled.
    #[serde(default = "default_method")]
    pub smoothing_method: SmoothingMethod,
    /// Optional `(low, high)` clamp for the smoothed values.
    #[serde(default)]
    pub clip_bounds: Option<(f64, f64)>,
    /// Number of steps the output is lagged by. Must be at least 1.
    #[serde(default = "default_lag_steps")]
    pub lag_steps: usize,
    /// Exponential smoothing constant used when the series is shorter
    /// than the configured window.
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
}

fn default_method() -> SmoothingMethod {
    SmoothingMethod::MovingAverage
}
fn default_lag_steps() -> usize {
    1
}
fn default_ewma_alpha() -> f64 {
    0.1
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            smoothing_window: None,
            smoothing_method: default_method(),
            clip_bounds: None,
            lag_steps: default_lag_steps(),
            ewma_alpha: default_ewma_alpha(),
        }
    }
}

impl SmootherConfig {
    /// Validate hyperparameters.
    pub fn validate(&self) -> Result<(), PairsError> {
        if self.lag_steps == 0 {
            return Err(PairsError::Configuration(
                "lag_steps must be at least 1; an unlagged signal reintroduces lookahead bias"
                    .to_string(),
            ));
        }
        if let Some(window) = self.smoothing_window {
            let min = match self.smoothing_method {
                SmoothingMethod::MovingAverage => 2,
                SmoothingMethod::LocalPolynomial => 3,
            };
            if window < min {
                return Err(PairsError::Configuration(format!(
                    "smoothing_window must be at least {min} for {:?}, got {window}",
                    self.smoothing_method
                )));
            }
        }
        if let Some((low, high)) = self.clip_bounds {
            if !low.is_finite() || !high.is_finite() || low >= high {
                return Err(PairsError::Configuration(format!(
                    "clip_bounds must satisfy low < high, got ({low}, {high})"
                )));
            }
        }
        if !self.ewma_alpha.is_finite() || self.ewma_alpha <= 0.0 || self.ewma_alpha > 1.0 {
            return Err(PairsError::Configuration(format!(
                "ewma_alpha must be in (0, 1], got {}",
                self.ewma_alpha
            )));
        }
        Ok(())
    }
}

/// Smoothing strategy resolved once per call from config and series length.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SmoothingPlan {
    Passthrough,
    MovingAverage(usize),
    LocalPolynomial(usize),
    Ewma(f64),
}

impl SmoothingPlan {
    fn resolve(config: &SmootherConfig, len: usize) -> Self {
        match config.smoothing_window {
            None => SmoothingPlan::Passthrough,
            Some(window) if len < window => {
                warn!(
                    len,
                    window,
                    alpha = config.ewma_alpha,
                    "series shorter than smoothing window, falling back to exponential smoothing"
                );
                SmoothingPlan::Ewma(config.ewma_alpha)
            }
            Some(window) => match config.smoothing_method {
                SmoothingMethod::MovingAverage => SmoothingPlan::MovingAverage(window),
                SmoothingMethod::LocalPolynomial => SmoothingPlan::LocalPolynomial(window),
            },
        }
    }
}

/// Transform a raw estimate path into a tradable, lookahead-free signal.
///
/// The pipeline runs smoothing, then clipping, then the lag. Head values
/// created by the lag are backfilled with the earliest available
/// estimate, so the output has the same index as the input with no gaps
/// and no NaN anywhere.
///
/// # Errors
/// - [`PairsError::Configuration`] for invalid hyperparameters.
/// - [`PairsError::InvalidInput`] when the input contains non-finite values.
pub fn smooth(config: &SmootherConfig, series: &[f64]) -> Result<Vec<f64>, PairsError> {
    config.validate()?;
    ensure_finite("signal", series)?;
    if series.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = match SmoothingPlan::resolve(config, series.len()) {
        SmoothingPlan::Passthrough => series.to_vec(),
        SmoothingPlan::MovingAverage(window) => moving_average(series, window),
        SmoothingPlan::LocalPolynomial(window) => local_polynomial(series, window),
        SmoothingPlan::Ewma(alpha) => ewma(series, alpha),
    };

    if let Some((low, high)) = config.clip_bounds {
        for v in out.iter_mut() {
            *v = v.clamp(low, high);
        }
    }

    Ok(lag_with_backfill(&out, config.lag_steps))
}

/// Rolling mean with expanding warm-up (the first `window - 1` values
/// average over the prefix instead of being dropped).
fn moving_average(series: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(series.len());
    let mut running = 0.0;
    for (t, &v) in series.iter().enumerate() {
        running += v;
        if t >= window {
            running -= series[t - window];
        }
        let count = (t + 1).min(window);
        out.push(running / count as f64);
    }
    out
}

/// Exponential smoothing, `out[t] = alpha * x[t] + (1 - alpha) * out[t-1]`.
fn ewma(series: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(series.len());
    let mut level = series[0];
    out.push(level);
    for &v in &series[1..] {
        level = alpha * v + (1.0 - alpha) * level;
        out.push(level);
    }
    out
}

/// Local quadratic regression over a centered window; the window is
/// truncated at the series edges.
fn local_polynomial(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    let half = window / 2;
    let mut out = Vec::with_capacity(n);
    for t in 0..n {
        let lo = t.saturating_sub(half);
        let hi = (t + half + 1).min(n);
        out.push(fit_quadratic_at(&series[lo..hi], t - lo));
    }
    out
}

/// Least-squares quadratic over the window, evaluated at offset `at`.
fn fit_quadratic_at(window: &[f64], at: usize) -> f64 {
    let m = window.len();
    if m < 3 {
        return window.iter().sum::<f64>() / m as f64;
    }

    // Normal equations for c0 + c1*u + c2*u² over u = 0..m.
    let mut s = [0.0f64; 5];
    let mut b = [0.0f64; 3];
    for (u, &y) in window.iter().enumerate() {
        let u = u as f64;
        let u2 = u * u;
        s[0] += 1.0;
        s[1] += u;
        s[2] += u2;
        s[3] += u2 * u;
        s[4] += u2 * u2;
        b[0] += y;
        b[1] += u * y;
        b[2] += u2 * y;
    }
    let a = [[s[0], s[1], s[2]], [s[1], s[2], s[3]], [s[2], s[3], s[4]]];

    let det = det3(&a);
    if det.abs() < 1e-9 {
        return window.iter().sum::<f64>() / m as f64;
    }
    let c0 = det3(&with_column(&a, 0, &b)) / det;
    let c1 = det3(&with_column(&a, 1, &b)) / det;
    let c2 = det3(&with_column(&a, 2, &b)) / det;

    let u = at as f64;
    c0 + c1 * u + c2 * u * u
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn with_column(m: &[[f64; 3]; 3], col: usize, b: &[f64; 3]) -> [[f64; 3]; 3] {
    let mut out = *m;
    for row in 0..3 {
        out[row][col] = b[row];
    }
    out
}

/// Shift the series forward by `k` steps; the head is backfilled with the
/// earliest available estimate so the output has no gaps.
fn lag_with_backfill(series: &[f64], k: usize) -> Vec<f64> {
    let first = series[0];
    (0..series.len())
        .map(|t| if t < k { first } else { series[t - k] })
        .collect()
}
