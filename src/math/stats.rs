//! Performance statistics over return series.
//!
//! Pure, stateless functions: same input, same output, no side effects.
//! Degenerate inputs (zero volatility, empty series) yield NaN sentinels
//! rather than panics or divisions by zero.

use crate::error::PairsError;
use crate::math::ensure_finite;

/// Annualized Sharpe ratio, `mean * f / (std * sqrt(f))` with sample
/// standard deviation (ddof = 1).
///
/// NaN when fewer than two returns are given or volatility is zero.
pub fn sharpe(returns: &[f64], annual_factor: f64) -> f64 {
    if returns.len() < 2 {
        return f64::NAN;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let vol = variance.sqrt() * annual_factor.sqrt();
    if vol > 0.0 {
        mean * annual_factor / vol
    } else {
        f64::NAN
    }
}

/// Annualized Sortino ratio: excess return over downside deviation, where
/// only returns below `target` contribute to the denominator.
///
/// NaN when no return falls below the target (no downside observed).
pub fn sortino(returns: &[f64], annual_factor: f64, target: f64) -> f64 {
    if returns.is_empty() {
        return f64::NAN;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;

    let below: Vec<f64> = returns.iter().copied().filter(|r| *r < target).collect();
    if below.is_empty() {
        return f64::NAN;
    }
    let downside = (below.iter().map(|r| r * r).sum::<f64>() / below.len() as f64).sqrt()
        * annual_factor.sqrt();
    let excess = mean * annual_factor - target;
    if downside > 0.0 {
        excess / downside
    } else {
        f64::NAN
    }
}

/// Historical value-at-risk and conditional value-at-risk at tail
/// probability `alpha`, both reported as positive loss magnitudes.
///
/// Non-finite returns are ignored; an empty (or all-non-finite) input
/// yields `(NaN, NaN)`.
pub fn var_cvar(returns: &[f64], alpha: f64) -> (f64, f64) {
    let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    if sorted.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let idx = ((alpha * sorted.len() as f64).floor() as usize)
        .max(1)
        .min(sorted.len());
    let var = -sorted[idx - 1];
    let cvar = -(sorted[..idx].iter().sum::<f64>() / idx as f64);
    (var, cvar)
}

/// Maximum peak-relative drawdown of a cumulative-return path,
/// `max((peak - value) / peak)` over the running peak.
///
/// Zero for monotonically increasing paths and for empty input.
pub fn max_drawdown(cum_returns: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0;
    for &value in cum_returns {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

/// Rolling z-score of a series against its own rolling mean and sample
/// standard deviation over `window` observations.
///
/// The first `window - 1` entries are NaN (not enough history), as are
/// entries where the rolling standard deviation is zero; callers trim
/// the warm-up before feeding the result to the backtester.
///
/// # Errors
/// - [`PairsError::Configuration`] when `window < 2`.
/// - [`PairsError::InvalidInput`] for non-finite input values.
pub fn rolling_zscore(series: &[f64], window: usize) -> Result<Vec<f64>, PairsError> {
    if window < 2 {
        return Err(PairsError::Configuration(format!(
            "z-score window must be at least 2, got {window}"
        )));
    }
    ensure_finite("spread", series)?;

    let n = series.len();
    let mut out = vec![f64::NAN; n];
    for t in (window - 1)..n {
        let win = &series[t + 1 - window..=t];
        let m = window as f64;
        let mean = win.iter().sum::<f64>() / m;
        let variance = win.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (m - 1.0);
        let std_dev = variance.sqrt();
        if std_dev > 0.0 {
            out[t] = (series[t] - mean) / std_dev;
        }
    }
    Ok(out)
}
