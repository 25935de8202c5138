//! Backtesting engine for z-score driven pairs strategies.
//!
//! Converts a standardized spread into a three-state position signal and
//! computes path-dependent PnL with no lookahead: positions react to the
//! current z-score, but PnL is always earned on the holdings carried
//! into the bar, never on holdings established within it.
//!
//! The entry and exit thresholds form a hysteresis band: a position
//! entered beyond `entry` is only unwound once the z-score falls back
//! inside `exit`, which prevents thrash when the spread hovers at a
//! boundary. Transitions never jump directly between long and short;
//! the spread has to pass through flat first.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PairsError;
use crate::math::stats;
use crate::math::{ensure_aligned, ensure_finite};

/// Spread position held at a given step. Exactly one is active per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    /// No exposure.
    Flat,
    /// Long the spread: long Y, short beta units of X.
    LongSpread,
    /// Short the spread: short Y, long beta units of X.
    ShortSpread,
}

impl PositionState {
    /// Signed spread exposure: +1 long, -1 short, 0 flat.
    pub fn direction(self) -> i8 {
        match self {
            PositionState::Flat => 0,
            PositionState::LongSpread => 1,
            PositionState::ShortSpread => -1,
        }
    }
}

/// Backtest hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Z-score magnitude beyond which a position is opened.
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,
    /// Z-score level at which an open position is closed. Must be
    /// strictly below the entry threshold to keep the hysteresis band.
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f64,
    /// Capital base used to normalize raw PnL into returns.
    #[serde(default = "default_capital_per_trade")]
    pub capital_per_trade: f64,
    /// Periods per year for Sharpe/Sortino annualization.
    #[serde(default = "default_annualization_factor")]
    pub annualization_factor: f64,
    /// Tail probability for historical VaR/CVaR.
    #[serde(default = "default_var_alpha")]
    pub var_alpha: f64,
}

fn default_entry_threshold() -> f64 {
    2.0
}
fn default_exit_threshold() -> f64 {
    0.5
}
fn default_capital_per_trade() -> f64 {
    100_000.0
}
fn default_annualization_factor() -> f64 {
    252.0
}
fn default_var_alpha() -> f64 {
    0.01
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            entry_threshold: default_entry_threshold(),
            exit_threshold: default_exit_threshold(),
            capital_per_trade: default_capital_per_trade(),
            annualization_factor: default_annualization_factor(),
            var_alpha: default_var_alpha(),
        }
    }
}

impl BacktestConfig {
    /// Validate hyperparameters.
    ///
    /// `exit >= entry` is rejected outright: it would collapse or invert
    /// the hysteresis band and produce degenerate immediate round-trips.
    pub fn validate(&self) -> Result<(), PairsError> {
        if !self.entry_threshold.is_finite() || !self.exit_threshold.is_finite() {
            return Err(PairsError::Configuration(
                "thresholds must be finite".to_string(),
            ));
        }
        if self.exit_threshold < 0.0 {
            return Err(PairsError::Configuration(format!(
                "exit_threshold must be non-negative, got {}",
                self.exit_threshold
            )));
        }
        if self.exit_threshold >= self.entry_threshold {
            return Err(PairsError::Configuration(format!(
                "exit_threshold ({}) must be strictly below entry_threshold ({})",
                self.exit_threshold, self.entry_threshold
            )));
        }
        if !self.capital_per_trade.is_finite() || self.capital_per_trade <= 0.0 {
            return Err(PairsError::Configuration(format!(
                "capital_per_trade must be positive, got {}",
                self.capital_per_trade
            )));
        }
        if !self.annualization_factor.is_finite() || self.annualization_factor <= 0.0 {
            return Err(PairsError::Configuration(format!(
                "annualization_factor must be positive, got {}",
                self.annualization_factor
            )));
        }
        if !self.var_alpha.is_finite() || self.var_alpha <= 0.0 || self.var_alpha >= 1.0 {
            return Err(PairsError::Configuration(format!(
                "var_alpha must be in (0, 1), got {}",
                self.var_alpha
            )));
        }
        Ok(())
    }
}

/// Summary risk statistics over the backtest return series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    /// Annualized Sharpe ratio (NaN when volatility is zero).
    pub sharpe: f64,
    /// Annualized Sortino ratio (NaN when no downside was observed).
    pub sortino: f64,
    /// Historical value-at-risk at the configured tail probability.
    pub var: f64,
    /// Historical conditional value-at-risk.
    pub cvar: f64,
    /// Maximum peak-relative drawdown of the cumulative-return path.
    pub max_drawdown: f64,
    /// Completed round trips (entries that were closed out).
    pub round_trips: u32,
    /// Total raw PnL over the run.
    pub net_pnl: f64,
    /// Final compounded cumulative return (1.0 = flat).
    pub final_cum_return: f64,
}

/// Full backtest output: per-step ledger plus summary statistics.
///
/// All vectors share the input index. The ledger is built strictly
/// forward in time and is immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Position active at each step.
    pub positions: Vec<PositionState>,
    /// Holdings in the dependent leg: `direction[t]` units of Y, one unit
    /// of Y per unit of spread exposure.
    pub holdings_y: Vec<f64>,
    /// Holdings in the independent leg: `-beta_used[t] * direction[t]`
    /// units of X, hedging the Y leg.
    pub holdings_x: Vec<f64>,
    /// Per-step PnL from holdings carried into the step.
    pub pnl: Vec<f64>,
    /// Running sum of `pnl`.
    pub cum_pnl: Vec<f64>,
    /// PnL normalized by `capital_per_trade`.
    pub returns: Vec<f64>,
    /// Compounded `(1 + ret)` path, starting from 1.
    pub cum_returns: Vec<f64>,
    /// Summary statistics over `returns` and `cum_returns`.
    pub summary: BacktestSummary,
}

/// Advance the position state machine by one observation.
///
/// Evaluated current-state-first; entering and exiting in the same
/// direction share no path, so long and short can only be reached from
/// flat.
fn transition(state: PositionState, z: f64, entry: f64, exit: f64) -> PositionState {
    match state {
        PositionState::Flat if z > entry => PositionState::ShortSpread,
        PositionState::Flat if z < -entry => PositionState::LongSpread,
        PositionState::Flat => PositionState::Flat,
        PositionState::LongSpread if z > -exit => PositionState::Flat,
        PositionState::LongSpread => PositionState::LongSpread,
        PositionState::ShortSpread if z < exit => PositionState::Flat,
        PositionState::ShortSpread => PositionState::ShortSpread,
    }
}

/// Run the backtest over a z-scored spread.
///
/// `beta_used` must be the lagged hedge path (see
/// [`crate::math::smoothing::smooth`]); feeding an unlagged estimate
/// reintroduces lookahead bias into the holdings.
///
/// PnL at step t uses the holdings from step t-1 against the price
/// changes at t, and `pnl[0] = 0` (there are no prior holdings to earn
/// on). Empty input produces an empty, valid report.
///
/// # Errors
/// - [`PairsError::Configuration`] for an invalid configuration.
/// - [`PairsError::Dimension`] when series lengths differ.
/// - [`PairsError::InvalidInput`] for non-finite values in any series.
pub fn run(
    config: &BacktestConfig,
    zscores: &[f64],
    x: &[f64],
    y: &[f64],
    beta_used: &[f64],
) -> Result<BacktestReport, PairsError> {
    config.validate()?;
    ensure_aligned(zscores, x)?;
    ensure_aligned(x, y)?;
    ensure_aligned(zscores, beta_used)?;
    ensure_finite("zscore", zscores)?;
    ensure_finite("x", x)?;
    ensure_finite("y", y)?;
    ensure_finite("beta_used", beta_used)?;

    let n = zscores.len();

    let mut positions = Vec::with_capacity(n);
    let mut round_trips = 0u32;
    let mut state = PositionState::Flat;
    for &z in zscores {
        let next = transition(
            state,
            z,
            config.entry_threshold,
            config.exit_threshold,
        );
        if next == PositionState::Flat && state != PositionState::Flat {
            round_trips += 1;
        }
        state = next;
        positions.push(state);
    }

    let mut holdings_y = Vec::with_capacity(n);
    let mut holdings_x = Vec::with_capacity(n);
    for (pos, beta) in positions.iter().zip(beta_used.iter()) {
        let direction = pos.direction() as f64;
        holdings_y.push(direction);
        holdings_x.push(-beta * direction);
    }

    let mut pnl = Vec::with_capacity(n);
    let mut cum_pnl = Vec::with_capacity(n);
    let mut returns = Vec::with_capacity(n);
    let mut cum_returns = Vec::with_capacity(n);
    let mut running_pnl = 0.0;
    let mut compounded = 1.0;
    for t in 0..n {
        let step_pnl = if t == 0 {
            0.0
        } else {
            holdings_y[t - 1] * (y[t] - y[t - 1]) + holdings_x[t - 1] * (x[t] - x[t - 1])
        };
        running_pnl += step_pnl;
        let ret = step_pnl / config.capital_per_trade;
        compounded *= 1.0 + ret;

        pnl.push(step_pnl);
        cum_pnl.push(running_pnl);
        returns.push(ret);
        cum_returns.push(compounded);
    }

    let (var, cvar) = stats::var_cvar(&returns, config.var_alpha);
    let summary = BacktestSummary {
        sharpe: stats::sharpe(&returns, config.annualization_factor),
        sortino: stats::sortino(&returns, config.annualization_factor, 0.0),
        var,
        cvar,
        max_drawdown: stats::max_drawdown(&cum_returns),
        round_trips,
        net_pnl: running_pnl,
        final_cum_return: cum_returns.last().copied().unwrap_or(1.0),
    };

    debug!(
        steps = n,
        round_trips,
        net_pnl = summary.net_pnl,
        "backtest ledger built"
    );
    info!(
        sharpe = summary.sharpe,
        max_drawdown = summary.max_drawdown,
        final_cum_return = summary.final_cum_return,
        "backtest complete"
    );

    Ok(BacktestReport {
        positions,
        holdings_y,
        holdings_x,
        pnl,
        cum_pnl,
        returns,
        cum_returns,
        summary,
    })
}
