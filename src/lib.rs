//! # pairlab
//!
//! Offline research library for statistical-arbitrage pairs trading.
//!
//! The pipeline runs in four stages:
//!
//! 1. **Hedge estimation** ([`math::kalman`]): a recursive Bayesian filter
//!    tracks the dynamic hedge ratio between two co-moving price series.
//! 2. **Smoothing and lag** ([`math::smoothing`]): the raw beta path is
//!    smoothed, optionally clipped to an economic prior, and lagged so no
//!    decision uses information unavailable at decision time.
//! 3. **Mean-reversion diagnostics** ([`math::ou`]): Ornstein-Uhlenbeck
//!    parameters are fitted to the spread twice (via an AR(1) regression
//!    and via exact-transition maximum likelihood) and compared.
//! 4. **Backtest** ([`backtest`]): the z-scored spread drives a
//!    three-state position machine with strictly causal PnL accounting
//!    and summary risk statistics ([`math::stats`]).
//!
//! Everything is synchronous, single-threaded, and deterministic:
//! identical inputs and configuration produce bit-for-bit identical
//! output. The library owns no I/O; data loading, cointegration
//! testing, and result persistence are caller concerns.

pub mod backtest;
pub mod error;
pub mod math;
pub mod types;

pub use error::PairsError;
pub use types::PricePair;
