//! Ornstein-Uhlenbeck parameter estimation for spread series.
//!
//! The OU process `dS = kappa * (mu - S) dt + sigma dW` is the standard
//! model for a mean-reverting spread. Two independent estimators are
//! provided and are meant to be run side by side, since agreement
//! between them is itself a diagnostic:
//!
//! - [`fit_discrete`]: an AR(1) regression `s[t] = a + phi * s[t-1] + eps`
//!   mapped to continuous-time parameters. Cheap, closed-form, and
//!   well-behaved whenever the spread is genuinely mean-reverting.
//! - [`fit_mle`]: maximum likelihood under the exact OU transition
//!   density, maximized with a bounded derivative-free search. Slower but
//!   uses the full distributional assumption.
//!
//! The AR(1) mapping is undefined when `phi` falls outside `(0, 1)`; the
//! fit then reports a NaN parameter triple rather than a misleading
//! finite value. That is a policy, not a failure: the regression itself
//! succeeded in showing the mapping does not apply.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PairsError;
use crate::math::ensure_finite;

/// Below this reversion rate (per bar) a fit is flagged as not usefully
/// mean-reverting: the implied half-life exceeds ~7000 bars and the
/// spread is indistinguishable from a random walk at realistic sample
/// sizes.
pub const KAPPA_FLOOR: f64 = 1e-4;

/// Half-life of mean reversion, `ln 2 / kappa`.
///
/// NaN when `kappa` is non-positive or non-finite; there is no meaningful
/// decay time for a non-reverting process.
pub fn half_life(kappa: f64) -> f64 {
    if kappa.is_finite() && kappa > 0.0 {
        std::f64::consts::LN_2 / kappa
    } else {
        f64::NAN
    }
}

/// Result of the discrete-time AR(1) fit.
///
/// The regression diagnostics (`phi`, `intercept`, `residual_std`) are
/// always populated; the continuous-time triple is NaN when the mapping
/// is undefined (`phi` outside `(0, 1)`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscreteOuFit {
    /// Mean-reversion rate per unit time.
    pub kappa: f64,
    /// Long-run mean of the spread.
    pub mu: f64,
    /// Diffusion volatility.
    pub sigma: f64,
    /// Implied half-life, `ln 2 / kappa`.
    pub half_life: f64,
    /// AR(1) coefficient from the OLS regression.
    pub phi: f64,
    /// OLS intercept.
    pub intercept: f64,
    /// Sample standard deviation of the regression residuals.
    pub residual_std: f64,
    /// False when the mapping was undefined or the implied reversion is
    /// below [`KAPPA_FLOOR`] (near-unit-root spread).
    pub mean_reverting: bool,
}

/// Fit `s[t] = a + phi * s[t-1] + eps` by OLS and map to OU parameters.
///
/// The mapping holds only for `0 < phi < 1`:
/// `kappa = -ln(phi) / dt`, `mu = a / (1 - phi)`,
/// `sigma = sigma_eps * sqrt(-2 ln(phi) / (dt (1 - phi²)))`.
/// Outside that range the triple is reported as NaN with
/// `mean_reverting = false`.
///
/// # Errors
/// - [`PairsError::Configuration`] when `dt` is not positive.
/// - [`PairsError::InvalidInput`] for non-finite spread values.
/// - [`PairsError::InsufficientData`] for fewer than 3 observations.
pub fn fit_discrete(spread: &[f64], dt: f64) -> Result<DiscreteOuFit, PairsError> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(PairsError::Configuration(format!(
            "dt must be positive, got {dt}"
        )));
    }
    ensure_finite("spread", spread)?;
    if spread.len() < 3 {
        return Err(PairsError::InsufficientData {
            expected: 3,
            actual: spread.len(),
        });
    }

    // OLS of s[t] on s[t-1] with intercept.
    let lagged = &spread[..spread.len() - 1];
    let current = &spread[1..];
    let m = lagged.len() as f64;
    let mean_lag = lagged.iter().sum::<f64>() / m;
    let mean_cur = current.iter().sum::<f64>() / m;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (l, c) in lagged.iter().zip(current.iter()) {
        let dl = l - mean_lag;
        sxx += dl * dl;
        sxy += dl * (c - mean_cur);
    }

    // A constant spread leaves the slope undefined; encode as NaN rather
    // than erroring, consistent with the out-of-range phi policy.
    let phi = if sxx == 0.0 { f64::NAN } else { sxy / sxx };
    let intercept = mean_cur - phi * mean_lag;

    let mut sse = 0.0;
    for (l, c) in lagged.iter().zip(current.iter()) {
        let resid = c - intercept - phi * l;
        sse += resid * resid;
    }
    // With an intercept the residuals have zero mean, so this is the
    // sample standard deviation (ddof = 1).
    let residual_std = if m > 1.0 { (sse / (m - 1.0)).sqrt() } else { 0.0 };

    let (kappa, mu, sigma, mean_reverting) = if phi > 0.0 && phi < 1.0 {
        let kappa = -phi.ln() / dt;
        let mu = intercept / (1.0 - phi);
        let sigma = residual_std * (-2.0 * phi.ln() / (dt * (1.0 - phi * phi))).sqrt();
        let mean_reverting = kappa >= KAPPA_FLOOR;
        if !mean_reverting {
            warn!(
                phi,
                kappa, "spread is near-unit-root; half-life estimate is not meaningful"
            );
        }
        (kappa, mu, sigma, mean_reverting)
    } else {
        debug!(phi, "AR(1) coefficient outside (0, 1), OU mapping undefined");
        (f64::NAN, f64::NAN, f64::NAN, false)
    };

    Ok(DiscreteOuFit {
        kappa,
        mu,
        sigma,
        half_life: half_life(kappa),
        phi,
        intercept,
        residual_std,
        mean_reverting,
    })
}

/// Configuration for the maximum-likelihood fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OuMleConfig {
    /// Starting point `(kappa, mu, sigma)` for the search.
    #[serde(default = "default_initial_guess")]
    pub initial_guess: (f64, f64, f64),
    /// Upper bound on the reversion rate.
    #[serde(default = "default_kappa_bound")]
    pub kappa_bound: f64,
    /// Upper bound on the diffusion volatility.
    #[serde(default = "default_sigma_bound")]
    pub sigma_bound: f64,
    /// The long-run mean is searched within `[-mu_bound, mu_bound]`.
    #[serde(default = "default_mu_bound")]
    pub mu_bound: f64,
    /// Time step between observations.
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Iteration cap for the optimizer, bounding worst-case latency on
    /// malformed input.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_initial_guess() -> (f64, f64, f64) {
    (0.5, 0.0, 0.1)
}
fn default_kappa_bound() -> f64 {
    10.0
}
fn default_sigma_bound() -> f64 {
    5.0
}
fn default_mu_bound() -> f64 {
    10.0
}
fn default_dt() -> f64 {
    1.0
}
fn default_max_iterations() -> usize {
    1000
}

impl Default for OuMleConfig {
    fn default() -> Self {
        Self {
            initial_guess: default_initial_guess(),
            kappa_bound: default_kappa_bound(),
            sigma_bound: default_sigma_bound(),
            mu_bound: default_mu_bound(),
            dt: default_dt(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl OuMleConfig {
    /// Validate hyperparameters.
    pub fn validate(&self) -> Result<(), PairsError> {
        for (name, value) in [
            ("kappa_bound", self.kappa_bound),
            ("sigma_bound", self.sigma_bound),
            ("mu_bound", self.mu_bound),
            ("dt", self.dt),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PairsError::Configuration(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        let (k0, m0, s0) = self.initial_guess;
        if !k0.is_finite() || !m0.is_finite() || !s0.is_finite() {
            return Err(PairsError::Configuration(format!(
                "initial_guess must be finite, got ({k0}, {m0}, {s0})"
            )));
        }
        if self.max_iterations == 0 {
            return Err(PairsError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of the maximum-likelihood fit.
///
/// Non-convergence is data, not an error: the caller gets the best
/// parameters found together with the `converged` flag, and may re-seed
/// and retry at its own discretion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MleOuFit {
    /// Mean-reversion rate per unit time.
    pub kappa: f64,
    /// Long-run mean of the spread.
    pub mu: f64,
    /// Diffusion volatility.
    pub sigma: f64,
    /// Implied half-life, `ln 2 / kappa`.
    pub half_life: f64,
    /// Whether the optimizer reached its tolerance within the iteration cap.
    pub converged: bool,
    /// Final negative log-likelihood at the reported parameters.
    pub neg_log_likelihood: f64,
}

/// Negative log-likelihood under the exact OU transition density:
/// conditional on `s[t-1]`, `s[t]` is Normal with mean
/// `mu + (s[t-1] - mu) * exp(-kappa dt)` and variance
/// `sigma² / (2 kappa) * (1 - exp(-2 kappa dt))`.
fn neg_log_likelihood(params: &[f64; 3], spread: &[f64], dt: f64) -> f64 {
    let [kappa, mu, sigma] = *params;
    let variance = sigma * sigma / (2.0 * kappa) * (1.0 - (-2.0 * kappa * dt).exp());
    if !variance.is_finite() || variance <= 0.0 {
        return f64::INFINITY;
    }
    let decay = (-kappa * dt).exp();
    let log_norm = (2.0 * std::f64::consts::PI * variance).ln();

    let mut nll = 0.0;
    for w in spread.windows(2) {
        let mean = mu + (w[0] - mu) * decay;
        let diff = w[1] - mean;
        nll += 0.5 * (log_norm + diff * diff / variance);
    }
    if nll.is_finite() {
        nll
    } else {
        f64::INFINITY
    }
}

/// Fit OU parameters by maximizing the exact transition likelihood over
/// the box `kappa ∈ (0, kappa_bound]`, `mu ∈ [-mu_bound, mu_bound]`,
/// `sigma ∈ (0, sigma_bound]`, seeded from `config.initial_guess`.
///
/// # Errors
/// - [`PairsError::Configuration`] for invalid bounds or guess.
/// - [`PairsError::InvalidInput`] for non-finite spread values.
/// - [`PairsError::InsufficientData`] for fewer than 3 observations.
pub fn fit_mle(spread: &[f64], config: &OuMleConfig) -> Result<MleOuFit, PairsError> {
    config.validate()?;
    ensure_finite("spread", spread)?;
    if spread.len() < 3 {
        return Err(PairsError::InsufficientData {
            expected: 3,
            actual: spread.len(),
        });
    }

    // Open lower bounds are realized as small positive floors so the
    // variance term in the likelihood stays defined. The floors never
    // exceed the configured upper bounds.
    let lower = [
        1e-6f64.min(config.kappa_bound),
        -config.mu_bound,
        1e-6f64.min(config.sigma_bound),
    ];
    let upper = [config.kappa_bound, config.mu_bound, config.sigma_bound];
    let x0 = [
        config.initial_guess.0,
        config.initial_guess.1,
        config.initial_guess.2,
    ];

    let dt = config.dt;
    let (best, value, converged) = minimize_bounded(
        |p| neg_log_likelihood(p, spread, dt),
        x0,
        lower,
        upper,
        config.max_iterations,
    );

    if !converged {
        warn!(
            iterations = config.max_iterations,
            nll = value,
            "OU MLE did not converge within the iteration cap"
        );
    }

    Ok(MleOuFit {
        kappa: best[0],
        mu: best[1],
        sigma: best[2],
        half_life: half_life(best[0]),
        converged,
        neg_log_likelihood: value,
    })
}

/// Combined report from both estimators over the same spread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OuReport {
    /// AR(1) regression fit.
    pub discrete: DiscreteOuFit,
    /// Maximum-likelihood fit.
    pub mle: MleOuFit,
    /// Relative disagreement between the two kappa estimates,
    /// `|k_d - k_m| / max(k_d, k_m)`; NaN when either estimate is
    /// unusable. Large values flag a spread that violates the OU
    /// assumptions.
    pub kappa_divergence: f64,
}

/// Run both estimators and record their agreement.
pub fn fit_both(spread: &[f64], config: &OuMleConfig) -> Result<OuReport, PairsError> {
    let discrete = fit_discrete(spread, config.dt)?;
    let mle = fit_mle(spread, config)?;

    let kappa_divergence =
        if discrete.kappa.is_finite() && mle.kappa.is_finite() && mle.kappa > 0.0 {
            (discrete.kappa - mle.kappa).abs() / discrete.kappa.max(mle.kappa)
        } else {
            f64::NAN
        };

    info!(
        discrete_kappa = discrete.kappa,
        mle_kappa = mle.kappa,
        kappa_divergence,
        mle_converged = mle.converged,
        "OU fit complete"
    );

    Ok(OuReport {
        discrete,
        mle,
        kappa_divergence,
    })
}

const NM_EXPAND: f64 = 2.0;
const NM_CONTRACT: f64 = 0.5;
const NM_SHRINK: f64 = 0.5;
const NM_TOLERANCE: f64 = 1e-9;

fn clamp_into(mut p: [f64; 3], lower: &[f64; 3], upper: &[f64; 3]) -> [f64; 3] {
    for i in 0..3 {
        p[i] = p[i].clamp(lower[i], upper[i]);
    }
    p
}

fn by_value(a: &([f64; 3], f64), b: &([f64; 3], f64)) -> std::cmp::Ordering {
    a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
}

/// Bounded derivative-free minimization of a three-parameter objective.
///
/// Nelder-Mead simplex with every candidate point clamped into the box.
/// Any bounded local minimizer would satisfy the fitting contract; the
/// solver is private so no external API surface leaks into the fitters.
/// Returns `(argmin, min value, converged)`.
fn minimize_bounded<F>(
    objective: F,
    x0: [f64; 3],
    lower: [f64; 3],
    upper: [f64; 3],
    max_iterations: usize,
) -> ([f64; 3], f64, bool)
where
    F: Fn(&[f64; 3]) -> f64,
{
    let start = clamp_into(x0, &lower, &upper);
    let mut simplex: Vec<([f64; 3], f64)> = Vec::with_capacity(4);
    simplex.push((start, objective(&start)));
    for i in 0..3 {
        let mut p = start;
        let step = (0.05 * (upper[i] - lower[i])).max(1e-4);
        p[i] = if p[i] + step <= upper[i] {
            p[i] + step
        } else {
            p[i] - step
        };
        let p = clamp_into(p, &lower, &upper);
        simplex.push((p, objective(&p)));
    }

    let mut converged = false;
    for _ in 0..max_iterations {
        simplex.sort_by(by_value);
        let best = simplex[0].1;
        let worst = simplex[3].1;
        if (worst - best).abs() <= NM_TOLERANCE * (1.0 + best.abs()) {
            converged = true;
            break;
        }

        let mut centroid = [0.0; 3];
        for vertex in &simplex[..3] {
            for i in 0..3 {
                centroid[i] += vertex.0[i] / 3.0;
            }
        }
        let worst_point = simplex[3].0;

        let mut reflected = [0.0; 3];
        for i in 0..3 {
            reflected[i] = 2.0 * centroid[i] - worst_point[i];
        }
        let reflected = clamp_into(reflected, &lower, &upper);
        let f_reflected = objective(&reflected);

        if f_reflected < simplex[0].1 {
            let mut expanded = [0.0; 3];
            for i in 0..3 {
                expanded[i] = centroid[i] + NM_EXPAND * (reflected[i] - centroid[i]);
            }
            let expanded = clamp_into(expanded, &lower, &upper);
            let f_expanded = objective(&expanded);
            simplex[3] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
        } else if f_reflected < simplex[2].1 {
            simplex[3] = (reflected, f_reflected);
        } else {
            let (anchor, f_anchor) = if f_reflected < simplex[3].1 {
                (reflected, f_reflected)
            } else {
                (worst_point, simplex[3].1)
            };
            let mut contracted = [0.0; 3];
            for i in 0..3 {
                contracted[i] = centroid[i] + NM_CONTRACT * (anchor[i] - centroid[i]);
            }
            let contracted = clamp_into(contracted, &lower, &upper);
            let f_contracted = objective(&contracted);
            if f_contracted < f_anchor {
                simplex[3] = (contracted, f_contracted);
            } else {
                let best_point = simplex[0].0;
                for vertex in simplex.iter_mut().skip(1) {
                    let mut p = [0.0; 3];
                    for i in 0..3 {
                        p[i] = best_point[i] + NM_SHRINK * (vertex.0[i] - best_point[i]);
                    }
                    let p = clamp_into(p, &lower, &upper);
                    *vertex = (p, objective(&p));
                }
            }
        }
    }

    simplex.sort_by(by_value);
    (simplex[0].0, simplex[0].1, converged)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exact OU transition simulation with a deterministic generator.
    fn simulate_ou(kappa: f64, mu: f64, sigma: f64, dt: f64, n: usize, seed: u64) -> Vec<f64> {
        let decay = (-kappa * dt).exp();
        let step_std = (sigma * sigma / (2.0 * kappa) * (1.0 - (-2.0 * kappa * dt).exp())).sqrt();

        let mut state = seed;
        let mut uniform = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (((state >> 11) as f64) / ((1u64 << 53) as f64)).max(1e-12)
        };

        let mut spread = Vec::with_capacity(n);
        let mut s = mu;
        spread.push(s);
        for _ in 1..n {
            // Box-Muller from two uniforms
            let u1 = uniform();
            let u2 = uniform();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            s = mu + (s - mu) * decay + step_std * z;
            spread.push(s);
        }
        spread
    }

    #[test]
    fn test_discrete_recovers_known_parameters() {
        let (kappa, mu, sigma) = (0.5, 1.0, 0.2);
        let spread = simulate_ou(kappa, mu, sigma, 1.0, 5000, 42);

        let fit = fit_discrete(&spread, 1.0).unwrap();
        assert!(fit.mean_reverting);
        assert!(
            (fit.kappa - kappa).abs() / kappa < 0.15,
            "kappa relative error too large: estimated {}, true {}",
            fit.kappa,
            kappa
        );
        assert!((fit.mu - mu).abs() < 0.1, "mu estimate off: {}", fit.mu);
        assert!(
            (fit.sigma - sigma).abs() / sigma < 0.2,
            "sigma estimate off: {}",
            fit.sigma
        );
    }

    #[test]
    fn test_discrete_nan_triple_for_negative_phi() {
        // Alternating-sign series has a strongly negative AR(1) coefficient.
        let spread: Vec<f64> = (0..200)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();

        let fit = fit_discrete(&spread, 1.0).unwrap();
        assert!(fit.phi < 0.0, "construction should give phi < 0: {}", fit.phi);
        assert!(fit.kappa.is_nan());
        assert!(fit.mu.is_nan());
        assert!(fit.sigma.is_nan());
        assert!(fit.half_life.is_nan());
        assert!(!fit.mean_reverting);
    }

    #[test]
    fn test_discrete_nan_triple_for_random_walk_phi() {
        // A deterministic ramp regresses with phi ~= 1 (unit root); the
        // mapping must not report a finite kappa as mean reversion.
        let spread: Vec<f64> = (0..500).map(|i| i as f64 * 0.1).collect();
        let fit = fit_discrete(&spread, 1.0).unwrap();
        assert!(!fit.mean_reverting);
    }

    #[test]
    fn test_discrete_constant_spread_is_degenerate() {
        let spread = vec![2.5; 100];
        let fit = fit_discrete(&spread, 1.0).unwrap();
        assert!(fit.phi.is_nan());
        assert!(fit.kappa.is_nan());
        assert!(!fit.mean_reverting);
    }

    #[test]
    fn test_discrete_rejects_short_and_non_finite() {
        assert!(matches!(
            fit_discrete(&[1.0, 2.0], 1.0),
            Err(PairsError::InsufficientData { .. })
        ));
        assert!(matches!(
            fit_discrete(&[1.0, f64::NAN, 2.0], 1.0),
            Err(PairsError::InvalidInput(_))
        ));
        assert!(matches!(
            fit_discrete(&[1.0, 2.0, 3.0], 0.0),
            Err(PairsError::Configuration(_))
        ));
    }

    #[test]
    fn test_mle_recovers_known_parameters() {
        let (kappa, mu, sigma) = (0.5, 1.0, 0.2);
        let spread = simulate_ou(kappa, mu, sigma, 1.0, 5000, 7);

        let config = OuMleConfig::default();
        let fit = fit_mle(&spread, &config).unwrap();
        assert!(fit.converged, "optimizer should converge on clean data");
        assert!(
            (fit.kappa - kappa).abs() / kappa < 0.2,
            "kappa estimate off: {}",
            fit.kappa
        );
        assert!((fit.mu - mu).abs() < 0.1, "mu estimate off: {}", fit.mu);
        assert!(
            (fit.sigma - sigma).abs() / sigma < 0.2,
            "sigma estimate off: {}",
            fit.sigma
        );
    }

    #[test]
    fn test_mle_respects_bounds() {
        let spread = simulate_ou(0.5, 0.0, 0.2, 1.0, 500, 3);
        let config = OuMleConfig {
            kappa_bound: 0.1,
            ..OuMleConfig::default()
        };
        let fit = fit_mle(&spread, &config).unwrap();
        assert!(fit.kappa <= 0.1 + 1e-12);
        assert!(fit.kappa > 0.0);
    }

    #[test]
    fn test_mle_iteration_cap_reports_non_convergence() {
        let spread = simulate_ou(0.5, 0.0, 0.2, 1.0, 500, 11);
        let config = OuMleConfig {
            max_iterations: 2,
            ..OuMleConfig::default()
        };
        let fit = fit_mle(&spread, &config).unwrap();
        // Best-effort parameters are still reported.
        assert!(!fit.converged);
        assert!(fit.kappa.is_finite());
        assert!(fit.neg_log_likelihood.is_finite());
    }

    #[test]
    fn test_mle_invalid_config_rejected() {
        let config = OuMleConfig {
            dt: -1.0,
            ..OuMleConfig::default()
        };
        assert!(matches!(
            fit_mle(&[1.0, 2.0, 3.0], &config),
            Err(PairsError::Configuration(_))
        ));
    }

    #[test]
    fn test_fit_both_agreement_on_clean_data() {
        let spread = simulate_ou(0.8, 0.5, 0.3, 1.0, 4000, 99);
        let report = fit_both(&spread, &OuMleConfig::default()).unwrap();
        assert!(report.discrete.mean_reverting);
        assert!(report.mle.converged);
        assert!(
            report.kappa_divergence < 0.25,
            "estimators should roughly agree, divergence {}",
            report.kappa_divergence
        );
    }

    #[test]
    fn test_half_life_edge_cases() {
        assert!((half_life(std::f64::consts::LN_2) - 1.0).abs() < 1e-12);
        assert!(half_life(0.0).is_nan());
        assert!(half_life(-1.0).is_nan());
        assert!(half_life(f64::NAN).is_nan());
    }
}
