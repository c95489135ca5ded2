//! Ability estimation over a response history.
//!
//! Three interchangeable strategies share one entry point, [`estimate`]:
//!
//! - **MLE**: Fisher scoring on the 3PL likelihood. Diverges on all-correct
//!   or all-incorrect patterns because no finite maximum exists there. The
//!   optional `max_step` clamp bounds each re-estimation.
//! - **MAP**: the same update regularized by a normal prior.
//! - **EAP**: posterior mean over a fixed quadrature grid.
//!
//! Every strategy works on the whole history, never only the latest response.

use serde::{Deserialize, Serialize};

use crate::error::CatError;
use crate::irt::{self, GUESS_EPSILON};
use crate::model::{Attempt, EstimationMethod};

/// Total information below which the likelihood is treated as flat.
pub const INFO_EPSILON: f64 = 1e-12;

const LOG_2_PI: f64 = 1.837_877_066_409_345_3;

/// Numeric settings shared by the estimators.
///
/// Defaults: N(0, 1) prior, 81 grid points over [-4, 4], 25 iterations,
/// unclamped Newton steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Mean of the normal ability prior (MAP, EAP).
    #[serde(default = "default_prior_mean")]
    pub prior_mean: f64,
    /// Variance of the normal ability prior (MAP, EAP).
    #[serde(default = "default_prior_var")]
    pub prior_var: f64,
    /// Lower bound of the EAP quadrature grid.
    #[serde(default = "default_grid_min")]
    pub grid_min: f64,
    /// Upper bound of the EAP quadrature grid.
    #[serde(default = "default_grid_max")]
    pub grid_max: f64,
    /// Number of EAP quadrature points.
    #[serde(default = "default_grid_points")]
    pub grid_points: usize,
    /// Hard cap on Newton iterations (MLE, MAP).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Newton stops once a step is smaller than this.
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f64,
    /// Largest move of a single Newton step. Unbounded when unset; set it to
    /// keep θ moving in bounded increments on all-correct or all-incorrect
    /// patterns, which have no finite MLE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_step: Option<f64>,
}

fn default_prior_mean() -> f64 {
    0.0
}
fn default_prior_var() -> f64 {
    1.0
}
fn default_grid_min() -> f64 {
    -4.0
}
fn default_grid_max() -> f64 {
    4.0
}
fn default_grid_points() -> usize {
    81
}
fn default_max_iterations() -> u32 {
    25
}
fn default_step_tolerance() -> f64 {
    1e-4
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            prior_mean: default_prior_mean(),
            prior_var: default_prior_var(),
            grid_min: default_grid_min(),
            grid_max: default_grid_max(),
            grid_points: default_grid_points(),
            max_iterations: default_max_iterations(),
            step_tolerance: default_step_tolerance(),
            max_step: None,
        }
    }
}

impl EstimatorConfig {
    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), CatError> {
        if !self.prior_mean.is_finite() {
            return Err(CatError::InvalidEstimator("prior_mean must be finite".into()));
        }
        if !(self.prior_var.is_finite() && self.prior_var > 0.0) {
            return Err(CatError::InvalidEstimator(format!(
                "prior_var must be positive, got {}",
                self.prior_var
            )));
        }
        if !(self.grid_min.is_finite() && self.grid_max.is_finite() && self.grid_min < self.grid_max)
        {
            return Err(CatError::InvalidEstimator(format!(
                "grid bounds [{}, {}] are not an interval",
                self.grid_min, self.grid_max
            )));
        }
        if self.grid_points < 2 {
            return Err(CatError::InvalidEstimator(
                "grid_points must be at least 2".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(CatError::InvalidEstimator(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.step_tolerance.is_finite() && self.step_tolerance > 0.0) {
            return Err(CatError::InvalidEstimator(
                "step_tolerance must be positive".into(),
            ));
        }
        if let Some(max_step) = self.max_step {
            if !(max_step.is_finite() && max_step > 0.0) {
                return Err(CatError::InvalidEstimator(format!(
                    "max_step must be positive, got {max_step}"
                )));
            }
        }
        Ok(())
    }

    /// Evenly spaced quadrature nodes over `[grid_min, grid_max]`.
    pub fn grid(&self) -> Vec<f64> {
        let n = self.grid_points.max(2);
        let step = (self.grid_max - self.grid_min) / (n - 1) as f64;
        (0..n).map(|k| self.grid_min + step * k as f64).collect()
    }

    fn log_prior(&self, theta: f64) -> f64 {
        let d = theta - self.prior_mean;
        -0.5 * d * d / self.prior_var - 0.5 * (LOG_2_PI + self.prior_var.ln())
    }
}

/// Outcome of one estimation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    /// Updated ability estimate. Always finite.
    pub theta: f64,
    /// `1 / sqrt(test information)` at `theta`, `None` when undefined.
    pub standard_error: Option<f64>,
    /// Whether the iteration met its step tolerance. Always `true` for EAP
    /// unless it fell back to the prior mean.
    pub converged: bool,
    /// Newton iterations performed (0 for EAP).
    pub iterations: u32,
    /// Posterior standard deviation (EAP only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posterior_sd: Option<f64>,
}

/// Re-estimate ability over `history` with the chosen strategy.
///
/// Newton-based strategies start from `start_theta`; EAP ignores it.
pub fn estimate(
    method: EstimationMethod,
    history: &[Attempt],
    start_theta: f64,
    config: &EstimatorConfig,
) -> AbilityEstimate {
    let estimate = match method {
        EstimationMethod::Mle => estimate_mle(history, start_theta, config),
        EstimationMethod::Map => estimate_map(history, start_theta, config),
        EstimationMethod::Eap => estimate_eap(history, config),
    };
    tracing::debug!(
        method = %method,
        items = history.len(),
        theta = estimate.theta,
        converged = estimate.converged,
        iterations = estimate.iterations,
        "ability re-estimated"
    );
    estimate
}

/// Maximum likelihood estimate by Fisher scoring.
pub fn estimate_mle(history: &[Attempt], start_theta: f64, config: &EstimatorConfig) -> AbilityEstimate {
    fisher_scoring(history, start_theta, config, None)
}

/// Maximum a posteriori estimate under a `N(prior_mean, prior_var)` prior.
pub fn estimate_map(history: &[Attempt], start_theta: f64, config: &EstimatorConfig) -> AbilityEstimate {
    fisher_scoring(
        history,
        start_theta,
        config,
        Some((config.prior_mean, config.prior_var)),
    )
}

/// Expected a posteriori estimate on the configured quadrature grid.
pub fn estimate_eap(history: &[Attempt], config: &EstimatorConfig) -> AbilityEstimate {
    let nodes = config.grid();
    let log_posterior: Vec<f64> = nodes
        .iter()
        .map(|&theta| config.log_prior(theta) + irt::log_likelihood(theta, history))
        .collect();

    let log_mass = irt::logsumexp(&log_posterior);
    if !log_mass.is_finite() {
        tracing::warn!(
            items = history.len(),
            "posterior mass vanished on the quadrature grid, falling back to prior mean"
        );
        let theta = config.prior_mean;
        return AbilityEstimate {
            theta,
            standard_error: standard_error(history, theta),
            converged: false,
            iterations: 0,
            posterior_sd: None,
        };
    }

    let weights: Vec<f64> = log_posterior.iter().map(|lp| (lp - log_mass).exp()).collect();
    let mean: f64 = weights.iter().zip(&nodes).map(|(w, t)| w * t).sum();
    let variance: f64 = weights
        .iter()
        .zip(&nodes)
        .map(|(w, t)| w * (t - mean) * (t - mean))
        .sum();

    AbilityEstimate {
        theta: mean,
        standard_error: standard_error(history, mean),
        converged: true,
        iterations: 0,
        posterior_sd: Some(variance.max(0.0).sqrt()),
    }
}

/// `1 / sqrt(Σ information)` at `theta`.
///
/// `None` for an empty history or when the information is numerically zero
/// or not a number.
pub fn standard_error(history: &[Attempt], theta: f64) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let info = irt::test_information(theta, history);
    if !info.is_finite() || info < INFO_EPSILON {
        None
    } else {
        Some(1.0 / info.sqrt())
    }
}

/// Score function and Fisher information of the likelihood at `theta`.
///
/// Items whose response probability is saturated contribute nothing.
fn score_and_information(history: &[Attempt], theta: f64) -> (f64, f64) {
    let mut gradient = 0.0;
    let mut info = 0.0;
    for attempt in history {
        let cal = attempt.item.calibration();
        let c = cal.c.max(0.0);
        if 1.0 - c <= GUESS_EPSILON {
            continue;
        }
        let p = irt::probability(theta, cal.a, cal.b, c);
        if irt::is_saturated(p) {
            continue;
        }
        gradient += cal.a * (attempt.score() - p) * (p - c) / ((1.0 - c) * p);
        info += irt::information(theta, cal.a, cal.b, c);
    }
    (gradient, info)
}

fn fisher_scoring(
    history: &[Attempt],
    start_theta: f64,
    config: &EstimatorConfig,
    prior: Option<(f64, f64)>,
) -> AbilityEstimate {
    let mut theta = start_theta;
    let mut converged = false;
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        let (mut gradient, mut info) = score_and_information(history, theta);
        if let Some((mean, var)) = prior {
            gradient -= (theta - mean) / var;
            info += 1.0 / var;
        }
        if info < INFO_EPSILON {
            break;
        }

        let step = gradient / info;
        if !step.is_finite() {
            break;
        }
        let step = match config.max_step {
            Some(limit) => step.clamp(-limit, limit),
            None => step,
        };
        theta += step;
        iterations += 1;

        if step.abs() < config.step_tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::debug!(
            theta,
            iterations,
            "fisher scoring stopped without meeting step tolerance"
        );
    }

    AbilityEstimate {
        theta,
        standard_error: standard_error(history, theta),
        converged,
        iterations,
        posterior_sd: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemParams;

    fn attempt(id: &str, a: f64, b: f64, c: f64, correct: bool) -> Attempt {
        Attempt {
            item: ItemParams::new(id, a, b, c),
            correct,
        }
    }

    fn mixed_history() -> Vec<Attempt> {
        vec![
            attempt("q1", 1.0, -1.0, 0.2, true),
            attempt("q2", 1.2, 0.0, 0.2, true),
            attempt("q3", 1.5, 1.0, 0.1, false),
            attempt("q4", 0.8, 0.5, 0.15, false),
        ]
    }

    #[test]
    fn default_config_values() {
        let config = EstimatorConfig::default();
        assert_eq!(config.grid_points, 81);
        assert_eq!(config.grid_min, -4.0);
        assert_eq!(config.grid_max, 4.0);
        assert_eq!(config.prior_mean, 0.0);
        assert_eq!(config.prior_var, 1.0);
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.max_step, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn grid_spans_bounds() {
        let grid = EstimatorConfig::default().grid();
        assert_eq!(grid.len(), 81);
        assert_eq!(grid[0], -4.0);
        assert!((grid[80] - 4.0).abs() < 1e-12);
        assert!((grid[40]).abs() < 1e-12);
    }

    #[test]
    fn invalid_configs_rejected() {
        let bad_var = EstimatorConfig {
            prior_var: 0.0,
            ..Default::default()
        };
        assert!(bad_var.validate().is_err());
        let bad_grid = EstimatorConfig {
            grid_min: 2.0,
            grid_max: -2.0,
            ..Default::default()
        };
        assert!(bad_grid.validate().is_err());
        let one_point = EstimatorConfig {
            grid_points: 1,
            ..Default::default()
        };
        assert!(one_point.validate().is_err());
    }

    #[test]
    fn mle_finds_likelihood_maximum() {
        let history = mixed_history();
        let config = EstimatorConfig::default();
        let est = estimate_mle(&history, 0.0, &config);
        assert!(est.converged);

        // brute-force the maximum on a fine grid
        let mut best = (f64::NEG_INFINITY, 0.0);
        let mut theta = -4.0;
        while theta <= 4.0 {
            let ll = irt::log_likelihood(theta, &history);
            if ll > best.0 {
                best = (ll, theta);
            }
            theta += 1e-4;
        }
        assert!(
            (est.theta - best.1).abs() < 1e-2,
            "mle {} vs grid {}",
            est.theta,
            best.1
        );
    }

    #[test]
    fn mle_symmetric_pattern_converges_to_difficulty() {
        let history = vec![
            attempt("q1", 1.0, 0.0, 0.0, true),
            attempt("q2", 1.0, 0.0, 0.0, false),
        ];
        let est = estimate_mle(&history, 1.0, &EstimatorConfig::default());
        assert!(est.converged);
        assert!(est.theta.abs() < 1e-3, "theta={}", est.theta);
    }

    #[test]
    fn mle_empty_history_keeps_start() {
        let est = estimate_mle(&[], 0.7, &EstimatorConfig::default());
        assert_eq!(est.theta, 0.7);
        assert_eq!(est.iterations, 0);
        assert!(!est.converged);
        assert!(est.standard_error.is_none());
    }

    #[test]
    fn mle_iteration_cap_is_not_an_error() {
        let history = vec![attempt("q1", 1.0, 0.0, 0.0, true)];
        let est = estimate_mle(&history, 0.0, &EstimatorConfig::default());
        assert!(!est.converged);
        assert_eq!(est.iterations, 25);
        assert!(est.theta.is_finite());
        assert!(est.theta > 20.0, "theta={}", est.theta);
    }

    #[test]
    fn mle_default_takes_full_newton_steps() {
        let history = vec![attempt("q1", 1.2, -1.0, 0.2, true)];
        let est = estimate_mle(&history, 0.0, &EstimatorConfig::default());
        assert_eq!(est.iterations, 25);
        assert!((est.theta - 21.188_858_886).abs() < 1e-6, "theta={}", est.theta);
    }

    #[test]
    fn max_step_bounds_each_newton_step() {
        let history = vec![attempt("q1", 1.2, -1.0, 0.2, true)];
        let config = EstimatorConfig {
            max_step: Some(0.25),
            ..Default::default()
        };
        let est = estimate_mle(&history, 0.0, &config);
        assert_eq!(est.iterations, 25);
        assert!((est.theta - 6.25).abs() < 1e-9, "theta={}", est.theta);

        // a converging estimate reaches the same point either way
        let mixed = mixed_history();
        let clamped = estimate_mle(&mixed, 0.0, &config);
        let free = estimate_mle(&mixed, 0.0, &EstimatorConfig::default());
        assert!(clamped.converged && free.converged);
        assert!((clamped.theta - free.theta).abs() < 1e-3);
    }

    #[test]
    fn non_positive_max_step_rejected() {
        let config = EstimatorConfig {
            max_step: Some(0.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn map_bounds_all_correct_pattern() {
        let history = vec![
            attempt("q1", 1.2, -1.0, 0.2, true),
            attempt("q2", 1.5, 0.0, 0.2, true),
            attempt("q3", 1.8, 1.0, 0.1, true),
        ];
        let est = estimate_map(&history, 0.0, &EstimatorConfig::default());
        assert!(est.converged);
        assert!(est.theta > 0.0 && est.theta < 3.0, "theta={}", est.theta);
    }

    #[test]
    fn map_with_empty_history_returns_prior_mean() {
        let config = EstimatorConfig {
            prior_mean: 0.5,
            ..Default::default()
        };
        let est = estimate_map(&[], 0.0, &config);
        assert!(est.converged);
        assert!((est.theta - 0.5).abs() < 1e-3);
    }

    #[test]
    fn map_is_pulled_toward_prior_relative_to_mle() {
        let history = mixed_history();
        let config = EstimatorConfig {
            prior_mean: -2.0,
            ..Default::default()
        };
        let mle = estimate_mle(&history, 0.0, &config);
        let map = estimate_map(&history, 0.0, &config);
        assert!(map.theta < mle.theta);
    }

    #[test]
    fn eap_without_responses_is_prior_mean() {
        let est = estimate_eap(&[], &EstimatorConfig::default());
        assert!(est.theta.abs() < 1e-12);
        let sd = est.posterior_sd.unwrap();
        assert!(sd > 0.95 && sd < 1.0, "sd={sd}");
        assert!(est.standard_error.is_none());
    }

    #[test]
    fn eap_stays_inside_grid_on_monotone_patterns() {
        let correct: Vec<Attempt> = (0..10)
            .map(|i| attempt(&format!("q{i}"), 1.5, 0.0, 0.2, true))
            .collect();
        let est = estimate_eap(&correct, &EstimatorConfig::default());
        assert!(est.theta > 1.0 && est.theta <= 4.0);

        let wrong: Vec<Attempt> = (0..10)
            .map(|i| attempt(&format!("q{i}"), 1.5, 0.0, 0.2, false))
            .collect();
        let est = estimate_eap(&wrong, &EstimatorConfig::default());
        assert!(est.theta < -1.0 && est.theta >= -4.0);
    }

    #[test]
    fn eap_and_map_agree_roughly_on_informative_history() {
        let history: Vec<Attempt> = (0..20)
            .map(|i| {
                let b = -2.0 + 0.2 * i as f64;
                attempt(&format!("q{i}"), 1.4, b, 0.0, b < 0.3)
            })
            .collect();
        let config = EstimatorConfig::default();
        let eap = estimate_eap(&history, &config);
        let map = estimate_map(&history, 0.0, &config);
        assert!((eap.theta - map.theta).abs() < 0.2, "eap {} map {}", eap.theta, map.theta);
    }

    #[test]
    fn standard_error_is_inverse_root_information() {
        let history = mixed_history();
        let theta = 0.1;
        let info = irt::test_information(theta, &history);
        let se = standard_error(&history, theta).unwrap();
        assert!((se - 1.0 / info.sqrt()).abs() < 1e-12);
        assert!(standard_error(&[], theta).is_none());
    }

    #[test]
    fn standard_error_undefined_when_information_vanishes() {
        let history = vec![attempt("q1", 1.0, 0.0, 0.0, true)];
        assert!(standard_error(&history, 80.0).is_none());
    }

    #[test]
    fn standard_error_undefined_for_non_finite_information() {
        let history = vec![attempt("q1", 1.0, f64::NAN, 0.2, true)];
        assert!(standard_error(&history, 0.0).is_none());
        assert!(standard_error(&mixed_history(), f64::NAN).is_none());
    }

    #[test]
    fn eap_falls_back_to_prior_mean_when_posterior_vanishes() {
        // c = 1 makes an incorrect answer impossible at every grid node
        let history = vec![attempt("q1", 1.0, 0.0, 1.0, false)];
        let config = EstimatorConfig {
            prior_mean: 0.3,
            ..Default::default()
        };
        let est = estimate_eap(&history, &config);
        assert_eq!(est.theta, 0.3);
        assert!(!est.converged);
        assert_eq!(est.posterior_sd, None);
        assert!(est.standard_error.is_none());
    }

    #[test]
    fn dispatch_uses_selected_method() {
        let history = mixed_history();
        let config = EstimatorConfig::default();
        let eap = estimate(EstimationMethod::Eap, &history, 0.0, &config);
        assert!(eap.posterior_sd.is_some());
        let mle = estimate(EstimationMethod::Mle, &history, 0.0, &config);
        assert!(mle.posterior_sd.is_none());
    }
}
