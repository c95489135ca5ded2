//! Conversion of ability estimates to reporting scales.
//!
//! Pure functions bound numerically to the engine's θ scale: a clamped linear
//! 0–100 score, a normal-CDF percentile, and letter grades over the score.

use serde::{Deserialize, Serialize};

/// Linear mapping of θ onto `[0, 100]`, clamped.
pub fn score_0_100(theta: f64, min: f64, max: f64) -> f64 {
    if max.is_nan() || min.is_nan() || max <= min {
        return if theta >= max { 100.0 } else { 0.0 };
    }
    (((theta - min) / (max - min)) * 100.0).clamp(0.0, 100.0)
}

/// Percentile of θ under a standard normal ability distribution.
pub fn percentile(theta: f64) -> f64 {
    normal_cdf(theta) * 100.0
}

/// Standard normal CDF, Abramowitz & Stegun 26.2.17 (|error| < 7.5e-8).
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let d = 0.398_942_280_401_432_7 * (-x * x / 2.0).exp();
    let p = d
        * t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    if x > 0.0 {
        1.0 - p
    } else {
        p
    }
}

/// A letter grade and the minimum score that earns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeBand {
    pub grade: String,
    pub min_score: f64,
}

/// Reporting scale settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    /// θ mapped to a score of 0.
    #[serde(default = "default_min")]
    pub theta_min: f64,
    /// θ mapped to a score of 100.
    #[serde(default = "default_max")]
    pub theta_max: f64,
    /// Grade bands; the highest band whose `min_score` is met wins.
    #[serde(default = "default_bands")]
    pub grades: Vec<GradeBand>,
    /// Grade for scores below every band.
    #[serde(default = "default_fail_grade")]
    pub fail_grade: String,
}

fn default_min() -> f64 {
    -3.0
}
fn default_max() -> f64 {
    3.0
}
fn default_fail_grade() -> String {
    "F".to_string()
}
fn default_bands() -> Vec<GradeBand> {
    [("A", 90.0), ("B", 80.0), ("C", 70.0), ("D", 60.0)]
        .into_iter()
        .map(|(grade, min_score)| GradeBand {
            grade: grade.to_string(),
            min_score,
        })
        .collect()
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            theta_min: default_min(),
            theta_max: default_max(),
            grades: default_bands(),
            fail_grade: default_fail_grade(),
        }
    }
}

impl ScaleConfig {
    pub fn score(&self, theta: f64) -> f64 {
        score_0_100(theta, self.theta_min, self.theta_max)
    }

    pub fn grade(&self, score: f64) -> &str {
        self.grades
            .iter()
            .filter(|band| score >= band.min_score)
            .max_by(|l, r| l.min_score.total_cmp(&r.min_score))
            .map(|band| band.grade.as_str())
            .unwrap_or(self.fail_grade.as_str())
    }
}

/// Final result handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub theta: f64,
    pub standard_error: Option<f64>,
    pub score: f64,
    pub percentile: f64,
    pub grade: String,
}

impl ScoreReport {
    pub fn from_theta(theta: f64, standard_error: Option<f64>, scale: &ScaleConfig) -> Self {
        let score = scale.score(theta);
        Self {
            theta,
            standard_error,
            score,
            percentile: percentile(theta),
            grade: scale.grade(score).to_string(),
        }
    }
}
