//! Three-parameter logistic (3PL) response model.
//!
//! Stateless functions for the response probability and Fisher information of
//! a single item, plus the history-level sums the estimators are built on.

use crate::model::{Attempt, Calibration};

/// Distance from 0 or 1 at which a probability counts as saturated.
pub const PROB_EPSILON: f64 = 1e-12;

/// Distance of `1 - c` from zero below which an item carries no information.
pub const GUESS_EPSILON: f64 = 1e-9;

/// Numerically stable logistic function.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let exp_x = x.exp();
        exp_x / (1.0 + exp_x)
    }
}

/// Numerically stable `ln(sigmoid(x))`.
#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// `ln(Σ exp(x_i))` without overflow.
pub fn logsumexp(values: &[f64]) -> f64 {
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = values.iter().map(|x| (x - max_val).exp()).sum();
    max_val + sum.ln()
}

/// Probability of a correct response under the 3PL model.
///
/// The result lies in `[c, 1]`. A guessing parameter `c >= 1` is degenerate
/// and yields `1.0`; a negative `c` is treated as zero.
#[inline]
pub fn probability(theta: f64, a: f64, b: f64, c: f64) -> f64 {
    if c >= 1.0 {
        return 1.0;
    }
    let c = c.max(0.0);
    c + (1.0 - c) * sigmoid(a * (theta - b))
}

/// Fisher information of one item at `theta`.
///
/// Returns `0.0` when the response probability is saturated or when the item
/// has no room above its guessing floor.
#[inline]
pub fn information(theta: f64, a: f64, b: f64, c: f64) -> f64 {
    let c = c.max(0.0);
    let one_minus_c = 1.0 - c;
    if one_minus_c <= GUESS_EPSILON {
        return 0.0;
    }
    let p = probability(theta, a, b, c);
    if is_saturated(p) {
        return 0.0;
    }
    let q = 1.0 - p;
    let ratio = (p - c) / one_minus_c;
    a * a * (q / p) * ratio * ratio
}

/// Whether `p` is within [`PROB_EPSILON`] of 0 or 1.
#[inline]
pub fn is_saturated(p: f64) -> bool {
    p < PROB_EPSILON || p > 1.0 - PROB_EPSILON
}

/// Information of one calibrated item at `theta`.
#[inline]
pub fn item_information(theta: f64, cal: &Calibration) -> f64 {
    information(theta, cal.a, cal.b, cal.c)
}

/// Total Fisher information of a history at `theta`.
pub fn test_information(theta: f64, history: &[Attempt]) -> f64 {
    history
        .iter()
        .map(|attempt| item_information(theta, &attempt.item.calibration()))
        .sum()
}

/// Log-probability of one observed response.
///
/// Without guessing, both outcomes go through [`log_sigmoid`] so the tails
/// never round to `ln(0)`.
pub fn log_response_probability(theta: f64, cal: &Calibration, correct: bool) -> f64 {
    let c = cal.c.max(0.0);
    if c >= 1.0 {
        return if correct { 0.0 } else { f64::NEG_INFINITY };
    }
    let z = cal.a * (theta - cal.b);
    if correct {
        if c == 0.0 {
            log_sigmoid(z)
        } else {
            (c + (1.0 - c) * sigmoid(z)).ln()
        }
    } else {
        (1.0 - c).ln() + log_sigmoid(-z)
    }
}

/// Log-likelihood of a full history at `theta`.
pub fn log_likelihood(theta: f64, history: &[Attempt]) -> f64 {
    history
        .iter()
        .map(|attempt| log_response_probability(theta, &attempt.item.calibration(), attempt.correct))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemParams;

    fn attempt(a: f64, b: f64, c: f64, correct: bool) -> Attempt {
        Attempt {
            item: ItemParams::new("q", a, b, c),
            correct,
        }
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(1000.0), 1.0);
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
        assert!(log_sigmoid(-1000.0).is_finite());
        assert!((log_sigmoid(-1000.0) + 1000.0).abs() < 1e-9);
    }

    #[test]
    fn probability_stays_in_unit_interval() {
        let thetas = [-50.0, -6.0, -2.5, -0.3, 0.0, 0.7, 3.0, 8.0, 50.0];
        let items = [(0.2, -3.0, 0.0), (1.0, 0.0, 0.25), (2.8, 1.5, 0.1), (0.9, 2.0, 0.5)];
        for &theta in &thetas {
            for &(a, b, c) in &items {
                let p = probability(theta, a, b, c);
                assert!((0.0..=1.0).contains(&p), "p={p} at theta={theta}");
                assert!(p >= c);
            }
        }
    }

    #[test]
    fn probability_strictly_increasing_in_theta() {
        let items = [(0.5, -1.0, 0.0), (1.3, 0.2, 0.2), (2.2, 1.0, 0.35)];
        for &(a, b, c) in &items {
            let mut prev = probability(-6.0, a, b, c);
            let mut theta = -6.0;
            while theta < 6.0 {
                theta += 0.1;
                let p = probability(theta, a, b, c);
                assert!(p > prev, "not increasing at theta={theta} for a={a} b={b} c={c}");
                prev = p;
            }
        }
    }

    #[test]
    fn probability_guards_degenerate_guessing() {
        assert_eq!(probability(0.0, 1.0, 0.0, 1.0), 1.0);
        assert_eq!(probability(0.0, 1.0, 0.0, 1.5), 1.0);
        assert_eq!(probability(0.0, 1.0, 0.0, -0.3), 0.5);
    }

    #[test]
    fn information_non_negative_and_zero_at_boundary() {
        for theta in [-40.0, -3.0, 0.0, 1.0, 40.0] {
            assert!(information(theta, 1.5, 0.0, 0.2) >= 0.0);
        }
        // P saturates at 1
        assert_eq!(information(60.0, 1.0, 0.0, 0.0), 0.0);
        // P saturates at 0
        assert_eq!(information(-60.0, 1.0, 0.0, 0.0), 0.0);
        // no room above the guessing floor
        assert_eq!(information(0.0, 1.0, 0.0, 1.0 - 1e-10), 0.0);
    }

    #[test]
    fn two_pl_information_matches_closed_form() {
        let (a, b) = (1.7, 0.4);
        for theta in [-1.0, 0.4, 2.0] {
            let p = sigmoid(a * (theta - b));
            let expected = a * a * p * (1.0 - p);
            assert!((information(theta, a, b, 0.0) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn guessing_lowers_information() {
        let with_guess = information(0.0, 1.2, 0.0, 0.25);
        let without = information(0.0, 1.2, 0.0, 0.0);
        assert!(with_guess < without);
    }

    #[test]
    fn log_likelihood_matches_direct_product() {
        let history = vec![attempt(1.2, -1.0, 0.2, true), attempt(1.5, 0.0, 0.2, false)];
        let theta = 0.3;
        let p1 = probability(theta, 1.2, -1.0, 0.2);
        let p2 = probability(theta, 1.5, 0.0, 0.2);
        let expected = p1.ln() + (1.0 - p2).ln();
        assert!((log_likelihood(theta, &history) - expected).abs() < 1e-12);
    }

    #[test]
    fn log_likelihood_finite_far_in_tails() {
        let history = vec![attempt(2.0, 0.0, 0.0, true), attempt(2.0, 0.0, 0.0, false)];
        assert!(log_likelihood(-300.0, &history).is_finite());
        assert!(log_likelihood(300.0, &history).is_finite());
    }

    #[test]
    fn logsumexp_handles_large_values() {
        let v = [1000.0, 1000.0];
        assert!((logsumexp(&v) - (1000.0 + 2f64.ln())).abs() < 1e-9);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_information_sums_items() {
        let history = vec![attempt(1.0, 0.0, 0.0, true), attempt(2.0, 0.5, 0.1, false)];
        let theta = 0.2;
        let expected = information(theta, 1.0, 0.0, 0.0) + information(theta, 2.0, 0.5, 0.1);
        assert!((test_information(theta, &history) - expected).abs() < 1e-15);
    }
}
