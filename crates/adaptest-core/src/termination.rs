//! Stopping rules.
//!
//! [`decide`] is the standard rule. Alternative rules implement
//! [`TerminationPolicy`] and are swapped in by the controller without touching
//! the estimator or the session.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::model::TerminationReason;

/// A stop/continue verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationDecision {
    pub stop: bool,
    pub reason: Option<TerminationReason>,
}

impl TerminationDecision {
    pub const CONTINUE: TerminationDecision = TerminationDecision {
        stop: false,
        reason: None,
    };

    pub fn stop(reason: TerminationReason) -> Self {
        Self {
            stop: true,
            reason: Some(reason),
        }
    }
}

/// Standard stopping rule.
///
/// Stops with `PrecisionMet` once the standard error is defined and below
/// `target_se`, otherwise with `MaxItemsReached` once `attempt_count` reaches
/// `max_items`.
pub fn decide(
    standard_error: Option<f64>,
    attempt_count: usize,
    max_items: usize,
    target_se: f64,
) -> TerminationDecision {
    if let Some(se) = standard_error {
        if se < target_se {
            return TerminationDecision::stop(TerminationReason::PrecisionMet);
        }
    }
    if attempt_count >= max_items {
        return TerminationDecision::stop(TerminationReason::MaxItemsReached);
    }
    TerminationDecision::CONTINUE
}

/// Everything a stopping rule may look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminationInput {
    pub standard_error: Option<f64>,
    pub attempt_count: usize,
    pub max_items: usize,
    pub target_se: f64,
    /// Time since the session started.
    pub elapsed: Duration,
}

/// A pluggable stopping rule.
pub trait TerminationPolicy: Send + Sync {
    fn decide(&self, input: &TerminationInput) -> TerminationDecision;
}

impl<P: TerminationPolicy + ?Sized> TerminationPolicy for Box<P> {
    fn decide(&self, input: &TerminationInput) -> TerminationDecision {
        (**self).decide(input)
    }
}

/// The standard rule, see [`decide`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardTermination;

impl TerminationPolicy for StandardTermination {
    fn decide(&self, input: &TerminationInput) -> TerminationDecision {
        decide(
            input.standard_error,
            input.attempt_count,
            input.max_items,
            input.target_se,
        )
    }
}

/// Suppresses precision stops until `min_items` have been administered.
///
/// The max-items stop of the inner rule still applies.
#[derive(Debug, Clone)]
pub struct MinimumItems<P> {
    pub min_items: usize,
    pub inner: P,
}

impl<P: TerminationPolicy> MinimumItems<P> {
    pub fn new(min_items: usize, inner: P) -> Self {
        Self { min_items, inner }
    }
}

impl<P: TerminationPolicy> TerminationPolicy for MinimumItems<P> {
    fn decide(&self, input: &TerminationInput) -> TerminationDecision {
        let decision = self.inner.decide(input);
        if decision.reason == Some(TerminationReason::PrecisionMet)
            && input.attempt_count < self.min_items
        {
            if input.attempt_count >= input.max_items {
                return TerminationDecision::stop(TerminationReason::MaxItemsReached);
            }
            return TerminationDecision::CONTINUE;
        }
        decision
    }
}

/// Stops once the session has run for `limit`, otherwise defers to `inner`.
#[derive(Debug, Clone)]
pub struct TimeLimit<P> {
    pub limit: Duration,
    pub inner: P,
}

impl<P: TerminationPolicy> TimeLimit<P> {
    pub fn new(limit: Duration, inner: P) -> Self {
        Self { limit, inner }
    }
}

impl<P: TerminationPolicy> TerminationPolicy for TimeLimit<P> {
    fn decide(&self, input: &TerminationInput) -> TerminationDecision {
        let decision = self.inner.decide(input);
        if decision.stop {
            return decision;
        }
        if input.elapsed >= self.limit {
            return TerminationDecision::stop(TerminationReason::TimeLimitReached);
        }
        decision
    }
}
