//! Per-examinee session state.
//!
//! A [`Session`] owns the append-only history of administered items and the
//! current ability estimate. It is mutated only by [`Session::record_attempt`]
//! and the termination transitions, and it round-trips losslessly through
//! [`Session::serialize`] / [`Session::deserialize`] so an external store can
//! persist it between requests.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CatError;
use crate::estimator::{self, EstimatorConfig};
use crate::model::{
    Attempt, EstimationMethod, ItemParams, Response, SessionStatus, TerminationReason,
};
use crate::scale::{ScaleConfig, ScoreReport};
use crate::termination::{self, TerminationDecision, TerminationInput, TerminationPolicy};

/// Ability estimate returned after each recorded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilityUpdate {
    pub theta: f64,
    pub standard_error: Option<f64>,
    /// Whether the estimator met its convergence criterion.
    pub converged: bool,
}

/// Values used to create sessions, including fresh sessions that replace an
/// unreadable stored one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    pub initial_theta: f64,
    pub estimation_method: EstimationMethod,
    pub max_items: usize,
    pub target_se: f64,
    pub estimator: EstimatorConfig,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            initial_theta: 0.0,
            estimation_method: EstimationMethod::Eap,
            max_items: 20,
            target_se: 0.3,
            estimator: EstimatorConfig::default(),
        }
    }
}

/// How [`Session::restore_or_create`] obtained its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restored {
    /// The stored blob was valid.
    Existing,
    /// The blob was missing or unreadable; prior progress was discarded.
    Fresh { reason: String },
}

/// One examinee's adaptive test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    session_id: String,
    theta: f64,
    standard_error: Option<f64>,
    history: Vec<Attempt>,
    estimation_method: EstimationMethod,
    max_items: usize,
    target_se: f64,
    status: SessionStatus,
    termination_reason: Option<TerminationReason>,
    initial_theta: f64,
    #[serde(default)]
    estimator: EstimatorConfig,
    #[serde(default)]
    converged: bool,
    /// Item handed out by the controller and not yet answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_item: Option<ItemParams>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Builder for sessions with non-default estimator settings or a caller
/// chosen id.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    session_id: Option<String>,
    defaults: SessionDefaults,
}

impl SessionBuilder {
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn initial_theta(mut self, theta: f64) -> Self {
        self.defaults.initial_theta = theta;
        self
    }

    pub fn estimation_method(mut self, method: EstimationMethod) -> Self {
        self.defaults.estimation_method = method;
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.defaults.max_items = max_items;
        self
    }

    pub fn target_se(mut self, target_se: f64) -> Self {
        self.defaults.target_se = target_se;
        self
    }

    pub fn estimator(mut self, config: EstimatorConfig) -> Self {
        self.defaults.estimator = config;
        self
    }

    pub fn build(self) -> Result<Session, CatError> {
        let d = self.defaults;
        if d.max_items == 0 {
            return Err(CatError::InvalidMaxItems);
        }
        if !(d.target_se.is_finite() && d.target_se > 0.0) {
            return Err(CatError::InvalidTargetSe(d.target_se));
        }
        if !d.initial_theta.is_finite() {
            return Err(CatError::InvalidInitialTheta(d.initial_theta));
        }
        d.estimator.validate()?;

        let now = Utc::now();
        Ok(Session {
            session_id: self
                .session_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            theta: d.initial_theta,
            standard_error: None,
            history: Vec::new(),
            estimation_method: d.estimation_method,
            max_items: d.max_items,
            target_se: d.target_se,
            status: SessionStatus::Active,
            termination_reason: None,
            initial_theta: d.initial_theta,
            estimator: d.estimator,
            converged: false,
            pending_item: None,
            created_at: now,
            updated_at: now,
        })
    }
}

impl Session {
    /// Start a session with default estimator settings.
    pub fn create(
        initial_theta: f64,
        estimation_method: EstimationMethod,
        max_items: usize,
        target_se: f64,
    ) -> Result<Self, CatError> {
        Self::builder()
            .initial_theta(initial_theta)
            .estimation_method(estimation_method)
            .max_items(max_items)
            .target_se(target_se)
            .build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder {
            session_id: None,
            defaults: SessionDefaults::default(),
        }
    }

    /// Builder seeded from `defaults`.
    pub fn builder_from(defaults: SessionDefaults) -> SessionBuilder {
        SessionBuilder {
            session_id: None,
            defaults,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn standard_error(&self) -> Option<f64> {
        self.standard_error
    }

    pub fn history(&self) -> &[Attempt] {
        &self.history
    }

    pub fn responses(&self) -> Vec<Response> {
        self.history.iter().map(Attempt::response).collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.history.len()
    }

    pub fn administered_ids(&self) -> HashSet<String> {
        self.history.iter().map(|a| a.item.id.clone()).collect()
    }

    pub fn estimation_method(&self) -> EstimationMethod {
        self.estimation_method
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn target_se(&self) -> f64 {
        self.target_se
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    pub fn initial_theta(&self) -> f64 {
        self.initial_theta
    }

    pub fn estimator(&self) -> &EstimatorConfig {
        &self.estimator
    }

    /// Whether the last estimate met its convergence criterion.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// The item last administered and not yet answered, as it was
    /// calibrated when it was handed out.
    pub fn pending_item(&self) -> Option<&ItemParams> {
        self.pending_item.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // -- mutation -----------------------------------------------------------

    /// Record one response and re-estimate ability over the whole history.
    ///
    /// The item's parameters are snapshotted (sanitized) at this point; later
    /// recalibration in the bank does not affect this session.
    pub fn record_attempt(
        &mut self,
        item: &ItemParams,
        correct: bool,
    ) -> Result<AbilityUpdate, CatError> {
        self.ensure_active()?;
        if !item.b.is_finite() {
            return Err(CatError::InvalidItem {
                item_id: item.id.clone(),
                reason: format!("difficulty must be finite, got {}", item.b),
            });
        }
        if self.history.iter().any(|a| a.item.id == item.id) {
            return Err(CatError::DuplicateItem(item.id.clone()));
        }

        let cal = item.sanitized();
        self.history.push(Attempt {
            item: ItemParams {
                id: item.id.clone(),
                a: cal.a,
                b: cal.b,
                c: cal.c,
                content_area: item.content_area.clone(),
            },
            correct,
        });

        let estimate = estimator::estimate(
            self.estimation_method,
            &self.history,
            self.theta,
            &self.estimator,
        );
        if estimate.theta.is_finite() {
            self.theta = estimate.theta;
            self.standard_error = estimate.standard_error;
        } else {
            tracing::warn!(
                session = %self.session_id,
                "estimator produced a non-finite theta, keeping the previous estimate"
            );
            self.standard_error = estimator::standard_error(&self.history, self.theta);
        }
        self.converged = estimate.converged;
        self.pending_item = None;
        self.updated_at = Utc::now();

        Ok(AbilityUpdate {
            theta: self.theta,
            standard_error: self.standard_error,
            converged: self.converged,
        })
    }

    /// Remember `item` as administered. Returns `false` when it already was
    /// the pending item.
    pub fn set_pending_item(&mut self, item: &ItemParams) -> Result<bool, CatError> {
        self.ensure_active()?;
        if self.history.iter().any(|a| a.item.id == item.id) {
            return Err(CatError::DuplicateItem(item.id.clone()));
        }
        if self.pending_item.as_ref() == Some(item) {
            return Ok(false);
        }
        self.pending_item = Some(item.clone());
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Evaluate the standard stopping rule without changing the session.
    ///
    /// A terminated session reports its recorded reason.
    pub fn should_terminate(&self) -> TerminationDecision {
        if let Some(decision) = self.terminal_decision() {
            return decision;
        }
        termination::decide(
            self.standard_error,
            self.history.len(),
            self.max_items,
            self.target_se,
        )
    }

    /// Evaluate an alternative stopping rule without changing the session.
    pub fn should_terminate_with(&self, policy: &dyn TerminationPolicy) -> TerminationDecision {
        if let Some(decision) = self.terminal_decision() {
            return decision;
        }
        policy.decide(&self.termination_input())
    }

    /// Apply `policy` and terminate the session if it says stop.
    pub fn check_termination(&mut self, policy: &dyn TerminationPolicy) -> TerminationDecision {
        let decision = self.should_terminate_with(policy);
        if self.is_active() {
            if let (true, Some(reason)) = (decision.stop, decision.reason) {
                self.finish(reason);
            }
        }
        decision
    }

    /// Terminate the session. Fails if it is already terminated.
    pub fn terminate(&mut self, reason: TerminationReason) -> Result<(), CatError> {
        self.ensure_active()?;
        self.finish(reason);
        Ok(())
    }

    /// The selector found no candidate.
    pub fn mark_pool_exhausted(&mut self) -> Result<(), CatError> {
        self.terminate(TerminationReason::PoolExhausted)
    }

    /// The controller stopped the test explicitly.
    pub fn stop_manually(&mut self) -> Result<(), CatError> {
        self.terminate(TerminationReason::ManualStop)
    }

    /// Score, percentile and grade for the current estimate.
    pub fn score(&self, scale: &ScaleConfig) -> ScoreReport {
        ScoreReport::from_theta(self.theta, self.standard_error, scale)
    }

    fn finish(&mut self, reason: TerminationReason) {
        self.status = SessionStatus::Terminated;
        self.pending_item = None;
        self.termination_reason = Some(reason);
        self.updated_at = Utc::now();
        tracing::info!(
            session = %self.session_id,
            reason = %reason,
            items = self.history.len(),
            theta = self.theta,
            "session terminated"
        );
    }

    fn ensure_active(&self) -> Result<(), CatError> {
        match (self.status, self.termination_reason) {
            (SessionStatus::Active, _) => Ok(()),
            (SessionStatus::Terminated, reason) => Err(CatError::SessionTerminated {
                session_id: self.session_id.clone(),
                reason: reason.unwrap_or(TerminationReason::ManualStop),
            }),
        }
    }

    fn terminal_decision(&self) -> Option<TerminationDecision> {
        match self.status {
            SessionStatus::Terminated => Some(TerminationDecision {
                stop: true,
                reason: self.termination_reason,
            }),
            SessionStatus::Active => None,
        }
    }

    fn termination_input(&self) -> TerminationInput {
        TerminationInput {
            standard_error: self.standard_error,
            attempt_count: self.history.len(),
            max_items: self.max_items,
            target_se: self.target_se,
            elapsed: Utc::now() - self.created_at,
        }
    }

    // -- persistence --------------------------------------------------------

    /// Opaque mapping for the external session store.
    pub fn serialize(&self) -> Result<Value, CatError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a session from [`Session::serialize`] output, validating every
    /// invariant.
    pub fn deserialize(value: Value) -> Result<Self, CatError> {
        let session: Session = serde_json::from_value(value)?;
        session.validate()?;
        Ok(session)
    }

    /// Restore a stored session, or start a fresh one from `defaults` when the
    /// blob is missing or unreadable.
    ///
    /// A fresh session discards prior progress, so it is logged and reported
    /// through [`Restored::Fresh`].
    pub fn restore_or_create(
        session_id: &str,
        blob: Option<Value>,
        defaults: &SessionDefaults,
    ) -> Result<(Self, Restored), CatError> {
        let reason = match blob {
            Some(value) => match Self::deserialize(value) {
                Ok(session) if session.session_id == session_id => {
                    return Ok((session, Restored::Existing));
                }
                Ok(session) => format!(
                    "stored session id {} does not match requested id",
                    session.session_id
                ),
                Err(e) => e.to_string(),
            },
            None => "no stored session".to_string(),
        };

        tracing::warn!(
            session = %session_id,
            reason = %reason,
            "starting a fresh session, prior progress is discarded"
        );
        let session = Self::builder_from(*defaults)
            .session_id(session_id)
            .build()?;
        Ok((session, Restored::Fresh { reason }))
    }

    fn validate(&self) -> Result<(), CatError> {
        let invalid = |msg: String| Err(CatError::InvalidSession(msg));
        if self.session_id.is_empty() {
            return invalid("empty session_id".into());
        }
        if !self.theta.is_finite() {
            return invalid(format!("theta is not finite: {}", self.theta));
        }
        if !self.initial_theta.is_finite() {
            return invalid("initial_theta is not finite".into());
        }
        if let Some(se) = self.standard_error {
            if !(se.is_finite() && se > 0.0) {
                return invalid(format!("standard_error out of range: {se}"));
            }
        }
        if self.max_items == 0 {
            return invalid("max_items must be greater than zero".into());
        }
        if !(self.target_se.is_finite() && self.target_se > 0.0) {
            return invalid(format!("target_se out of range: {}", self.target_se));
        }
        self.estimator.validate()?;

        let mut seen = HashSet::new();
        for attempt in &self.history {
            if !seen.insert(attempt.item.id.as_str()) {
                return invalid(format!("item {} appears twice", attempt.item.id));
            }
            if !attempt.item.calibration().is_well_formed() {
                return invalid(format!("item {} has invalid parameters", attempt.item.id));
            }
        }

        if let Some(pending) = &self.pending_item {
            if seen.contains(pending.id.as_str()) {
                return invalid(format!("pending item {} was already answered", pending.id));
            }
            if self.status == SessionStatus::Terminated {
                return invalid("terminated session has a pending item".into());
            }
        }

        match (self.status, self.termination_reason) {
            (SessionStatus::Active, None) | (SessionStatus::Terminated, Some(_)) => Ok(()),
            (SessionStatus::Active, Some(r)) => invalid(format!("active session has reason {r}")),
            (SessionStatus::Terminated, None) => {
                invalid("terminated session has no reason".into())
            }
        }
    }
}
