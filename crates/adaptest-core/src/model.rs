//! Core data model types for adaptest.
//!
//! These are the fundamental types the engine uses to represent calibrated
//! items, administered attempts, and the enums that drive a session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Smallest discrimination the engine will compute with.
pub const MIN_DISCRIMINATION: f64 = 1e-3;

/// Largest guessing parameter the engine will compute with.
pub const MAX_GUESSING: f64 = 1.0 - 1e-6;

/// A calibrated item as stored in an item bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemParams {
    /// Unique identifier for this item.
    pub id: String,
    /// Discrimination.
    pub a: f64,
    /// Difficulty.
    pub b: f64,
    /// Pseudo-guessing lower asymptote.
    #[serde(default)]
    pub c: f64,
    /// Optional content area label, used by content balancing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_area: Option<String>,
}

impl ItemParams {
    /// Create an item without a content area.
    pub fn new(id: impl Into<String>, a: f64, b: f64, c: f64) -> Self {
        Self {
            id: id.into(),
            a,
            b,
            c,
            content_area: None,
        }
    }

    /// Attach a content area label.
    pub fn with_content_area(mut self, area: impl Into<String>) -> Self {
        self.content_area = Some(area.into());
        self
    }

    /// The raw `(a, b, c)` triple.
    pub fn calibration(&self) -> Calibration {
        Calibration {
            a: self.a,
            b: self.b,
            c: self.c,
        }
    }

    /// Calibration safe to compute with. Degenerate parameters are clamped
    /// and reported through `tracing`.
    pub fn sanitized(&self) -> Calibration {
        let raw = self.calibration();
        let clean = raw.clamped();
        if clean != raw {
            tracing::warn!(
                item = %self.id,
                a = raw.a,
                c = raw.c,
                "degenerate item parameters clamped (a -> {}, c -> {})",
                clean.a,
                clean.c
            );
        }
        clean
    }
}

/// The `(a, b, c)` parameters of the 3PL model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Calibration {
    /// Clamp `a` to a small positive value and `c` into `[0, 1)`.
    ///
    /// Non-finite `a` is treated like a non-positive one; non-finite `c` is
    /// treated as no guessing.
    pub fn clamped(self) -> Self {
        let a = if self.a.is_finite() && self.a > 0.0 {
            self.a.max(MIN_DISCRIMINATION)
        } else {
            MIN_DISCRIMINATION
        };
        let c = if self.c.is_finite() {
            self.c.clamp(0.0, MAX_GUESSING)
        } else {
            0.0
        };
        Self { a, b: self.b, c }
    }

    /// Whether the parameters are usable without clamping.
    pub fn is_well_formed(&self) -> bool {
        self.a.is_finite()
            && self.a > 0.0
            && self.b.is_finite()
            && self.c.is_finite()
            && (0.0..1.0).contains(&self.c)
    }
}

/// A single examinee response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub item_id: String,
    pub correct: bool,
}

/// One entry of a session history: the item snapshot taken at administration
/// time paired with the examinee's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Sanitized snapshot of the item when it was administered.
    pub item: ItemParams,
    pub correct: bool,
}

impl Attempt {
    pub fn response(&self) -> Response {
        Response {
            item_id: self.item.id.clone(),
            correct: self.correct,
        }
    }

    /// The observed score, `1.0` for correct and `0.0` otherwise.
    pub fn score(&self) -> f64 {
        if self.correct {
            1.0
        } else {
            0.0
        }
    }
}

/// Ability estimation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EstimationMethod {
    /// Maximum likelihood (Fisher scoring).
    Mle,
    /// Maximum a posteriori with a normal prior.
    Map,
    /// Expected a posteriori over a quadrature grid.
    Eap,
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationMethod::Mle => write!(f, "MLE"),
            EstimationMethod::Map => write!(f, "MAP"),
            EstimationMethod::Eap => write!(f, "EAP"),
        }
    }
}

impl FromStr for EstimationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mle" => Ok(EstimationMethod::Mle),
            "map" => Ok(EstimationMethod::Map),
            "eap" => Ok(EstimationMethod::Eap),
            other => Err(format!("unknown estimation method: {other}")),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Terminated,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "ACTIVE"),
            SessionStatus::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    /// The standard error fell below the target.
    PrecisionMet,
    /// The maximum test length was reached.
    MaxItemsReached,
    /// The item selector had no candidate left.
    PoolExhausted,
    /// The controller stopped the session explicitly.
    ManualStop,
    /// A wall-clock limit elapsed.
    TimeLimitReached,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::PrecisionMet => "PRECISION_MET",
            TerminationReason::MaxItemsReached => "MAX_ITEMS_REACHED",
            TerminationReason::PoolExhausted => "POOL_EXHAUSTED",
            TerminationReason::ManualStop => "MANUAL_STOP",
            TerminationReason::TimeLimitReached => "TIME_LIMIT_REACHED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimation_method_display_and_parse() {
        assert_eq!(EstimationMethod::Eap.to_string(), "EAP");
        assert_eq!("mle".parse::<EstimationMethod>().unwrap(), EstimationMethod::Mle);
        assert_eq!("MAP".parse::<EstimationMethod>().unwrap(), EstimationMethod::Map);
        assert!("wle".parse::<EstimationMethod>().is_err());
    }

    #[test]
    fn enums_use_wire_names() {
        let json = serde_json::to_string(&TerminationReason::MaxItemsReached).unwrap();
        assert_eq!(json, "\"MAX_ITEMS_REACHED\"");
        let json = serde_json::to_string(&EstimationMethod::Map).unwrap();
        assert_eq!(json, "\"MAP\"");
        let status: SessionStatus = serde_json::from_str("\"TERMINATED\"").unwrap();
        assert_eq!(status, SessionStatus::Terminated);
    }

    #[test]
    fn clamped_repairs_degenerate_parameters() {
        let cal = Calibration {
            a: -0.5,
            b: 0.3,
            c: 1.2,
        }
        .clamped();
        assert_eq!(cal.a, MIN_DISCRIMINATION);
        assert_eq!(cal.b, 0.3);
        assert!(cal.c < 1.0);

        let cal = Calibration {
            a: f64::NAN,
            b: 0.0,
            c: -0.1,
        }
        .clamped();
        assert_eq!(cal.a, MIN_DISCRIMINATION);
        assert_eq!(cal.c, 0.0);
    }

    #[test]
    fn well_formed_parameters_are_untouched() {
        let item = ItemParams::new("q1", 1.4, -0.2, 0.25);
        assert!(item.calibration().is_well_formed());
        assert_eq!(item.sanitized(), item.calibration());
    }

    #[test]
    fn item_serde_omits_missing_content_area() {
        let item = ItemParams::new("q1", 1.0, 0.0, 0.0);
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("content_area"));
        let tagged = item.with_content_area("geometry");
        let back: ItemParams =
            serde_json::from_str(&serde_json::to_string(&tagged).unwrap()).unwrap();
        assert_eq!(back.content_area.as_deref(), Some("geometry"));
    }
}
