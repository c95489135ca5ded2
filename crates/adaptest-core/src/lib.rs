//! adaptest-core — Computerized adaptive testing on the 3PL IRT model.
//!
//! This crate holds the item response model, the ability estimators, item
//! selection, stopping rules and the per-examinee session state. Persistence
//! and transport belong to the host; see the [`traits`] module for the
//! boundaries.

pub mod bank;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod irt;
pub mod model;
pub mod parser;
pub mod scale;
pub mod selection;
pub mod session;
pub mod simulation;
pub mod termination;
pub mod traits;

pub use error::CatError;
pub use model::{EstimationMethod, ItemParams, SessionStatus, TerminationReason};
pub use session::Session;
