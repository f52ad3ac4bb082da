//! Exact Bayesian belief tracking for partially observable agents.
//!
//! This module is composed of:
//! - `point`: immutable belief vectors carrying memoised observation marginals.
//! - `filter`: marginal preparation and posterior updates on `Cpomdp`, plus the cached `BeliefFilter`.
//! - `cache`: content-addressed marginals cache keyed by exact belief bits.
//! - `telemetry`: entropy summaries for logging.

mod cache;
mod filter;
mod point;
pub mod telemetry;

pub use cache::{BeliefKey, MarginalCache};
pub use filter::{BeliefFilter, CacheStats};
pub use point::{BeliefPoint, ObservationMarginals};

use crate::model::ModelError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BeliefError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("observation {observation} has zero probability after action {action}")]
    ImpossibleObservation { action: usize, observation: usize },
}
