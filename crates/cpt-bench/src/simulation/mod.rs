//! Monte-Carlo evaluation of joint policies on CMDP and CPOMDP instances.

mod cmdp;
mod cpomdp;
pub mod external;
mod stats;

pub use cmdp::CmdpEvaluator;
pub use cpomdp::CpomdpEvaluator;
pub use stats::{EvaluationStatistics, RunningMoments};

use cpt_core::belief::BeliefError;
use cpt_core::model::{DecisionModel, ModelError};
use cpt_core::sample::SamplingError;
use cpt_policy::OracleError;
use serde::Serialize;
use thiserror::Error;

/// Any failure aborts the whole `run` call; nothing partial is committed.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("belief update failed: {0}")]
    Belief(#[from] BeliefError),
    #[error("sampling failed: {0}")]
    Sampling(#[from] SamplingError),
    #[error("oracle failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("oracle returned {found} actions for {expected} agents")]
    JointActionLength { expected: usize, found: usize },
    #[error("agent {agent} was given action {action}, model has {num_actions} actions")]
    ActionOutOfRange {
        agent: usize,
        action: usize,
        num_actions: usize,
    },
    #[error("number of runs must be greater than zero")]
    NoRuns,
    #[error("run sink failed: {0}")]
    Sink(String),
}

/// Outcome of one simulated trajectory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run: usize,
    /// Joint reward summed over agents and epochs.
    pub reward: f64,
    /// `total_costs[k]`, summed over agents and epochs.
    pub total_costs: Vec<f64>,
    /// `epoch_costs[k][t]`, summed over agents.
    pub epoch_costs: Vec<Vec<f64>>,
    /// Whether resource `k` broke its limit under the active regime.
    pub violated: Vec<bool>,
    pub sampler_fallbacks: u64,
}

/// Receives each completed trajectory as soon as it finishes.
pub trait RunSink {
    fn record(&mut self, record: &RunRecord) -> Result<(), EvaluationError>;
}

impl RunSink for () {
    fn record(&mut self, _record: &RunRecord) -> Result<(), EvaluationError> {
        Ok(())
    }
}

impl RunSink for Vec<RunRecord> {
    fn record(&mut self, record: &RunRecord) -> Result<(), EvaluationError> {
        self.push(record.clone());
        Ok(())
    }
}

fn check_joint_action<M: DecisionModel>(
    actions: &[usize],
    models: &[M],
) -> Result<(), EvaluationError> {
    if actions.len() != models.len() {
        return Err(EvaluationError::JointActionLength {
            expected: models.len(),
            found: actions.len(),
        });
    }
    for (agent, (&action, model)) in actions.iter().zip(models).enumerate() {
        if action >= model.num_actions() {
            return Err(EvaluationError::ActionOutOfRange {
                agent,
                action,
                num_actions: model.num_actions(),
            });
        }
    }
    Ok(())
}
