//! Table-driven per-agent policies indexed by epoch and state.

use crate::oracle::joint::{MdpAgentPolicy, PomdpAgentPolicy};
use crate::oracle::OracleError;
use cpt_core::belief::BeliefPoint;
use cpt_core::model::DecisionModel;
use cpt_core::sample::{sample_index, SamplingError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `pi[t][s]` lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterministicPolicy {
    actions: Vec<Vec<usize>>,
}

impl DeterministicPolicy {
    pub fn new(actions: Vec<Vec<usize>>) -> Self {
        Self { actions }
    }

    /// Plays `action` in every state of every epoch.
    pub fn constant(action: usize, num_decisions: usize, num_states: usize) -> Self {
        Self::new(vec![vec![action; num_states]; num_decisions])
    }

    /// Checks dimensions and that every prescribed action is feasible in `model`.
    pub fn validate_for<M: DecisionModel>(&self, model: &M) -> Result<(), OracleError> {
        if self.actions.len() != model.num_decisions() {
            return Err(OracleError::InvalidPolicy(format!(
                "{} epochs, model has {}",
                self.actions.len(),
                model.num_decisions()
            )));
        }
        for (epoch, row) in self.actions.iter().enumerate() {
            if row.len() != model.num_states() {
                return Err(OracleError::InvalidPolicy(format!(
                    "epoch {epoch} covers {} states, model has {}",
                    row.len(),
                    model.num_states()
                )));
            }
            for (state, action) in row.iter().enumerate() {
                let feasible = model
                    .feasible_actions_at(epoch, state)
                    .map_err(|err| OracleError::InvalidPolicy(err.to_string()))?;
                if !feasible.contains(action) {
                    return Err(OracleError::InvalidPolicy(format!(
                        "action {action} is not feasible at epoch {epoch}, state {state}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl MdpAgentPolicy for DeterministicPolicy {
    fn action(&mut self, epoch: usize, state: usize) -> Result<usize, OracleError> {
        self.actions
            .get(epoch)
            .and_then(|row| row.get(state))
            .copied()
            .ok_or(OracleError::Undefined { epoch, state })
    }
}

/// `x[t][s][a]` action weights, normalised per epoch and state at construction.
#[derive(Debug, Clone)]
pub struct StochasticPolicy {
    weights: Vec<Vec<Vec<f64>>>,
    rng: StdRng,
}

impl StochasticPolicy {
    /// Negative weights are clamped to zero before normalising.
    pub fn new(mut weights: Vec<Vec<Vec<f64>>>, seed: u64) -> Result<Self, OracleError> {
        for (epoch, layer) in weights.iter_mut().enumerate() {
            for (state, row) in layer.iter_mut().enumerate() {
                row.iter_mut().for_each(|w| *w = w.max(0.0));
                let total: f64 = row.iter().sum();
                if !(total > 0.0) || !total.is_finite() {
                    return Err(OracleError::InvalidPolicy(format!(
                        "no positive action weight at epoch {epoch}, state {state}"
                    )));
                }
                row.iter_mut().for_each(|w| *w = (*w / total).clamp(0.0, 1.0));
            }
        }
        Ok(Self {
            weights,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn distribution(&self, epoch: usize, state: usize) -> Option<&[f64]> {
        self.weights
            .get(epoch)
            .and_then(|layer| layer.get(state))
            .map(Vec::as_slice)
    }
}

impl MdpAgentPolicy for StochasticPolicy {
    fn action(&mut self, epoch: usize, state: usize) -> Result<usize, OracleError> {
        let row = self
            .weights
            .get(epoch)
            .and_then(|layer| layer.get(state))
            .ok_or(OracleError::Undefined { epoch, state })?;
        sample_index(row, &mut self.rng)
            .map(|draw| draw.into_item())
            .map_err(|err: SamplingError| OracleError::InvalidPolicy(err.to_string()))
    }
}

/// Uniform choice among a model's feasible actions.
#[derive(Debug, Clone)]
pub struct UniformFeasiblePolicy {
    feasible: Vec<Vec<Vec<usize>>>,
    num_actions: usize,
    rng: StdRng,
}

impl UniformFeasiblePolicy {
    pub fn for_model<M: DecisionModel>(model: &M, seed: u64) -> Result<Self, OracleError> {
        let mut feasible = Vec::with_capacity(model.num_decisions());
        for epoch in 0..model.num_decisions() {
            let layer = (0..model.num_states())
                .map(|state| {
                    model
                        .feasible_actions_at(epoch, state)
                        .map(<[usize]>::to_vec)
                        .map_err(|err| OracleError::InvalidPolicy(err.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            feasible.push(layer);
        }
        Ok(Self {
            feasible,
            num_actions: model.num_actions(),
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

impl MdpAgentPolicy for UniformFeasiblePolicy {
    fn action(&mut self, epoch: usize, state: usize) -> Result<usize, OracleError> {
        let actions = self
            .feasible
            .get(epoch)
            .and_then(|layer| layer.get(state))
            .filter(|actions| !actions.is_empty())
            .ok_or(OracleError::Undefined { epoch, state })?;
        Ok(actions[self.rng.gen_range(0..actions.len())])
    }
}

/// Without a known state the choice ranges over every action of the model.
impl PomdpAgentPolicy for UniformFeasiblePolicy {
    fn action(&mut self, epoch: usize, _belief: &BeliefPoint) -> Result<usize, OracleError> {
        if epoch >= self.feasible.len() || self.num_actions == 0 {
            return Err(OracleError::NoAction { epoch });
        }
        Ok(self.rng.gen_range(0..self.num_actions))
    }
}
