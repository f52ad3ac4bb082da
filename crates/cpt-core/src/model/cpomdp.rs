use super::error::{check_distribution, check_index, Component, IndexKind};
use super::{DecisionModel, Dynamics, ModelError};
use crate::belief::BeliefPoint;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of one `Cpomdp` value; clones receive a fresh id.
///
/// Observation marginals memoised inside a belief are tagged with the id of
/// the model that computed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(u64);

impl ModelId {
    pub(crate) fn next() -> Self {
        ModelId(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Partially observable constrained MDP for a single agent.
///
/// The observation function is indexed `O[a][s'][o]`: the probability of
/// observing `o` after action `a` moved the agent into `s'`.
#[derive(Debug)]
pub struct Cpomdp {
    id: ModelId,
    dynamics: Dynamics,
    num_observations: usize,
    observations: Option<Vec<Vec<Vec<f64>>>>,
    initial_belief: BeliefPoint,
}

impl Cpomdp {
    pub fn new(
        num_states: usize,
        num_actions: usize,
        num_observations: usize,
        initial_belief: BeliefPoint,
        num_decisions: usize,
    ) -> Result<Self, ModelError> {
        let dynamics = Dynamics::new(num_states, num_actions, num_decisions)?;
        if num_observations == 0 {
            return Err(ModelError::shape(
                Component::Observations,
                "at least one observation is required",
            ));
        }
        let probabilities = initial_belief.probabilities();
        if probabilities.len() != num_states {
            return Err(ModelError::shape(
                Component::InitialBelief,
                format!("{} entries, expected {num_states}", probabilities.len()),
            ));
        }
        check_distribution(Component::InitialBelief, || "b0".into(), probabilities)?;
        Ok(Self {
            id: ModelId::next(),
            dynamics,
            num_observations,
            observations: None,
            initial_belief,
        })
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn num_observations(&self) -> usize {
        self.num_observations
    }

    pub fn initial_belief(&self) -> &BeliefPoint {
        &self.initial_belief
    }

    pub fn has_observations(&self) -> bool {
        self.observations.is_some()
    }

    pub fn set_observation_function(&mut self, table: Vec<Vec<Vec<f64>>>) -> Result<(), ModelError> {
        if self.observations.is_some() {
            return Err(ModelError::AlreadyDefined(Component::Observations));
        }
        let num_actions = self.dynamics.num_actions();
        let num_states = self.dynamics.num_states();
        if table.len() != num_actions {
            return Err(ModelError::shape(
                Component::Observations,
                format!("{} actions, expected {num_actions}", table.len()),
            ));
        }
        for (a, per_state) in table.iter().enumerate() {
            if per_state.len() != num_states {
                return Err(ModelError::shape(
                    Component::Observations,
                    format!("action {a} has {} states, expected {num_states}", per_state.len()),
                ));
            }
            for (s, row) in per_state.iter().enumerate() {
                if row.len() != self.num_observations {
                    return Err(ModelError::shape(
                        Component::Observations,
                        format!(
                            "a{a}/s{s} has {} observations, expected {}",
                            row.len(),
                            self.num_observations
                        ),
                    ));
                }
                check_distribution(Component::Observations, || format!("a{a}/s{s}"), row)?;
            }
        }
        self.observations = Some(table);
        Ok(())
    }

    /// Distribution over observations after `action` led into `next_state`.
    pub fn observation_row(&self, action: usize, next_state: usize) -> Result<&[f64], ModelError> {
        check_index(IndexKind::Action, action, self.dynamics.num_actions())?;
        check_index(IndexKind::State, next_state, self.dynamics.num_states())?;
        let table = self
            .observations
            .as_ref()
            .ok_or(ModelError::Undefined(Component::Observations))?;
        Ok(&table[action][next_state])
    }

    pub fn observation_probability(
        &self,
        action: usize,
        next_state: usize,
        observation: usize,
    ) -> Result<f64, ModelError> {
        let row = self.observation_row(action, next_state)?;
        check_index(IndexKind::Observation, observation, self.num_observations)?;
        Ok(row[observation])
    }
}

impl Clone for Cpomdp {
    fn clone(&self) -> Self {
        Self {
            id: ModelId::next(),
            dynamics: self.dynamics.clone(),
            num_observations: self.num_observations,
            observations: self.observations.clone(),
            initial_belief: self.initial_belief.clone(),
        }
    }
}

/// Equality compares tables only, never identities.
impl PartialEq for Cpomdp {
    fn eq(&self, other: &Self) -> bool {
        self.dynamics == other.dynamics
            && self.num_observations == other.num_observations
            && self.observations == other.observations
            && self.initial_belief == other.initial_belief
    }
}

impl DecisionModel for Cpomdp {
    fn dynamics(&self) -> &Dynamics {
        &self.dynamics
    }

    fn dynamics_mut(&mut self) -> &mut Dynamics {
        &mut self.dynamics
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.dynamics.validate()?;
        if self.observations.is_none() {
            return Err(ModelError::Undefined(Component::Observations));
        }
        Ok(())
    }
}
