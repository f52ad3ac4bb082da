use super::cache::BeliefKey;
use crate::model::error::{check_index, IndexKind};
use crate::model::{ModelError, ModelId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// `P(o | a, b)` for every action/observation pair, stored row-major by action.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationMarginals {
    num_actions: usize,
    num_observations: usize,
    values: Vec<f64>,
}

impl ObservationMarginals {
    pub(crate) fn zeroed(num_actions: usize, num_observations: usize) -> Self {
        Self {
            num_actions,
            num_observations,
            values: vec![0.0; num_actions * num_observations],
        }
    }

    pub(crate) fn add(&mut self, action: usize, observation: usize, mass: f64) {
        self.values[action * self.num_observations + observation] += mass;
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn num_observations(&self) -> usize {
        self.num_observations
    }

    pub fn probability(&self, action: usize, observation: usize) -> Option<f64> {
        if action >= self.num_actions || observation >= self.num_observations {
            return None;
        }
        self.values
            .get(action * self.num_observations + observation)
            .copied()
    }

    /// Observation distribution predicted for `action`.
    pub fn row(&self, action: usize) -> Option<&[f64]> {
        if action >= self.num_actions {
            return None;
        }
        let start = action * self.num_observations;
        self.values.get(start..start + self.num_observations)
    }
}

struct Inner {
    probabilities: Vec<f64>,
    marginals: OnceLock<(ModelId, Arc<ObservationMarginals>)>,
}

/// Distribution over hidden states.
///
/// The vector never changes after construction. Clones share one allocation,
/// so marginals prepared through any clone are visible to all of them. Only
/// the first model to prepare a belief memoises its marginals there; lookups
/// for any other model miss.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct BeliefPoint {
    inner: Arc<Inner>,
}

impl BeliefPoint {
    pub fn new(probabilities: Vec<f64>) -> Self {
        Self {
            inner: Arc::new(Inner {
                probabilities,
                marginals: OnceLock::new(),
            }),
        }
    }

    pub fn point_mass(num_states: usize, state: usize) -> Result<Self, ModelError> {
        check_index(IndexKind::State, state, num_states)?;
        let mut probabilities = vec![0.0; num_states];
        probabilities[state] = 1.0;
        Ok(Self::new(probabilities))
    }

    pub fn uniform(num_states: usize) -> Self {
        let weight = if num_states == 0 {
            0.0
        } else {
            1.0 / num_states as f64
        };
        Self::new(vec![weight; num_states])
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.inner.probabilities
    }

    pub fn get(&self, state: usize) -> Option<f64> {
        self.inner.probabilities.get(state).copied()
    }

    pub fn num_states(&self) -> usize {
        self.inner.probabilities.len()
    }

    /// Marginals `model` memoised in this belief or any clone of it.
    pub fn marginals_for(&self, model: ModelId) -> Option<&ObservationMarginals> {
        match self.inner.marginals.get() {
            Some((owner, marginals)) if *owner == model => Some(marginals.as_ref()),
            _ => None,
        }
    }

    /// Whether some model memoised its marginals here.
    pub fn is_prepared(&self) -> bool {
        self.inner.marginals.get().is_some()
    }

    pub fn is_prepared_for(&self, model: ModelId) -> bool {
        self.marginals_for(model).is_some()
    }

    /// Memoises `marginals` for `model` unless another table is already
    /// stored; returns the table belonging to `model`.
    pub(crate) fn install_marginals(
        &self,
        model: ModelId,
        marginals: Arc<ObservationMarginals>,
    ) -> Arc<ObservationMarginals> {
        let (owner, stored) = self
            .inner
            .marginals
            .get_or_init(|| (model, Arc::clone(&marginals)));
        if *owner == model {
            Arc::clone(stored)
        } else {
            marginals
        }
    }

    pub(crate) fn shared_marginals(&self, model: ModelId) -> Option<Arc<ObservationMarginals>> {
        match self.inner.marginals.get() {
            Some((owner, marginals)) if *owner == model => Some(Arc::clone(marginals)),
            _ => None,
        }
    }

    pub fn key(&self) -> BeliefKey {
        BeliefKey::from_probabilities(&self.inner.probabilities)
    }

    pub fn most_likely_state(&self) -> Option<usize> {
        self.inner
            .probabilities
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(state, _)| state)
    }
}

impl PartialEq for BeliefPoint {
    fn eq(&self, other: &Self) -> bool {
        self.inner.probabilities == other.inner.probabilities
    }
}

impl fmt::Debug for BeliefPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeliefPoint")
            .field("probabilities", &self.inner.probabilities)
            .field("prepared", &self.is_prepared())
            .finish()
    }
}

impl From<Vec<f64>> for BeliefPoint {
    fn from(probabilities: Vec<f64>) -> Self {
        Self::new(probabilities)
    }
}

impl From<BeliefPoint> for Vec<f64> {
    fn from(belief: BeliefPoint) -> Self {
        belief.inner.probabilities.clone()
    }
}
