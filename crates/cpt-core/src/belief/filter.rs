use super::cache::MarginalCache;
use super::point::{BeliefPoint, ObservationMarginals};
use super::BeliefError;
use crate::model::error::{check_index, Component, IndexKind};
use crate::model::{Cpomdp, DecisionModel, ModelError};
use serde::Serialize;
use std::sync::Arc;

impl Cpomdp {
    /// Computes `P(o | a, b)` for every action and observation.
    ///
    /// Requires a stationary transition kernel.
    pub fn compute_marginals(&self, belief: &BeliefPoint) -> Result<ObservationMarginals, ModelError> {
        self.check_filtering(belief)?;
        let num_actions = self.num_actions();
        let num_observations = self.num_observations();
        let mut marginals = ObservationMarginals::zeroed(num_actions, num_observations);

        for action in 0..num_actions {
            for (state, &prior) in belief.probabilities().iter().enumerate() {
                if prior <= 0.0 {
                    continue;
                }
                let transition = self.dynamics().stationary_transition(state, action)?;
                for (next_state, p) in transition.iter() {
                    let row = self.observation_row(action, next_state)?;
                    for (observation, &q) in row.iter().enumerate() {
                        marginals.add(action, observation, prior * p * q);
                    }
                }
            }
        }
        Ok(marginals)
    }

    /// Observation marginals of `belief` under this model.
    ///
    /// The first model to prepare a belief memoises its table inside it;
    /// repeated calls by that model are free.
    pub fn prepare_belief(&self, belief: &BeliefPoint) -> Result<Arc<ObservationMarginals>, ModelError> {
        if let Some(marginals) = belief.shared_marginals(self.id()) {
            return Ok(marginals);
        }
        let marginals = self.compute_marginals(belief)?;
        Ok(belief.install_marginals(self.id(), Arc::new(marginals)))
    }

    /// Posterior after taking `action` and observing `observation`.
    ///
    /// `belief` is left untouched; the posterior is a fresh, unprepared point.
    pub fn update_belief(
        &self,
        belief: &BeliefPoint,
        action: usize,
        observation: usize,
    ) -> Result<BeliefPoint, BeliefError> {
        self.check_update(action, observation)?;
        let marginals = self.prepare_belief(belief)?;
        self.posterior(belief, &marginals, action, observation)
    }

    fn check_update(&self, action: usize, observation: usize) -> Result<(), ModelError> {
        check_index(IndexKind::Action, action, self.num_actions())?;
        check_index(IndexKind::Observation, observation, self.num_observations())
    }

    /// Bayes update normalised by `marginals`, which must come from this model.
    fn posterior(
        &self,
        belief: &BeliefPoint,
        marginals: &ObservationMarginals,
        action: usize,
        observation: usize,
    ) -> Result<BeliefPoint, BeliefError> {
        let normalizer = marginals.probability(action, observation).unwrap_or(0.0);
        if !(normalizer > 0.0) {
            return Err(BeliefError::ImpossibleObservation {
                action,
                observation,
            });
        }

        let mut posterior = vec![0.0; self.num_states()];
        for (state, &prior) in belief.probabilities().iter().enumerate() {
            if prior <= 0.0 {
                continue;
            }
            let transition = self.dynamics().stationary_transition(state, action)?;
            for (next_state, p) in transition.iter() {
                let q = self.observation_probability(action, next_state, observation)?;
                posterior[next_state] += prior * p * q;
            }
        }
        for value in &mut posterior {
            *value /= normalizer;
        }
        Ok(BeliefPoint::new(posterior))
    }

    fn check_filtering(&self, belief: &BeliefPoint) -> Result<(), ModelError> {
        if self.dynamics().has_time_transitions() {
            return Err(ModelError::TimeIndexedFiltering);
        }
        if !self.has_observations() {
            return Err(ModelError::Undefined(Component::Observations));
        }
        if belief.num_states() != self.num_states() {
            return Err(ModelError::shape(
                Component::InitialBelief,
                format!(
                    "belief has {} entries, model has {} states",
                    belief.num_states(),
                    self.num_states()
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// Belief updates sharing marginals between equal beliefs.
///
/// Entries are keyed by model identity as well as belief contents, so one
/// filter may serve several models.
#[derive(Debug)]
pub struct BeliefFilter {
    cache: MarginalCache,
    hits: u64,
    misses: u64,
}

impl BeliefFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: MarginalCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn prepare(
        &mut self,
        model: &Cpomdp,
        belief: &BeliefPoint,
    ) -> Result<Arc<ObservationMarginals>, ModelError> {
        let id = model.id();
        if let Some(marginals) = belief.shared_marginals(id) {
            return Ok(marginals);
        }
        if self.cache.capacity() == 0 {
            return model.prepare_belief(belief);
        }
        let key = belief.key();
        if let Some(shared) = self.cache.get(id, &key) {
            self.hits += 1;
            return Ok(belief.install_marginals(id, shared));
        }
        self.misses += 1;
        let marginals = model.prepare_belief(belief)?;
        self.cache.insert(id, key, Arc::clone(&marginals));
        Ok(marginals)
    }

    pub fn update(
        &mut self,
        model: &Cpomdp,
        belief: &BeliefPoint,
        action: usize,
        observation: usize,
    ) -> Result<BeliefPoint, BeliefError> {
        model.check_update(action, observation)?;
        let marginals = self.prepare(model, belief)?;
        model.posterior(belief, &marginals, action, observation)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.cache.len(),
            capacity: self.cache.capacity(),
        }
    }

    pub fn reset(&mut self) {
        self.cache.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Transition;

    /// Two hidden states, one "stay" action and a noisy sensor (0.8 accurate).
    fn noisy_sensor() -> Cpomdp {
        let mut model = Cpomdp::new(2, 1, 2, BeliefPoint::uniform(2), 2).unwrap();
        model.set_reward_function(vec![vec![0.0], vec![1.0]]).unwrap();
        model
            .set_transitions(vec![
                vec![Transition::deterministic(0)],
                vec![Transition::deterministic(1)],
            ])
            .unwrap();
        model
            .set_observation_function(vec![vec![vec![0.8, 0.2], vec![0.2, 0.8]]])
            .unwrap();
        model
    }

    #[test]
    fn marginals_match_hand_computation() {
        let model = noisy_sensor();
        let belief = BeliefPoint::new(vec![0.25, 0.75]);
        let marginals = model.prepare_belief(&belief).unwrap();
        let p0 = 0.25 * 0.8 + 0.75 * 0.2;
        assert!((marginals.probability(0, 0).unwrap() - p0).abs() < 1e-12);
        assert!((marginals.probability(0, 1).unwrap() - (1.0 - p0)).abs() < 1e-12);
        assert!(belief.is_prepared_for(model.id()));
    }

    #[test]
    fn update_applies_bayes_rule() {
        let model = noisy_sensor();
        let prior = BeliefPoint::uniform(2);
        let posterior = model.update_belief(&prior, 0, 1).unwrap();
        assert!((posterior.probabilities()[1] - 0.8).abs() < 1e-12);
        assert!((posterior.probabilities()[0] - 0.2).abs() < 1e-12);
        assert_eq!(prior.probabilities(), &[0.5, 0.5]);
        assert!(!posterior.is_prepared());
    }

    #[test]
    fn impossible_observation_is_reported() {
        let mut model = Cpomdp::new(2, 1, 2, BeliefPoint::point_mass(2, 0).unwrap(), 1).unwrap();
        model.set_reward_function(vec![vec![0.0], vec![0.0]]).unwrap();
        model
            .set_transitions(vec![
                vec![Transition::deterministic(0)],
                vec![Transition::deterministic(1)],
            ])
            .unwrap();
        model
            .set_observation_function(vec![vec![vec![1.0, 0.0], vec![0.0, 1.0]]])
            .unwrap();
        let belief = BeliefPoint::point_mass(2, 0).unwrap();
        assert_eq!(
            model.update_belief(&belief, 0, 1),
            Err(BeliefError::ImpossibleObservation {
                action: 0,
                observation: 1
            })
        );
    }

    #[test]
    fn time_indexed_kernels_cannot_be_filtered() {
        let mut model = Cpomdp::new(1, 1, 1, BeliefPoint::uniform(1), 1).unwrap();
        model.set_reward_function(vec![vec![0.0]]).unwrap();
        model
            .set_time_transitions(vec![vec![vec![Transition::deterministic(0)]]])
            .unwrap();
        model.set_observation_function(vec![vec![vec![1.0]]]).unwrap();
        assert_eq!(
            model.prepare_belief(&BeliefPoint::uniform(1)).unwrap_err(),
            ModelError::TimeIndexedFiltering
        );
        assert_eq!(
            model.update_belief(&BeliefPoint::uniform(1), 0, 0),
            Err(BeliefError::Model(ModelError::TimeIndexedFiltering))
        );
    }

    #[test]
    fn filter_shares_marginals_between_equal_beliefs() {
        let model = noisy_sensor();
        let mut filter = BeliefFilter::new(8);
        let first = BeliefPoint::new(vec![0.4, 0.6]);
        let second = BeliefPoint::new(vec![0.4, 0.6]);
        filter.prepare(&model, &first).unwrap();
        filter.prepare(&model, &second).unwrap();
        filter.prepare(&model, &second).unwrap();
        let stats = filter.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(first.marginals_for(model.id()), second.marginals_for(model.id()));
    }

    #[test]
    fn disabled_filter_still_updates() {
        let model = noisy_sensor();
        let mut filter = BeliefFilter::new(0);
        let posterior = filter.update(&model, &BeliefPoint::uniform(2), 0, 0).unwrap();
        assert!((posterior.probabilities()[0] - 0.8).abs() < 1e-12);
        assert_eq!(filter.stats(), CacheStats::default());
    }

    /// Same dynamics as `noisy_sensor` with `sensor` as the observation row per state.
    fn with_sensor(initial: BeliefPoint, sensor: Vec<Vec<f64>>) -> Cpomdp {
        let mut model = Cpomdp::new(2, 1, 2, initial, 1).unwrap();
        model.set_reward_function(vec![vec![0.0], vec![0.0]]).unwrap();
        model
            .set_transitions(vec![
                vec![Transition::deterministic(0)],
                vec![Transition::deterministic(1)],
            ])
            .unwrap();
        model.set_observation_function(vec![sensor]).unwrap();
        model
    }

    #[test]
    fn shared_prior_is_filtered_per_model() {
        let prior = BeliefPoint::uniform(2);
        let perfect = with_sensor(prior.clone(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let blurred = with_sensor(prior.clone(), vec![vec![1.0, 0.0], vec![0.5, 0.5]]);

        let sharp = perfect.update_belief(perfect.initial_belief(), 0, 0).unwrap();
        assert_eq!(sharp.probabilities(), &[1.0, 0.0]);

        let posterior = blurred.update_belief(blurred.initial_belief(), 0, 0).unwrap();
        let total: f64 = posterior.probabilities().iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((posterior.probabilities()[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((posterior.probabilities()[1] - 1.0 / 3.0).abs() < 1e-12);
        assert!(prior.is_prepared_for(perfect.id()));
        assert!(!prior.is_prepared_for(blurred.id()));
    }

    #[test]
    fn one_filter_keeps_models_apart() {
        let prior = BeliefPoint::uniform(2);
        let perfect = with_sensor(prior.clone(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let blurred = with_sensor(prior.clone(), vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
        let mut filter = BeliefFilter::new(8);

        filter.update(&perfect, &prior, 0, 0).unwrap();
        let posterior = filter.update(&blurred, &BeliefPoint::uniform(2), 0, 0).unwrap();
        assert!((posterior.probabilities()[0] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(filter.stats().misses, 2);
        assert_eq!(filter.stats().entries, 2);
    }

    #[test]
    fn cloned_model_does_not_reuse_original_marginals() {
        let model = noisy_sensor();
        let copy = model.clone();
        let belief = BeliefPoint::new(vec![0.25, 0.75]);
        model.prepare_belief(&belief).unwrap();
        assert!(!belief.is_prepared_for(copy.id()));
        let ours = copy.prepare_belief(&belief).unwrap();
        assert_eq!(Some(ours.as_ref()), belief.marginals_for(model.id()));
    }

    #[test]
    fn belief_length_must_match_model() {
        let model = noisy_sensor();
        assert!(matches!(
            model.prepare_belief(&BeliefPoint::uniform(3)),
            Err(ModelError::InvalidShape { .. })
        ));
    }
}
