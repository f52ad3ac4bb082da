//! Reward, transition, cost and feasibility tables shared by CMDP and CPOMDP agents.

use super::error::{check_distribution, check_index, Component, IndexKind, ModelError};
use crate::sample::{sample_parallel, Draw, SamplingError};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Successor distribution for one `(state, action)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    destinations: Vec<usize>,
    probabilities: Vec<f64>,
}

impl Transition {
    pub fn new(destinations: Vec<usize>, probabilities: Vec<f64>) -> Self {
        Self {
            destinations,
            probabilities,
        }
    }

    pub fn deterministic(destination: usize) -> Self {
        Self::new(vec![destination], vec![1.0])
    }

    pub fn destinations(&self) -> &[usize] {
        &self.destinations
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.destinations
            .iter()
            .copied()
            .zip(self.probabilities.iter().copied())
    }

    /// Probability of reaching `destination`, summing duplicate entries.
    pub fn probability_of(&self, destination: usize) -> f64 {
        self.iter()
            .filter(|(dest, _)| *dest == destination)
            .map(|(_, p)| p)
            .sum()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Draw<usize>, SamplingError> {
        sample_parallel(&self.destinations, &self.probabilities, rng).map(|draw| draw.map(|d| *d))
    }

    fn validate(&self, num_states: usize, row: impl Fn() -> String) -> Result<(), ModelError> {
        if self.destinations.len() != self.probabilities.len() {
            return Err(ModelError::shape(
                Component::Transitions,
                format!(
                    "row {} pairs {} destinations with {} probabilities",
                    row(),
                    self.destinations.len(),
                    self.probabilities.len()
                ),
            ));
        }
        if self.destinations.is_empty() {
            return Err(ModelError::shape(
                Component::Transitions,
                format!("row {} has no destinations", row()),
            ));
        }
        for &dest in &self.destinations {
            check_index(IndexKind::State, dest, num_states)?;
        }
        check_distribution(Component::Transitions, &row, &self.probabilities)
    }
}

/// Reward table; the nesting depth alone tells the representations apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RewardFunction {
    /// `R[s][a]`
    Stationary(Vec<Vec<f64>>),
    /// `R[t][s][a]`
    TimeIndexed(Vec<Vec<Vec<f64>>>),
}

impl RewardFunction {
    pub fn is_time_indexed(&self) -> bool {
        matches!(self, RewardFunction::TimeIndexed(_))
    }

    fn value(&self, epoch: usize, state: usize, action: usize) -> f64 {
        match self {
            RewardFunction::Stationary(table) => table[state][action],
            RewardFunction::TimeIndexed(table) => table[epoch][state][action],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionFunction {
    /// `T[s][a]`
    Stationary(Vec<Vec<Transition>>),
    /// `T[t][s][a]`
    TimeIndexed(Vec<Vec<Vec<Transition>>>),
}

impl TransitionFunction {
    pub fn is_time_indexed(&self) -> bool {
        matches!(self, TransitionFunction::TimeIndexed(_))
    }

    fn entry(&self, epoch: usize, state: usize, action: usize) -> &Transition {
        match self {
            TransitionFunction::Stationary(table) => &table[state][action],
            TransitionFunction::TimeIndexed(table) => &table[epoch][state][action],
        }
    }
}

/// Tables common to both model kinds.
///
/// Every setter checks the shape and probability sums of its table before
/// storing it, so accessors only have to check their own indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Dynamics {
    num_states: usize,
    num_actions: usize,
    num_decisions: usize,
    reward: Option<RewardFunction>,
    transitions: Option<TransitionFunction>,
    costs: Option<Vec<Vec<Vec<f64>>>>,
    feasible_actions: Option<Vec<Vec<Vec<usize>>>>,
    all_actions: Vec<usize>,
}

impl Dynamics {
    pub fn new(
        num_states: usize,
        num_actions: usize,
        num_decisions: usize,
    ) -> Result<Self, ModelError> {
        if num_states == 0 || num_actions == 0 || num_decisions == 0 {
            return Err(ModelError::shape(
                Component::Transitions,
                format!(
                    "dimensions must be positive (states {num_states}, actions {num_actions}, decisions {num_decisions})"
                ),
            ));
        }
        Ok(Self {
            num_states,
            num_actions,
            num_decisions,
            reward: None,
            transitions: None,
            costs: None,
            feasible_actions: None,
            all_actions: (0..num_actions).collect(),
        })
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn num_decisions(&self) -> usize {
        self.num_decisions
    }

    pub fn reward_function(&self) -> Option<&RewardFunction> {
        self.reward.as_ref()
    }

    pub fn transition_function(&self) -> Option<&TransitionFunction> {
        self.transitions.as_ref()
    }

    pub fn has_time_transitions(&self) -> bool {
        self.transitions
            .as_ref()
            .is_some_and(TransitionFunction::is_time_indexed)
    }

    pub fn has_costs(&self) -> bool {
        self.costs.is_some()
    }

    pub fn set_reward_function(&mut self, table: Vec<Vec<f64>>) -> Result<(), ModelError> {
        self.ensure_unset(self.reward.is_some(), Component::Reward)?;
        self.check_state_action_table(Component::Reward, &table, "")?;
        self.reward = Some(RewardFunction::Stationary(table));
        Ok(())
    }

    pub fn set_time_reward_function(&mut self, table: Vec<Vec<Vec<f64>>>) -> Result<(), ModelError> {
        self.ensure_unset(self.reward.is_some(), Component::Reward)?;
        self.check_epochs(Component::Reward, table.len())?;
        for (t, layer) in table.iter().enumerate() {
            self.check_state_action_table(Component::Reward, layer, &format!("epoch {t}, "))?;
        }
        self.reward = Some(RewardFunction::TimeIndexed(table));
        Ok(())
    }

    /// Installs a reward function in either representation.
    pub fn set_reward(&mut self, reward: RewardFunction) -> Result<(), ModelError> {
        match reward {
            RewardFunction::Stationary(table) => self.set_reward_function(table),
            RewardFunction::TimeIndexed(table) => self.set_time_reward_function(table),
        }
    }

    pub fn set_transitions(&mut self, table: Vec<Vec<Transition>>) -> Result<(), ModelError> {
        self.ensure_unset(self.transitions.is_some(), Component::Transitions)?;
        self.check_transition_layer(&table, None)?;
        self.transitions = Some(TransitionFunction::Stationary(table));
        Ok(())
    }

    pub fn set_time_transitions(
        &mut self,
        table: Vec<Vec<Vec<Transition>>>,
    ) -> Result<(), ModelError> {
        self.ensure_unset(self.transitions.is_some(), Component::Transitions)?;
        self.check_epochs(Component::Transitions, table.len())?;
        for (t, layer) in table.iter().enumerate() {
            self.check_transition_layer(layer, Some(t))?;
        }
        self.transitions = Some(TransitionFunction::TimeIndexed(table));
        Ok(())
    }

    pub fn set_transition_function(
        &mut self,
        transitions: TransitionFunction,
    ) -> Result<(), ModelError> {
        match transitions {
            TransitionFunction::Stationary(table) => self.set_transitions(table),
            TransitionFunction::TimeIndexed(table) => self.set_time_transitions(table),
        }
    }

    /// Installs `cost[k][s][a]` for every domain resource `k`.
    pub fn set_cost_functions(&mut self, costs: Vec<Vec<Vec<f64>>>) -> Result<(), ModelError> {
        self.ensure_unset(self.costs.is_some(), Component::Costs)?;
        for (k, table) in costs.iter().enumerate() {
            self.check_state_action_table(Component::Costs, table, &format!("resource {k}, "))?;
        }
        self.costs = Some(costs);
        Ok(())
    }

    /// Installs `feasible[t][s]`; without it every action is feasible.
    pub fn set_feasible_actions(&mut self, feasible: Vec<Vec<Vec<usize>>>) -> Result<(), ModelError> {
        self.ensure_unset(self.feasible_actions.is_some(), Component::FeasibleActions)?;
        self.check_epochs(Component::FeasibleActions, feasible.len())?;
        for (t, layer) in feasible.iter().enumerate() {
            if layer.len() != self.num_states {
                return Err(ModelError::shape(
                    Component::FeasibleActions,
                    format!("epoch {t} has {} states, expected {}", layer.len(), self.num_states),
                ));
            }
            for (s, actions) in layer.iter().enumerate() {
                if actions.is_empty() {
                    return Err(ModelError::shape(
                        Component::FeasibleActions,
                        format!("epoch {t}, state {s} has no feasible action"),
                    ));
                }
                for &a in actions {
                    check_index(IndexKind::Action, a, self.num_actions)?;
                }
            }
        }
        self.feasible_actions = Some(feasible);
        Ok(())
    }

    pub fn reward_at(&self, epoch: usize, state: usize, action: usize) -> Result<f64, ModelError> {
        self.check_query(epoch, state, action)?;
        let reward = self
            .reward
            .as_ref()
            .ok_or(ModelError::Undefined(Component::Reward))?;
        Ok(reward.value(epoch, state, action))
    }

    pub fn transition_at(
        &self,
        epoch: usize,
        state: usize,
        action: usize,
    ) -> Result<&Transition, ModelError> {
        self.check_query(epoch, state, action)?;
        let transitions = self
            .transitions
            .as_ref()
            .ok_or(ModelError::Undefined(Component::Transitions))?;
        Ok(transitions.entry(epoch, state, action))
    }

    /// Epoch-free access used by belief filtering.
    pub fn stationary_transition(&self, state: usize, action: usize) -> Result<&Transition, ModelError> {
        check_index(IndexKind::State, state, self.num_states)?;
        check_index(IndexKind::Action, action, self.num_actions)?;
        match self.transitions.as_ref() {
            Some(TransitionFunction::Stationary(table)) => Ok(&table[state][action]),
            Some(TransitionFunction::TimeIndexed(_)) => Err(ModelError::TimeIndexedFiltering),
            None => Err(ModelError::Undefined(Component::Transitions)),
        }
    }

    pub fn cost_at(&self, resource: usize, state: usize, action: usize) -> Result<f64, ModelError> {
        let costs = self.costs_table()?;
        check_index(IndexKind::Resource, resource, costs.len())?;
        check_index(IndexKind::State, state, self.num_states)?;
        check_index(IndexKind::Action, action, self.num_actions)?;
        Ok(costs[resource][state][action])
    }

    pub fn num_domain_resources(&self) -> Result<usize, ModelError> {
        self.costs_table().map(Vec::len)
    }

    /// Smallest and largest cost of `resource` over all state-action pairs.
    pub fn cost_range(&self, resource: usize) -> Result<(f64, f64), ModelError> {
        let costs = self.costs_table()?;
        check_index(IndexKind::Resource, resource, costs.len())?;
        let range = costs[resource]
            .iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &c| {
                (lo.min(c), hi.max(c))
            });
        Ok(range)
    }

    pub fn feasible_actions_at(&self, epoch: usize, state: usize) -> Result<&[usize], ModelError> {
        self.check_epoch(epoch)?;
        check_index(IndexKind::State, state, self.num_states)?;
        match self.feasible_actions.as_ref() {
            Some(table) => Ok(&table[epoch][state]),
            None => Ok(&self.all_actions),
        }
    }

    /// Checks that the components every evaluation needs are present.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.reward.is_none() {
            return Err(ModelError::Undefined(Component::Reward));
        }
        if self.transitions.is_none() {
            return Err(ModelError::Undefined(Component::Transitions));
        }
        Ok(())
    }

    pub(crate) fn check_epoch(&self, epoch: usize) -> Result<(), ModelError> {
        if epoch < self.num_decisions {
            Ok(())
        } else {
            Err(ModelError::EpochOutOfRange {
                epoch,
                num_decisions: self.num_decisions,
            })
        }
    }

    fn costs_table(&self) -> Result<&Vec<Vec<Vec<f64>>>, ModelError> {
        self.costs
            .as_ref()
            .ok_or(ModelError::Undefined(Component::Costs))
    }

    fn check_query(&self, epoch: usize, state: usize, action: usize) -> Result<(), ModelError> {
        self.check_epoch(epoch)?;
        check_index(IndexKind::State, state, self.num_states)?;
        check_index(IndexKind::Action, action, self.num_actions)
    }

    fn ensure_unset(&self, defined: bool, component: Component) -> Result<(), ModelError> {
        if defined {
            Err(ModelError::AlreadyDefined(component))
        } else {
            Ok(())
        }
    }

    fn check_epochs(&self, component: Component, found: usize) -> Result<(), ModelError> {
        if found == self.num_decisions {
            Ok(())
        } else {
            Err(ModelError::shape(
                component,
                format!("{found} epochs, expected {}", self.num_decisions),
            ))
        }
    }

    fn check_state_action_table(
        &self,
        component: Component,
        table: &[Vec<f64>],
        prefix: &str,
    ) -> Result<(), ModelError> {
        if table.len() != self.num_states {
            return Err(ModelError::shape(
                component,
                format!("{prefix}{} states, expected {}", table.len(), self.num_states),
            ));
        }
        for (s, row) in table.iter().enumerate() {
            if row.len() != self.num_actions {
                return Err(ModelError::shape(
                    component,
                    format!(
                        "{prefix}state {s} has {} actions, expected {}",
                        row.len(),
                        self.num_actions
                    ),
                ));
            }
            if let Some(value) = row.iter().find(|v| !v.is_finite()) {
                return Err(ModelError::shape(
                    component,
                    format!("{prefix}state {s} holds non-finite value {value}"),
                ));
            }
        }
        Ok(())
    }

    fn check_transition_layer(
        &self,
        layer: &[Vec<Transition>],
        epoch: Option<usize>,
    ) -> Result<(), ModelError> {
        let prefix = epoch.map(|t| format!("epoch {t}, ")).unwrap_or_default();
        if layer.len() != self.num_states {
            return Err(ModelError::shape(
                Component::Transitions,
                format!("{prefix}{} states, expected {}", layer.len(), self.num_states),
            ));
        }
        for (s, row) in layer.iter().enumerate() {
            if row.len() != self.num_actions {
                return Err(ModelError::shape(
                    Component::Transitions,
                    format!(
                        "{prefix}state {s} has {} actions, expected {}",
                        row.len(),
                        self.num_actions
                    ),
                ));
            }
            for (a, transition) in row.iter().enumerate() {
                transition.validate(self.num_states, || format!("{prefix}s{s}/a{a}"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn two_state() -> Dynamics {
        let mut dynamics = Dynamics::new(2, 2, 3).unwrap();
        dynamics
            .set_reward_function(vec![vec![0.0, 0.0], vec![0.0, 10.0]])
            .unwrap();
        dynamics
            .set_transitions(vec![
                vec![
                    Transition::deterministic(0),
                    Transition::new(vec![0, 1], vec![0.1, 0.9]),
                ],
                vec![Transition::deterministic(1), Transition::deterministic(1)],
            ])
            .unwrap();
        dynamics
    }

    #[test]
    fn stationary_tables_ignore_epoch() {
        let dynamics = two_state();
        for epoch in 0..3 {
            assert_eq!(dynamics.reward_at(epoch, 1, 1), Ok(10.0));
            assert_eq!(
                dynamics.transition_at(epoch, 0, 1).unwrap().probability_of(1),
                0.9
            );
        }
    }

    #[test]
    fn time_indexed_reward_dispatches_on_epoch() {
        let mut dynamics = Dynamics::new(1, 1, 2).unwrap();
        dynamics
            .set_time_reward_function(vec![vec![vec![1.0]], vec![vec![5.0]]])
            .unwrap();
        assert_eq!(dynamics.reward_at(0, 0, 0), Ok(1.0));
        assert_eq!(dynamics.reward_at(1, 0, 0), Ok(5.0));
        assert!(dynamics.reward_function().unwrap().is_time_indexed());
    }

    #[test]
    fn epoch_is_checked_even_for_stationary_tables() {
        let dynamics = two_state();
        assert_eq!(
            dynamics.reward_at(3, 0, 0),
            Err(ModelError::EpochOutOfRange {
                epoch: 3,
                num_decisions: 3
            })
        );
        assert!(matches!(
            dynamics.feasible_actions_at(7, 0),
            Err(ModelError::EpochOutOfRange { .. })
        ));
    }

    #[test]
    fn undefined_components_are_reported() {
        let dynamics = Dynamics::new(2, 2, 1).unwrap();
        assert_eq!(
            dynamics.reward_at(0, 0, 0),
            Err(ModelError::Undefined(Component::Reward))
        );
        assert_eq!(
            dynamics.transition_at(0, 0, 0),
            Err(ModelError::Undefined(Component::Transitions))
        );
        assert_eq!(
            dynamics.cost_at(0, 0, 0),
            Err(ModelError::Undefined(Component::Costs))
        );
        assert_eq!(
            dynamics.validate(),
            Err(ModelError::Undefined(Component::Reward))
        );
    }

    #[test]
    fn second_definition_is_rejected() {
        let mut dynamics = two_state();
        assert_eq!(
            dynamics.set_time_reward_function(vec![vec![vec![0.0; 2]; 2]; 3]),
            Err(ModelError::AlreadyDefined(Component::Reward))
        );
        assert_eq!(dynamics.reward_at(0, 1, 1), Ok(10.0));
    }

    #[test]
    fn transition_rows_must_sum_to_one() {
        let mut dynamics = Dynamics::new(2, 1, 1).unwrap();
        let err = dynamics
            .set_transitions(vec![
                vec![Transition::new(vec![0, 1], vec![0.5, 0.4])],
                vec![Transition::deterministic(1)],
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidDistribution {
                component: Component::Transitions,
                ..
            }
        ));
        assert!(dynamics.transition_function().is_none());
    }

    #[test]
    fn transition_destinations_are_range_checked() {
        let mut dynamics = Dynamics::new(2, 1, 1).unwrap();
        let err = dynamics
            .set_transitions(vec![
                vec![Transition::deterministic(2)],
                vec![Transition::deterministic(0)],
            ])
            .unwrap_err();
        assert_eq!(err, ModelError::index(IndexKind::State, 2, 2));
    }

    #[test]
    fn mismatched_parallel_sequences_are_rejected() {
        let mut dynamics = Dynamics::new(1, 1, 1).unwrap();
        let err = dynamics
            .set_transitions(vec![vec![Transition::new(vec![0], vec![0.5, 0.5])]])
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidShape { .. }));
    }

    #[test]
    fn stationary_access_refuses_time_indexed_kernels() {
        let mut dynamics = Dynamics::new(1, 1, 2).unwrap();
        dynamics
            .set_time_transitions(vec![
                vec![vec![Transition::deterministic(0)]],
                vec![vec![Transition::deterministic(0)]],
            ])
            .unwrap();
        assert_eq!(
            dynamics.stationary_transition(0, 0),
            Err(ModelError::TimeIndexedFiltering)
        );
        assert!(dynamics.transition_at(1, 0, 0).is_ok());
    }

    #[test]
    fn costs_expose_ranges_and_resource_count() {
        let mut dynamics = two_state();
        dynamics
            .set_cost_functions(vec![
                vec![vec![3.0, 1.0], vec![0.0, 0.5]],
                vec![vec![-1.0, 2.0], vec![4.0, 0.0]],
            ])
            .unwrap();
        assert_eq!(dynamics.num_domain_resources(), Ok(2));
        assert_eq!(dynamics.cost_at(1, 1, 0), Ok(4.0));
        assert_eq!(dynamics.cost_range(0), Ok((0.0, 3.0)));
        assert_eq!(dynamics.cost_range(1), Ok((-1.0, 4.0)));
        assert_eq!(
            dynamics.cost_at(2, 0, 0),
            Err(ModelError::index(IndexKind::Resource, 2, 2))
        );
    }

    #[test]
    fn feasible_actions_default_to_every_action() {
        let mut dynamics = two_state();
        assert_eq!(dynamics.feasible_actions_at(2, 1), Ok(&[0usize, 1][..]));
        dynamics
            .set_feasible_actions(vec![vec![vec![1], vec![0, 1]]; 3])
            .unwrap();
        assert_eq!(dynamics.feasible_actions_at(0, 0), Ok(&[1usize][..]));
    }

    #[test]
    fn empty_feasible_sets_are_rejected() {
        let mut dynamics = two_state();
        let err = dynamics
            .set_feasible_actions(vec![vec![vec![], vec![0]]; 3])
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidShape {
                component: Component::FeasibleActions,
                ..
            }
        ));
    }

    #[test]
    fn transition_sampling_respects_support() {
        let transition = Transition::new(vec![4, 2], vec![0.0, 1.0]);
        let mut rng = SmallRng::seed_from_u64(17);
        for _ in 0..50 {
            assert_eq!(transition.sample(&mut rng).unwrap().into_item(), 2);
        }
    }

    #[test]
    fn reward_representation_follows_nesting_depth() {
        let stationary: RewardFunction = serde_json::from_str("[[1.0, 2.0]]").unwrap();
        assert!(!stationary.is_time_indexed());
        let timed: RewardFunction = serde_json::from_str("[[[1.0, 2.0]], [[3.0, 4.0]]]").unwrap();
        assert!(timed.is_time_indexed());
    }

    #[test]
    fn transition_entries_deserialize_from_named_fields() {
        let json = r#"[[[{"destinations": [0], "probabilities": [1.0]}]]]"#;
        let function: TransitionFunction = serde_json::from_str(json).unwrap();
        assert!(function.is_time_indexed());
        let flat = r#"[[{"destinations": [0, 1], "probabilities": [0.5, 0.5]}]]"#;
        let function: TransitionFunction = serde_json::from_str(flat).unwrap();
        assert_eq!(
            function,
            TransitionFunction::Stationary(vec![vec![Transition::new(vec![0, 1], vec![0.5, 0.5])]])
        );
    }
}
