use super::error::{check_index, IndexKind};
use super::{DecisionModel, Dynamics, ModelError};

/// Fully observable constrained MDP for a single agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Cmdp {
    dynamics: Dynamics,
    initial_state: usize,
}

impl Cmdp {
    pub fn new(
        num_states: usize,
        num_actions: usize,
        initial_state: usize,
        num_decisions: usize,
    ) -> Result<Self, ModelError> {
        check_index(IndexKind::State, initial_state, num_states)?;
        Ok(Self {
            dynamics: Dynamics::new(num_states, num_actions, num_decisions)?,
            initial_state,
        })
    }

    pub fn initial_state(&self) -> usize {
        self.initial_state
    }
}

impl DecisionModel for Cmdp {
    fn dynamics(&self) -> &Dynamics {
        &self.dynamics
    }

    fn dynamics_mut(&mut self) -> &mut Dynamics {
        &mut self.dynamics
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.dynamics.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Component, Transition};

    #[test]
    fn initial_state_must_exist() {
        assert_eq!(
            Cmdp::new(2, 1, 2, 1),
            Err(ModelError::IndexOutOfRange {
                kind: IndexKind::State,
                index: 2,
                limit: 2
            })
        );
    }

    #[test]
    fn validate_requires_reward_and_transitions() {
        let mut cmdp = Cmdp::new(1, 1, 0, 1).unwrap();
        cmdp.set_reward_function(vec![vec![1.0]]).unwrap();
        assert_eq!(
            cmdp.validate(),
            Err(ModelError::Undefined(Component::Transitions))
        );
        cmdp.set_transitions(vec![vec![Transition::deterministic(0)]])
            .unwrap();
        assert_eq!(cmdp.validate(), Ok(()));
        assert_eq!(cmdp.reward_at(0, 0, 0), Ok(1.0));
    }
}
