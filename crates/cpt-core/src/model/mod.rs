pub mod cmdp;
pub mod cpomdp;
pub mod dynamics;
pub mod error;

pub use cmdp::Cmdp;
pub use cpomdp::{Cpomdp, ModelId};
pub use dynamics::{Dynamics, RewardFunction, Transition, TransitionFunction};
pub use error::{Component, IndexKind, ModelError, DISTRIBUTION_TOLERANCE};

/// Contract shared by fully and partially observable agent models.
pub trait DecisionModel {
    fn dynamics(&self) -> &Dynamics;

    fn dynamics_mut(&mut self) -> &mut Dynamics;

    /// Checks the model is complete enough to be simulated.
    fn validate(&self) -> Result<(), ModelError>;

    fn num_states(&self) -> usize {
        self.dynamics().num_states()
    }

    fn num_actions(&self) -> usize {
        self.dynamics().num_actions()
    }

    fn num_decisions(&self) -> usize {
        self.dynamics().num_decisions()
    }

    fn reward_at(&self, epoch: usize, state: usize, action: usize) -> Result<f64, ModelError> {
        self.dynamics().reward_at(epoch, state, action)
    }

    fn transition_at(
        &self,
        epoch: usize,
        state: usize,
        action: usize,
    ) -> Result<&Transition, ModelError> {
        self.dynamics().transition_at(epoch, state, action)
    }

    fn cost_at(&self, resource: usize, state: usize, action: usize) -> Result<f64, ModelError> {
        self.dynamics().cost_at(resource, state, action)
    }

    fn cost_range(&self, resource: usize) -> Result<(f64, f64), ModelError> {
        self.dynamics().cost_range(resource)
    }

    fn num_domain_resources(&self) -> Result<usize, ModelError> {
        self.dynamics().num_domain_resources()
    }

    fn feasible_actions_at(&self, epoch: usize, state: usize) -> Result<&[usize], ModelError> {
        self.dynamics().feasible_actions_at(epoch, state)
    }

    fn set_reward_function(&mut self, table: Vec<Vec<f64>>) -> Result<(), ModelError> {
        self.dynamics_mut().set_reward_function(table)
    }

    fn set_time_reward_function(&mut self, table: Vec<Vec<Vec<f64>>>) -> Result<(), ModelError> {
        self.dynamics_mut().set_time_reward_function(table)
    }

    fn set_transitions(&mut self, table: Vec<Vec<Transition>>) -> Result<(), ModelError> {
        self.dynamics_mut().set_transitions(table)
    }

    fn set_time_transitions(&mut self, table: Vec<Vec<Vec<Transition>>>) -> Result<(), ModelError> {
        self.dynamics_mut().set_time_transitions(table)
    }

    fn set_cost_functions(&mut self, costs: Vec<Vec<Vec<f64>>>) -> Result<(), ModelError> {
        self.dynamics_mut().set_cost_functions(costs)
    }

    fn set_feasible_actions(&mut self, feasible: Vec<Vec<Vec<usize>>>) -> Result<(), ModelError> {
        self.dynamics_mut().set_feasible_actions(feasible)
    }
}
