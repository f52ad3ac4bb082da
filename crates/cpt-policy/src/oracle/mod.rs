pub mod joint;

use cpt_core::belief::BeliefPoint;
use thiserror::Error;

/// Failures raised by an oracle. None of them are retried by the evaluators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    #[error("malformed oracle reply: {0}")]
    Malformed(String),
    #[error("oracle did not answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("oracle protocol error: {0}")]
    Protocol(String),
    #[error("policy has no action for epoch {epoch}, state {state}")]
    Undefined { epoch: usize, state: usize },
    #[error("policy has no action for epoch {epoch}")]
    NoAction { epoch: usize },
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("oracle expected {expected} agents, got {found}")]
    AgentCount { expected: usize, found: usize },
    #[error("policy is at epoch {expected} but was queried for epoch {found}")]
    OutOfSync { expected: usize, found: usize },
}

/// Joint decision source for fully observable instances.
///
/// Hooks are called in order: `begin_simulation` once per evaluation,
/// `begin_trajectory` before epoch 0 of every run, then one
/// `choose_joint_action` per epoch. `close` is called by the owner of the
/// session once it is done with it.
pub trait MdpOracle {
    fn begin_simulation(&mut self, _num_runs: usize) -> Result<(), OracleError> {
        Ok(())
    }

    fn begin_trajectory(&mut self, _run: usize) -> Result<(), OracleError> {
        Ok(())
    }

    /// One action per agent for `joint_state` at `epoch`.
    fn choose_joint_action(
        &mut self,
        epoch: usize,
        joint_state: &[usize],
    ) -> Result<Vec<usize>, OracleError>;

    fn close(&mut self) -> Result<(), OracleError> {
        Ok(())
    }
}

/// Joint decision source for partially observable instances.
///
/// The beliefs passed to `choose_joint_action` are the evaluator's own and
/// must be treated as read-only hints; oracles tracking their own internal
/// state advance it from `report_outcome`.
pub trait PomdpOracle {
    fn begin_simulation(&mut self, _num_runs: usize) -> Result<(), OracleError> {
        Ok(())
    }

    fn begin_trajectory(&mut self, _run: usize) -> Result<(), OracleError> {
        Ok(())
    }

    fn choose_joint_action(
        &mut self,
        epoch: usize,
        joint_belief: &[BeliefPoint],
    ) -> Result<Vec<usize>, OracleError>;

    /// Realised actions and observations of `epoch`, one entry per agent.
    fn report_outcome(
        &mut self,
        epoch: usize,
        actions: &[usize],
        observations: &[usize],
    ) -> Result<(), OracleError>;

    fn close(&mut self) -> Result<(), OracleError> {
        Ok(())
    }
}

impl<T: MdpOracle + ?Sized> MdpOracle for Box<T> {
    fn begin_simulation(&mut self, num_runs: usize) -> Result<(), OracleError> {
        (**self).begin_simulation(num_runs)
    }

    fn begin_trajectory(&mut self, run: usize) -> Result<(), OracleError> {
        (**self).begin_trajectory(run)
    }

    fn choose_joint_action(
        &mut self,
        epoch: usize,
        joint_state: &[usize],
    ) -> Result<Vec<usize>, OracleError> {
        (**self).choose_joint_action(epoch, joint_state)
    }

    fn close(&mut self) -> Result<(), OracleError> {
        (**self).close()
    }
}

impl<T: PomdpOracle + ?Sized> PomdpOracle for Box<T> {
    fn begin_simulation(&mut self, num_runs: usize) -> Result<(), OracleError> {
        (**self).begin_simulation(num_runs)
    }

    fn begin_trajectory(&mut self, run: usize) -> Result<(), OracleError> {
        (**self).begin_trajectory(run)
    }

    fn choose_joint_action(
        &mut self,
        epoch: usize,
        joint_belief: &[BeliefPoint],
    ) -> Result<Vec<usize>, OracleError> {
        (**self).choose_joint_action(epoch, joint_belief)
    }

    fn report_outcome(
        &mut self,
        epoch: usize,
        actions: &[usize],
        observations: &[usize],
    ) -> Result<(), OracleError> {
        (**self).report_outcome(epoch, actions, observations)
    }

    fn close(&mut self) -> Result<(), OracleError> {
        (**self).close()
    }
}
