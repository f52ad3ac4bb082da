//! Joint oracles assembled from independent per-agent policies.

use super::{MdpOracle, OracleError, PomdpOracle};
use cpt_core::belief::BeliefPoint;

/// Decision rule of a single fully observable agent.
pub trait MdpAgentPolicy {
    /// Called before every trajectory.
    fn reset(&mut self) {}

    fn action(&mut self, epoch: usize, state: usize) -> Result<usize, OracleError>;
}

/// Decision rule of a single partially observable agent.
pub trait PomdpAgentPolicy {
    fn reset(&mut self) {}

    fn action(&mut self, epoch: usize, belief: &BeliefPoint) -> Result<usize, OracleError>;

    fn observe(
        &mut self,
        _epoch: usize,
        _action: usize,
        _observation: usize,
    ) -> Result<(), OracleError> {
        Ok(())
    }
}

fn check_agents(expected: usize, found: usize) -> Result<(), OracleError> {
    if expected == found {
        Ok(())
    } else {
        Err(OracleError::AgentCount { expected, found })
    }
}

#[derive(Default)]
pub struct JointMdpPolicy {
    agents: Vec<Box<dyn MdpAgentPolicy>>,
}

impl JointMdpPolicy {
    pub fn new(agents: Vec<Box<dyn MdpAgentPolicy>>) -> Self {
        Self { agents }
    }

    pub fn push(&mut self, agent: impl MdpAgentPolicy + 'static) {
        self.agents.push(Box::new(agent));
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }
}

impl MdpOracle for JointMdpPolicy {
    fn begin_trajectory(&mut self, _run: usize) -> Result<(), OracleError> {
        self.agents.iter_mut().for_each(|agent| agent.reset());
        Ok(())
    }

    fn choose_joint_action(
        &mut self,
        epoch: usize,
        joint_state: &[usize],
    ) -> Result<Vec<usize>, OracleError> {
        check_agents(self.agents.len(), joint_state.len())?;
        self.agents
            .iter_mut()
            .zip(joint_state)
            .map(|(agent, &state)| agent.action(epoch, state))
            .collect()
    }
}

#[derive(Default)]
pub struct JointPomdpPolicy {
    agents: Vec<Box<dyn PomdpAgentPolicy>>,
}

impl JointPomdpPolicy {
    pub fn new(agents: Vec<Box<dyn PomdpAgentPolicy>>) -> Self {
        Self { agents }
    }

    pub fn push(&mut self, agent: impl PomdpAgentPolicy + 'static) {
        self.agents.push(Box::new(agent));
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }
}

impl PomdpOracle for JointPomdpPolicy {
    fn begin_trajectory(&mut self, _run: usize) -> Result<(), OracleError> {
        self.agents.iter_mut().for_each(|agent| agent.reset());
        Ok(())
    }

    fn choose_joint_action(
        &mut self,
        epoch: usize,
        joint_belief: &[BeliefPoint],
    ) -> Result<Vec<usize>, OracleError> {
        check_agents(self.agents.len(), joint_belief.len())?;
        self.agents
            .iter_mut()
            .zip(joint_belief)
            .map(|(agent, belief)| agent.action(epoch, belief))
            .collect()
    }

    fn report_outcome(
        &mut self,
        epoch: usize,
        actions: &[usize],
        observations: &[usize],
    ) -> Result<(), OracleError> {
        check_agents(self.agents.len(), actions.len())?;
        check_agents(self.agents.len(), observations.len())?;
        for ((agent, &action), &observation) in self.agents.iter_mut().zip(actions).zip(observations)
        {
            agent.observe(epoch, action, observation)?;
        }
        Ok(())
    }
}
