//! Serializable instance descriptions, built into validated instances.

use super::{CmdpInstance, CostLimits, CpomdpInstance, Instance, InstanceError};
use crate::belief::BeliefPoint;
use crate::model::{
    Cmdp, Cpomdp, DecisionModel, Dynamics, ModelError, RewardFunction, TransitionFunction,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceDocument {
    Cmdp(CmdpDocument),
    Cpomdp(CpomdpDocument),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdpDocument {
    pub num_decisions: usize,
    pub limits: CostLimits,
    pub agents: Vec<CmdpAgentDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpomdpDocument {
    pub num_decisions: usize,
    #[serde(default)]
    pub cost_limits: Vec<f64>,
    pub agents: Vec<CpomdpAgentDocument>,
}

/// Tables shared by both agent kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablesDocument {
    pub reward: RewardFunction,
    pub transitions: TransitionFunction,
    /// `costs[k][s][a]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub costs: Option<Vec<Vec<Vec<f64>>>>,
    /// `feasible_actions[t][s]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feasible_actions: Option<Vec<Vec<Vec<usize>>>>,
}

impl TablesDocument {
    fn install(self, dynamics: &mut Dynamics) -> Result<(), ModelError> {
        dynamics.set_reward(self.reward)?;
        dynamics.set_transition_function(self.transitions)?;
        if let Some(costs) = self.costs {
            dynamics.set_cost_functions(costs)?;
        }
        if let Some(feasible) = self.feasible_actions {
            dynamics.set_feasible_actions(feasible)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdpAgentDocument {
    pub num_states: usize,
    pub num_actions: usize,
    #[serde(default)]
    pub initial_state: usize,
    #[serde(flatten)]
    pub tables: TablesDocument,
}

impl CmdpAgentDocument {
    pub fn build(self, num_decisions: usize) -> Result<Cmdp, ModelError> {
        let mut cmdp = Cmdp::new(
            self.num_states,
            self.num_actions,
            self.initial_state,
            num_decisions,
        )?;
        self.tables.install(cmdp.dynamics_mut())?;
        cmdp.validate()?;
        Ok(cmdp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpomdpAgentDocument {
    pub num_states: usize,
    pub num_actions: usize,
    pub num_observations: usize,
    pub initial_belief: Vec<f64>,
    /// `observations[a][s'][o]`
    pub observations: Vec<Vec<Vec<f64>>>,
    #[serde(flatten)]
    pub tables: TablesDocument,
}

impl CpomdpAgentDocument {
    pub fn build(self, num_decisions: usize) -> Result<Cpomdp, ModelError> {
        let mut cpomdp = Cpomdp::new(
            self.num_states,
            self.num_actions,
            self.num_observations,
            BeliefPoint::new(self.initial_belief),
            num_decisions,
        )?;
        self.tables.install(cpomdp.dynamics_mut())?;
        cpomdp.set_observation_function(self.observations)?;
        cpomdp.validate()?;
        Ok(cpomdp)
    }
}

impl InstanceDocument {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn build(self) -> Result<Instance, InstanceError> {
        match self {
            InstanceDocument::Cmdp(doc) => {
                let models = build_agents(doc.agents, |agent| agent.build(doc.num_decisions))?;
                CmdpInstance::new(models, doc.limits, doc.num_decisions).map(Instance::Cmdp)
            }
            InstanceDocument::Cpomdp(doc) => {
                let models = build_agents(doc.agents, |agent| agent.build(doc.num_decisions))?;
                CpomdpInstance::new(models, doc.cost_limits, doc.num_decisions)
                    .map(Instance::Cpomdp)
            }
        }
    }
}

fn build_agents<D, M>(
    agents: Vec<D>,
    build: impl Fn(D) -> Result<M, ModelError>,
) -> Result<Vec<M>, InstanceError> {
    agents
        .into_iter()
        .enumerate()
        .map(|(agent, doc)| build(doc).map_err(|source| InstanceError::Agent { agent, source }))
        .collect()
}
