//! Multi-agent problem instances: per-agent models plus shared cost limits.

pub mod document;

use crate::model::{Cmdp, Cpomdp, DecisionModel, ModelError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use document::InstanceDocument;

/// Constraint regime of a fully observable instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CostLimits {
    /// `limits[k]` bounds the total cost of resource `k` over the horizon.
    Budget(Vec<f64>),
    /// `limits[k][t]` bounds the cost of resource `k` incurred at epoch `t`.
    Instantaneous(Vec<Vec<f64>>),
}

impl CostLimits {
    pub fn num_resources(&self) -> usize {
        match self {
            CostLimits::Budget(limits) => limits.len(),
            CostLimits::Instantaneous(limits) => limits.len(),
        }
    }

    pub fn is_instantaneous(&self) -> bool {
        matches!(self, CostLimits::Instantaneous(_))
    }

    pub fn budget(&self, resource: usize) -> Option<f64> {
        match self {
            CostLimits::Budget(limits) => limits.get(resource).copied(),
            CostLimits::Instantaneous(_) => None,
        }
    }

    pub fn instantaneous(&self, resource: usize, epoch: usize) -> Option<f64> {
        match self {
            CostLimits::Instantaneous(limits) => limits.get(resource)?.get(epoch).copied(),
            CostLimits::Budget(_) => None,
        }
    }

    fn check(&self, num_decisions: usize) -> Result<(), InstanceError> {
        let values: Vec<f64> = match self {
            CostLimits::Budget(limits) => limits.clone(),
            CostLimits::Instantaneous(limits) => {
                if let Some((k, row)) = limits
                    .iter()
                    .enumerate()
                    .find(|(_, row)| row.len() != num_decisions)
                {
                    return Err(InstanceError::LimitShape(format!(
                        "resource {k} has {} epoch limits, expected {num_decisions}",
                        row.len()
                    )));
                }
                limits.iter().flatten().copied().collect()
            }
        };
        reject_nan(&values)
    }
}

fn reject_nan(values: &[f64]) -> Result<(), InstanceError> {
    match values.iter().find(|v| v.is_nan()) {
        Some(_) => Err(InstanceError::LimitShape("limits must not be NaN".into())),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstanceError {
    #[error("instance has no agents")]
    NoAgents,
    #[error("agent {agent}: {source}")]
    Agent {
        agent: usize,
        #[source]
        source: ModelError,
    },
    #[error("agent {agent} has a horizon of {found} decisions, instance expects {expected}")]
    HorizonMismatch {
        agent: usize,
        expected: usize,
        found: usize,
    },
    #[error("agent {agent} defines {found} cost resources, limits cover {expected}")]
    ResourceMismatch {
        agent: usize,
        expected: usize,
        found: usize,
    },
    #[error("cost limits have invalid shape: {0}")]
    LimitShape(String),
}

fn check_agents<M: DecisionModel>(
    models: &[M],
    num_decisions: usize,
    num_resources: usize,
) -> Result<(), InstanceError> {
    if models.is_empty() {
        return Err(InstanceError::NoAgents);
    }
    for (agent, model) in models.iter().enumerate() {
        model
            .validate()
            .map_err(|source| InstanceError::Agent { agent, source })?;
        if model.num_decisions() != num_decisions {
            return Err(InstanceError::HorizonMismatch {
                agent,
                expected: num_decisions,
                found: model.num_decisions(),
            });
        }
        match model.num_domain_resources() {
            Ok(found) if found != num_resources => {
                return Err(InstanceError::ResourceMismatch {
                    agent,
                    expected: num_resources,
                    found,
                });
            }
            Ok(_) => {}
            Err(source) if num_resources > 0 => {
                return Err(InstanceError::Agent { agent, source });
            }
            Err(_) => {}
        }
    }
    Ok(())
}

/// Fully observable multi-agent instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CmdpInstance {
    models: Vec<Cmdp>,
    num_decisions: usize,
    cost_limits: CostLimits,
}

impl CmdpInstance {
    pub fn new(
        models: Vec<Cmdp>,
        cost_limits: CostLimits,
        num_decisions: usize,
    ) -> Result<Self, InstanceError> {
        cost_limits.check(num_decisions)?;
        check_agents(&models, num_decisions, cost_limits.num_resources())?;
        Ok(Self {
            models,
            num_decisions,
            cost_limits,
        })
    }

    pub fn budget(
        models: Vec<Cmdp>,
        limits: Vec<f64>,
        num_decisions: usize,
    ) -> Result<Self, InstanceError> {
        Self::new(models, CostLimits::Budget(limits), num_decisions)
    }

    pub fn instantaneous(
        models: Vec<Cmdp>,
        limits: Vec<Vec<f64>>,
        num_decisions: usize,
    ) -> Result<Self, InstanceError> {
        Self::new(models, CostLimits::Instantaneous(limits), num_decisions)
    }

    /// Instantaneous instance applying `limits[k]` at every epoch.
    pub fn instantaneous_uniform(
        models: Vec<Cmdp>,
        limits: Vec<f64>,
        num_decisions: usize,
    ) -> Result<Self, InstanceError> {
        let per_epoch = limits
            .into_iter()
            .map(|limit| vec![limit; num_decisions])
            .collect();
        Self::instantaneous(models, per_epoch, num_decisions)
    }

    pub fn models(&self) -> &[Cmdp] {
        &self.models
    }

    pub fn num_agents(&self) -> usize {
        self.models.len()
    }

    pub fn num_decisions(&self) -> usize {
        self.num_decisions
    }

    pub fn num_domain_resources(&self) -> usize {
        self.cost_limits.num_resources()
    }

    pub fn cost_limits(&self) -> &CostLimits {
        &self.cost_limits
    }
}

/// Partially observable multi-agent instance; budget limits only.
#[derive(Debug, Clone, PartialEq)]
pub struct CpomdpInstance {
    models: Vec<Cpomdp>,
    num_decisions: usize,
    cost_limits: Vec<f64>,
}

impl CpomdpInstance {
    pub fn new(
        models: Vec<Cpomdp>,
        cost_limits: Vec<f64>,
        num_decisions: usize,
    ) -> Result<Self, InstanceError> {
        reject_nan(&cost_limits)?;
        check_agents(&models, num_decisions, cost_limits.len())?;
        Ok(Self {
            models,
            num_decisions,
            cost_limits,
        })
    }

    pub fn models(&self) -> &[Cpomdp] {
        &self.models
    }

    pub fn num_agents(&self) -> usize {
        self.models.len()
    }

    pub fn num_decisions(&self) -> usize {
        self.num_decisions
    }

    pub fn num_domain_resources(&self) -> usize {
        self.cost_limits.len()
    }

    pub fn cost_limits(&self) -> &[f64] {
        &self.cost_limits
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instance {
    Cmdp(CmdpInstance),
    Cpomdp(CpomdpInstance),
}

impl Instance {
    pub fn kind(&self) -> &'static str {
        match self {
            Instance::Cmdp(_) => "cmdp",
            Instance::Cpomdp(_) => "cpomdp",
        }
    }

    pub fn num_agents(&self) -> usize {
        match self {
            Instance::Cmdp(instance) => instance.num_agents(),
            Instance::Cpomdp(instance) => instance.num_agents(),
        }
    }

    pub fn num_decisions(&self) -> usize {
        match self {
            Instance::Cmdp(instance) => instance.num_decisions(),
            Instance::Cpomdp(instance) => instance.num_decisions(),
        }
    }

    pub fn num_domain_resources(&self) -> usize {
        match self {
            Instance::Cmdp(instance) => instance.num_domain_resources(),
            Instance::Cpomdp(instance) => instance.num_domain_resources(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Component, Transition};

    fn agent(horizon: usize, costs: Option<Vec<Vec<Vec<f64>>>>) -> Cmdp {
        let mut cmdp = Cmdp::new(2, 1, 0, horizon).unwrap();
        cmdp.set_reward_function(vec![vec![0.0], vec![1.0]]).unwrap();
        cmdp.set_transitions(vec![
            vec![Transition::deterministic(1)],
            vec![Transition::deterministic(1)],
        ])
        .unwrap();
        if let Some(costs) = costs {
            cmdp.set_cost_functions(costs).unwrap();
        }
        cmdp
    }

    fn one_resource() -> Option<Vec<Vec<Vec<f64>>>> {
        Some(vec![vec![vec![3.0], vec![0.0]]])
    }

    #[test]
    fn uniform_limits_are_broadcast_over_epochs() {
        let instance =
            CmdpInstance::instantaneous_uniform(vec![agent(3, one_resource())], vec![2.5], 3)
                .unwrap();
        assert_eq!(
            instance.cost_limits(),
            &CostLimits::Instantaneous(vec![vec![2.5, 2.5, 2.5]])
        );
        assert_eq!(instance.cost_limits().instantaneous(0, 2), Some(2.5));
        assert_eq!(instance.cost_limits().budget(0), None);
    }

    #[test]
    fn agents_must_share_the_horizon() {
        let err = CmdpInstance::budget(
            vec![agent(2, one_resource()), agent(3, one_resource())],
            vec![1.0],
            2,
        )
        .unwrap_err();
        assert_eq!(
            err,
            InstanceError::HorizonMismatch {
                agent: 1,
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn costs_are_required_when_limits_exist() {
        let err = CmdpInstance::budget(vec![agent(2, None)], vec![1.0], 2).unwrap_err();
        assert_eq!(
            err,
            InstanceError::Agent {
                agent: 0,
                source: ModelError::Undefined(Component::Costs)
            }
        );
        assert!(CmdpInstance::budget(vec![agent(2, None)], vec![], 2).is_ok());
    }

    #[test]
    fn resource_counts_must_agree() {
        let err = CmdpInstance::budget(vec![agent(2, one_resource())], vec![1.0, 2.0], 2)
            .unwrap_err();
        assert!(matches!(err, InstanceError::ResourceMismatch { found: 1, expected: 2, .. }));
    }

    #[test]
    fn instantaneous_rows_must_cover_the_horizon() {
        let err = CmdpInstance::instantaneous(vec![agent(2, one_resource())], vec![vec![1.0]], 2)
            .unwrap_err();
        assert!(matches!(err, InstanceError::LimitShape(_)));
    }

    #[test]
    fn empty_instances_are_rejected() {
        assert_eq!(
            CmdpInstance::budget(Vec::new(), vec![], 1),
            Err(InstanceError::NoAgents)
        );
    }

    #[test]
    fn incomplete_models_are_rejected() {
        let cmdp = Cmdp::new(1, 1, 0, 1).unwrap();
        let err = CmdpInstance::budget(vec![cmdp], vec![], 1).unwrap_err();
        assert_eq!(
            err,
            InstanceError::Agent {
                agent: 0,
                source: ModelError::Undefined(Component::Reward)
            }
        );
    }
}
