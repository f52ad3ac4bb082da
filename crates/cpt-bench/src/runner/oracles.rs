use std::path::{Path, PathBuf};

use cpt_core::instance::{CmdpInstance, CpomdpInstance};
use cpt_core::model::{Cpomdp, DecisionModel};
use cpt_policy::{
    ConstantPomdpPolicy, DeterministicPolicy, JointMdpPolicy, JointPomdpPolicy, MdpOracle,
    OracleError, PolicyGraph, PomdpOracle, StochasticPolicy, UniformFeasiblePolicy,
};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{OracleConfig, OracleKind};
use crate::simulation::external::{ExternalOptions, ExternalOracle};

#[derive(Debug, Error)]
pub enum OracleParamError {
    #[error("invalid {oracle} oracle parameter: {message}")]
    InvalidParam {
        oracle: &'static str,
        message: String,
    },
    #[error("{oracle} oracle lists {found} agent tables but the instance has {expected} agents")]
    AgentCount {
        oracle: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{oracle} oracle cannot drive a {kind} instance")]
    UnsupportedInstance {
        oracle: &'static str,
        kind: &'static str,
    },
    #[error("oracle setup failed: {0}")]
    Setup(#[from] OracleError),
}

/// Parsed oracle parameters; instantiated once the instance is known.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleBlueprint {
    /// `action` for every agent, or one `tables` entry per agent:
    /// `pi[t][s]` on CMDP instances, `a[t]` on CPOMDP instances.
    Deterministic {
        action: Option<usize>,
        tables: Option<Vec<serde_yaml::Value>>,
    },
    /// One `x[t][s][a]` weight table per agent; CMDP instances only.
    /// Agent `i` draws from `seed + i`.
    Stochastic {
        tables: Vec<serde_yaml::Value>,
        seed: u64,
    },
    /// Agent `i` draws from `seed + i`.
    Uniform { seed: u64 },
    /// One layered controller per agent; CPOMDP instances only.
    PolicyGraph { graphs: Vec<GraphParams> },
    External(ExternalOptions),
}

/// Layered controller as written in the config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphParams {
    /// `actions[l][n]`
    pub actions: Vec<Vec<usize>>,
    /// `transitions[l][n][o]`, a node index in layer `l + 1`.
    #[serde(default)]
    pub transitions: Vec<Vec<Vec<usize>>>,
    #[serde(default)]
    pub start: usize,
}

impl GraphParams {
    fn build_for(&self, agent: usize, model: &Cpomdp, num_decisions: usize) -> Result<PolicyGraph, OracleParamError> {
        if self.actions.len() != num_decisions {
            return Err(invalid(
                "policy_graph",
                format!(
                    "graphs[{agent}] has {} layers, instance has {num_decisions} epochs",
                    self.actions.len()
                ),
            ));
        }
        if let Some(action) = self.actions.iter().flatten().find(|a| **a >= model.num_actions()) {
            return Err(invalid(
                "policy_graph",
                format!(
                    "graphs[{agent}] plays action {action}, model has {}",
                    model.num_actions()
                ),
            ));
        }
        let short_edges = self
            .transitions
            .iter()
            .flatten()
            .any(|edges| edges.len() != model.num_observations());
        if short_edges {
            return Err(invalid(
                "policy_graph",
                format!(
                    "graphs[{agent}] nodes need one edge per observation ({})",
                    model.num_observations()
                ),
            ));
        }
        Ok(PolicyGraph::new(
            self.actions.clone(),
            self.transitions.clone(),
            self.start,
        )?)
    }
}

impl OracleBlueprint {
    pub fn from_config(
        config: &OracleConfig,
        base_dir: Option<&Path>,
        default_seed: u64,
    ) -> Result<Self, OracleParamError> {
        match config.kind {
            OracleKind::Deterministic => deterministic_from_params(&config.params),
            OracleKind::Stochastic => stochastic_from_params(&config.params, default_seed),
            OracleKind::Uniform => uniform_from_params(&config.params, default_seed),
            OracleKind::PolicyGraph => policy_graph_from_params(&config.params),
            OracleKind::External => {
                external_from_params(&config.params, base_dir).map(OracleBlueprint::External)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OracleBlueprint::Deterministic { .. } => "deterministic",
            OracleBlueprint::Stochastic { .. } => "stochastic",
            OracleBlueprint::Uniform { .. } => "uniform",
            OracleBlueprint::PolicyGraph { .. } => "policy_graph",
            OracleBlueprint::External(_) => "external",
        }
    }

    pub fn mdp_oracle(&self, instance: &CmdpInstance) -> Result<Box<dyn MdpOracle>, OracleParamError> {
        let models = instance.models();
        match self {
            OracleBlueprint::Deterministic { action, tables } => {
                let mut joint = JointMdpPolicy::default();
                match (action, tables) {
                    (_, Some(tables)) => {
                        check_table_count("deterministic", tables.len(), models.len())?;
                        for (agent, (table, model)) in tables.iter().zip(models).enumerate() {
                            let actions: Vec<Vec<usize>> = serde_yaml::from_value(table.clone())
                                .map_err(|err| invalid(
                                    "deterministic",
                                    format!("tables[{agent}] must be a [epoch][state] grid: {err}"),
                                ))?;
                            let policy = DeterministicPolicy::new(actions);
                            policy.validate_for(model)?;
                            joint.push(policy);
                        }
                    }
                    (Some(action), None) => {
                        for model in models {
                            let policy = DeterministicPolicy::constant(
                                *action,
                                model.num_decisions(),
                                model.num_states(),
                            );
                            policy.validate_for(model)?;
                            joint.push(policy);
                        }
                    }
                    (None, None) => return Err(missing_action()),
                }
                Ok(Box::new(joint))
            }
            OracleBlueprint::Stochastic { tables, seed } => {
                check_table_count("stochastic", tables.len(), models.len())?;
                let mut joint = JointMdpPolicy::default();
                for (agent, (table, model)) in tables.iter().zip(models).enumerate() {
                    let weights: Vec<Vec<Vec<f64>>> = serde_yaml::from_value(table.clone())
                        .map_err(|err| invalid(
                            "stochastic",
                            format!("tables[{agent}] must be an [epoch][state][action] grid: {err}"),
                        ))?;
                    check_weight_shape(agent, &weights, model)?;
                    joint.push(StochasticPolicy::new(weights, seed.wrapping_add(agent as u64))?);
                }
                Ok(Box::new(joint))
            }
            OracleBlueprint::PolicyGraph { .. } => Err(OracleParamError::UnsupportedInstance {
                oracle: "policy_graph",
                kind: "cmdp",
            }),
            OracleBlueprint::Uniform { seed } => {
                let mut joint = JointMdpPolicy::default();
                for (agent, model) in models.iter().enumerate() {
                    joint.push(UniformFeasiblePolicy::for_model(
                        model,
                        seed.wrapping_add(agent as u64),
                    )?);
                }
                Ok(Box::new(joint))
            }
            OracleBlueprint::External(options) => {
                Ok(Box::new(ExternalOracle::spawn("external", options)?))
            }
        }
    }

    pub fn pomdp_oracle(
        &self,
        instance: &CpomdpInstance,
    ) -> Result<Box<dyn PomdpOracle>, OracleParamError> {
        let models = instance.models();
        let num_decisions = instance.num_decisions();
        match self {
            OracleBlueprint::Deterministic { action, tables } => {
                let mut joint = JointPomdpPolicy::default();
                match (action, tables) {
                    (_, Some(tables)) => {
                        check_table_count("deterministic", tables.len(), models.len())?;
                        for (agent, table) in tables.iter().enumerate() {
                            let actions: Vec<usize> = serde_yaml::from_value(table.clone())
                                .map_err(|err| invalid(
                                    "deterministic",
                                    format!("tables[{agent}] must list one action per epoch: {err}"),
                                ))?;
                            if actions.len() != num_decisions {
                                return Err(invalid(
                                    "deterministic",
                                    format!(
                                        "tables[{agent}] has {} epochs, instance has {num_decisions}",
                                        actions.len()
                                    ),
                                ));
                            }
                            joint.push(ConstantPomdpPolicy::new(actions));
                        }
                    }
                    (Some(action), None) => {
                        for _ in models {
                            joint.push(ConstantPomdpPolicy::repeated(*action, num_decisions));
                        }
                    }
                    (None, None) => return Err(missing_action()),
                }
                Ok(Box::new(joint))
            }
            OracleBlueprint::Stochastic { .. } => Err(OracleParamError::UnsupportedInstance {
                oracle: "stochastic",
                kind: "cpomdp",
            }),
            OracleBlueprint::PolicyGraph { graphs } => {
                check_table_count("policy_graph", graphs.len(), models.len())?;
                let mut joint = JointPomdpPolicy::default();
                for (agent, (graph, model)) in graphs.iter().zip(models).enumerate() {
                    joint.push(graph.build_for(agent, model, num_decisions)?);
                }
                Ok(Box::new(joint))
            }
            OracleBlueprint::Uniform { seed } => {
                let mut joint = JointPomdpPolicy::default();
                for (agent, model) in models.iter().enumerate() {
                    joint.push(UniformFeasiblePolicy::for_model(
                        model,
                        seed.wrapping_add(agent as u64),
                    )?);
                }
                Ok(Box::new(joint))
            }
            OracleBlueprint::External(options) => {
                Ok(Box::new(ExternalOracle::spawn("external", options)?))
            }
        }
    }
}

fn invalid(oracle: &'static str, message: impl Into<String>) -> OracleParamError {
    OracleParamError::InvalidParam {
        oracle,
        message: message.into(),
    }
}

fn missing_action() -> OracleParamError {
    invalid("deterministic", "either `action` or `tables` is required")
}

fn check_table_count(
    oracle: &'static str,
    found: usize,
    expected: usize,
) -> Result<(), OracleParamError> {
    if found != expected {
        return Err(OracleParamError::AgentCount {
            oracle,
            expected,
            found,
        });
    }
    Ok(())
}

fn check_weight_shape<M: DecisionModel>(
    agent: usize,
    weights: &[Vec<Vec<f64>>],
    model: &M,
) -> Result<(), OracleParamError> {
    let shape_ok = weights.len() == model.num_decisions()
        && weights.iter().all(|layer| {
            layer.len() == model.num_states()
                && layer.iter().all(|row| row.len() == model.num_actions())
        });
    if !shape_ok {
        return Err(invalid(
            "stochastic",
            format!(
                "tables[{agent}] must be {} x {} x {} (epochs x states x actions)",
                model.num_decisions(),
                model.num_states(),
                model.num_actions()
            ),
        ));
    }
    Ok(())
}

fn mapping<'v>(
    oracle: &'static str,
    params: &'v serde_yaml::Value,
) -> Result<Option<&'v serde_yaml::Mapping>, OracleParamError> {
    if params.is_null() {
        return Ok(None);
    }
    params
        .as_mapping()
        .map(Some)
        .ok_or_else(|| invalid(oracle, format!("expected mapping for {oracle} params")))
}

fn deterministic_from_params(params: &serde_yaml::Value) -> Result<OracleBlueprint, OracleParamError> {
    let mut action = None;
    let mut tables = None;

    if let Some(mapping) = mapping("deterministic", params)? {
        for (key, value) in mapping {
            match key.as_str() {
                Some("action") => {
                    let parsed = value
                        .as_u64()
                        .ok_or_else(|| invalid("deterministic", "action must be a non-negative integer"))?;
                    action = Some(parsed as usize);
                }
                Some("tables") => {
                    let seq = value
                        .as_sequence()
                        .ok_or_else(|| invalid("deterministic", "tables must be a list, one entry per agent"))?;
                    tables = Some(seq.clone());
                }
                _ => {}
            }
        }
    }

    if action.is_none() && tables.is_none() {
        return Err(missing_action());
    }
    Ok(OracleBlueprint::Deterministic { action, tables })
}

fn stochastic_from_params(
    params: &serde_yaml::Value,
    default_seed: u64,
) -> Result<OracleBlueprint, OracleParamError> {
    let mut tables = None;
    let mut seed = default_seed;
    if let Some(mapping) = mapping("stochastic", params)? {
        for (key, value) in mapping {
            match key.as_str() {
                Some("tables") => {
                    let seq = value
                        .as_sequence()
                        .ok_or_else(|| invalid("stochastic", "tables must be a list, one entry per agent"))?;
                    tables = Some(seq.clone());
                }
                Some("seed") => {
                    seed = value
                        .as_u64()
                        .ok_or_else(|| invalid("stochastic", "seed must be a non-negative integer"))?;
                }
                _ => {}
            }
        }
    }
    let tables = tables.ok_or_else(|| invalid("stochastic", "tables is required"))?;
    Ok(OracleBlueprint::Stochastic { tables, seed })
}

fn policy_graph_from_params(params: &serde_yaml::Value) -> Result<OracleBlueprint, OracleParamError> {
    let graphs = mapping("policy_graph", params)?
        .and_then(|mapping| mapping.get("graphs"))
        .ok_or_else(|| invalid("policy_graph", "graphs is required"))?;
    let graphs: Vec<GraphParams> = serde_yaml::from_value(graphs.clone()).map_err(|err| {
        invalid(
            "policy_graph",
            format!("graphs must list {{actions, transitions, start}} per agent: {err}"),
        )
    })?;
    Ok(OracleBlueprint::PolicyGraph { graphs })
}

fn uniform_from_params(
    params: &serde_yaml::Value,
    default_seed: u64,
) -> Result<OracleBlueprint, OracleParamError> {
    let mut seed = default_seed;
    if let Some(mapping) = mapping("uniform", params)? {
        for (key, value) in mapping {
            if key.as_str() == Some("seed") {
                seed = value
                    .as_u64()
                    .ok_or_else(|| invalid("uniform", "seed must be a non-negative integer"))?;
            }
        }
    }
    Ok(OracleBlueprint::Uniform { seed })
}

fn external_from_params(
    params: &serde_yaml::Value,
    base_dir: Option<&Path>,
) -> Result<ExternalOptions, OracleParamError> {
    let mut command = None;
    let mut args = Vec::new();
    let mut working_dir = None;
    let mut timeout_ms = None;

    if let Some(mapping) = mapping("external", params)? {
        for (key, value) in mapping {
            match key.as_str() {
                Some("command") => {
                    command = value.as_str().map(|s| s.to_string());
                    if command.is_none() {
                        return Err(invalid("external", "command must be a string"));
                    }
                }
                Some("args") => {
                    let seq = value
                        .as_sequence()
                        .ok_or_else(|| invalid("external", "args must be an array of strings"))?;
                    args = seq
                        .iter()
                        .map(|v| {
                            v.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| invalid("external", "args must be an array of strings"))
                        })
                        .collect::<Result<_, _>>()?;
                }
                Some("working_dir") => {
                    let dir = value
                        .as_str()
                        .map(PathBuf::from)
                        .ok_or_else(|| invalid("external", "working_dir must be a string"))?;
                    working_dir = Some(match base_dir {
                        Some(base) if dir.is_relative() => base.join(dir),
                        _ => dir,
                    });
                }
                Some("timeout_ms") => {
                    timeout_ms = Some(
                        value
                            .as_u64()
                            .ok_or_else(|| invalid("external", "timeout_ms must be a non-negative integer"))?,
                    );
                }
                _ => {}
            }
        }
    }

    let command = command
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| invalid("external", "command is required"))?;
    Ok(ExternalOptions {
        command,
        args,
        working_dir,
        timeout_ms,
    })
}
