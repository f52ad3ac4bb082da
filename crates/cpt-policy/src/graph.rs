//! Finite-state controllers for partially observable agents.

use crate::oracle::joint::PomdpAgentPolicy;
use crate::oracle::OracleError;
use cpt_core::belief::BeliefPoint;
use tracing::trace;

/// Layered policy graph: one layer per epoch, nodes carry an action and
/// observation-labelled edges into the next layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyGraph {
    /// `layer_actions[l][n]`
    layer_actions: Vec<Vec<usize>>,
    /// `layer_transitions[l][n][o]`, a node index in layer `l + 1`.
    layer_transitions: Vec<Vec<Vec<usize>>>,
    start_node: usize,
    layer: usize,
    node: usize,
}

impl PolicyGraph {
    pub fn new(
        layer_actions: Vec<Vec<usize>>,
        layer_transitions: Vec<Vec<Vec<usize>>>,
        start_node: usize,
    ) -> Result<Self, OracleError> {
        let num_layers = layer_actions.len();
        if num_layers == 0 {
            return Err(OracleError::InvalidPolicy("policy graph has no layers".into()));
        }
        if start_node >= layer_actions[0].len() {
            return Err(OracleError::InvalidPolicy(format!(
                "start node {start_node} outside first layer of {} nodes",
                layer_actions[0].len()
            )));
        }
        if layer_transitions.len() + 1 < num_layers {
            return Err(OracleError::InvalidPolicy(format!(
                "{} transition layers for {num_layers} action layers",
                layer_transitions.len()
            )));
        }
        for layer in 0..num_layers - 1 {
            let next_width = layer_actions[layer + 1].len();
            if layer_transitions[layer].len() != layer_actions[layer].len() {
                return Err(OracleError::InvalidPolicy(format!(
                    "layer {layer} has {} nodes but {} transition rows",
                    layer_actions[layer].len(),
                    layer_transitions[layer].len()
                )));
            }
            if let Some(bad) = layer_transitions[layer]
                .iter()
                .flatten()
                .find(|next| **next >= next_width)
            {
                return Err(OracleError::InvalidPolicy(format!(
                    "layer {layer} points to node {bad}, next layer has {next_width}"
                )));
            }
        }
        Ok(Self {
            layer_actions,
            layer_transitions,
            start_node,
            layer: 0,
            node: start_node,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layer_actions.len()
    }

    pub fn position(&self) -> (usize, usize) {
        (self.layer, self.node)
    }
}

impl PomdpAgentPolicy for PolicyGraph {
    fn reset(&mut self) {
        self.layer = 0;
        self.node = self.start_node;
    }

    fn action(&mut self, epoch: usize, _belief: &BeliefPoint) -> Result<usize, OracleError> {
        if epoch != self.layer {
            return Err(OracleError::OutOfSync {
                expected: self.layer,
                found: epoch,
            });
        }
        self.layer_actions
            .get(self.layer)
            .and_then(|nodes| nodes.get(self.node))
            .copied()
            .ok_or(OracleError::NoAction { epoch })
    }

    fn observe(
        &mut self,
        epoch: usize,
        _action: usize,
        observation: usize,
    ) -> Result<(), OracleError> {
        if epoch != self.layer {
            return Err(OracleError::OutOfSync {
                expected: self.layer,
                found: epoch,
            });
        }
        if self.layer + 1 < self.num_layers() {
            let next = self.layer_transitions[self.layer][self.node]
                .get(observation)
                .copied()
                .ok_or_else(|| {
                    OracleError::InvalidPolicy(format!(
                        "no edge for observation {observation} at layer {}, node {}",
                        self.layer, self.node
                    ))
                })?;
            trace!(target: "cpt_policy::graph", layer = self.layer, from = self.node, to = next, observation, "policy graph step");
            self.node = next;
        }
        self.layer += 1;
        Ok(())
    }
}

/// Plays `actions[t]` at epoch `t` whatever the belief.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPomdpPolicy {
    actions: Vec<usize>,
}

impl ConstantPomdpPolicy {
    pub fn new(actions: Vec<usize>) -> Self {
        Self { actions }
    }

    pub fn repeated(action: usize, num_decisions: usize) -> Self {
        Self::new(vec![action; num_decisions])
    }
}

impl PomdpAgentPolicy for ConstantPomdpPolicy {
    fn action(&mut self, epoch: usize, _belief: &BeliefPoint) -> Result<usize, OracleError> {
        self.actions
            .get(epoch)
            .copied()
            .ok_or(OracleError::NoAction { epoch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two layers: start by playing 0, then play the observation back.
    fn echo_graph() -> PolicyGraph {
        PolicyGraph::new(vec![vec![0], vec![0, 1]], vec![vec![vec![0, 1]]], 0).unwrap()
    }

    #[test]
    fn graph_follows_observation_edges() {
        let belief = BeliefPoint::uniform(2);
        let mut graph = echo_graph();
        assert_eq!(graph.action(0, &belief), Ok(0));
        graph.observe(0, 0, 1).unwrap();
        assert_eq!(graph.action(1, &belief), Ok(1));
        graph.observe(1, 1, 0).unwrap();
        assert_eq!(graph.position(), (2, 1));
    }

    #[test]
    fn reset_returns_to_start_node() {
        let belief = BeliefPoint::uniform(2);
        let mut graph = echo_graph();
        graph.observe(0, 0, 1).unwrap();
        graph.reset();
        assert_eq!(graph.position(), (0, 0));
        assert_eq!(graph.action(0, &belief), Ok(0));
    }

    #[test]
    fn graph_detects_desynchronised_queries() {
        let mut graph = echo_graph();
        assert_eq!(
            graph.action(1, &BeliefPoint::uniform(2)),
            Err(OracleError::OutOfSync {
                expected: 0,
                found: 1
            })
        );
    }

    #[test]
    fn dangling_edges_are_rejected() {
        assert!(PolicyGraph::new(vec![vec![0], vec![0]], vec![vec![vec![3]]], 0).is_err());
        assert!(PolicyGraph::new(vec![vec![0]], vec![], 1).is_err());
    }

    #[test]
    fn constant_policy_runs_out_after_horizon() {
        let mut policy = ConstantPomdpPolicy::repeated(2, 1);
        let belief = BeliefPoint::uniform(1);
        assert_eq!(policy.action(0, &belief), Ok(2));
        assert_eq!(policy.action(1, &belief), Err(OracleError::NoAction { epoch: 1 }));
    }
}
