use core::fmt;
use thiserror::Error;

/// Tolerance applied when checking that probability rows sum to one.
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// Model component names used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Reward,
    Transitions,
    Costs,
    FeasibleActions,
    Observations,
    InitialState,
    InitialBelief,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Component::Reward => "reward function",
            Component::Transitions => "transition function",
            Component::Costs => "cost functions",
            Component::FeasibleActions => "feasible actions",
            Component::Observations => "observation function",
            Component::InitialState => "initial state",
            Component::InitialBelief => "initial belief",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    State,
    Action,
    Observation,
    Resource,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IndexKind::State => "state",
            IndexKind::Action => "action",
            IndexKind::Observation => "observation",
            IndexKind::Resource => "resource",
        };
        f.write_str(label)
    }
}

/// Configuration errors raised while building or querying a model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("{0} has not been defined")]
    Undefined(Component),
    #[error("{0} has already been defined")]
    AlreadyDefined(Component),
    #[error("epoch {epoch} outside horizon of {num_decisions} decisions")]
    EpochOutOfRange { epoch: usize, num_decisions: usize },
    #[error("{kind} index {index} out of range (limit {limit})")]
    IndexOutOfRange {
        kind: IndexKind,
        index: usize,
        limit: usize,
    },
    #[error("{component} has invalid shape: {message}")]
    InvalidShape {
        component: Component,
        message: String,
    },
    #[error("{component} row {row} sums to {sum} instead of 1")]
    InvalidDistribution {
        component: Component,
        row: String,
        sum: f64,
    },
    #[error("belief filtering requires stationary transitions")]
    TimeIndexedFiltering,
}

impl ModelError {
    pub(crate) fn index(kind: IndexKind, index: usize, limit: usize) -> Self {
        ModelError::IndexOutOfRange { kind, index, limit }
    }

    pub(crate) fn shape(component: Component, message: impl Into<String>) -> Self {
        ModelError::InvalidShape {
            component,
            message: message.into(),
        }
    }
}

pub(crate) fn check_index(kind: IndexKind, index: usize, limit: usize) -> Result<(), ModelError> {
    if index < limit {
        Ok(())
    } else {
        Err(ModelError::index(kind, index, limit))
    }
}

pub(crate) fn check_distribution(
    component: Component,
    row: impl FnOnce() -> String,
    probabilities: &[f64],
) -> Result<(), ModelError> {
    if let Some(bad) = probabilities
        .iter()
        .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0 + DISTRIBUTION_TOLERANCE)
    {
        return Err(ModelError::shape(
            component,
            format!("probability {bad} in row {} outside [0, 1]", row()),
        ));
    }
    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(ModelError::InvalidDistribution {
            component,
            row: row(),
            sum,
        });
    }
    Ok(())
}
