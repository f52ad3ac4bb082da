//! Policy oracles consulted by the evaluators, plus local policy implementations.

pub mod graph;
pub mod oracle;
pub mod tabular;

pub use graph::{ConstantPomdpPolicy, PolicyGraph};
pub use oracle::joint::{JointMdpPolicy, JointPomdpPolicy, MdpAgentPolicy, PomdpAgentPolicy};
pub use oracle::{MdpOracle, OracleError, PomdpOracle};
pub use tabular::{DeterministicPolicy, StochasticPolicy, UniformFeasiblePolicy};
