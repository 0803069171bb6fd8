mod graph;
mod types;

pub use graph::{AutoProvision, Graph};
pub use types::{GraphError, Node, NodeState, StateCounts, Tier};
