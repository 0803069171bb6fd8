use thiserror::Error;

use crate::ids::{JobId, NodeId};

/// Lifecycle state of a [`Node`]. Transitions are driven by the scheduler's
/// state machine, not by `Graph` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Waiting,
    Running,
    Complete,
    Failed,
    Aborted,
}

impl NodeState {
    pub fn name(&self) -> &'static str {
        match self {
            NodeState::Waiting => "waiting",
            NodeState::Running => "running",
            NodeState::Complete => "complete",
            NodeState::Failed => "failed",
            NodeState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Complete | NodeState::Aborted)
    }

    /// Recovery log encoding, matching the original engine's enum order.
    pub fn as_u8(&self) -> u8 {
        match self {
            NodeState::Waiting => 0,
            NodeState::Running => 1,
            NodeState::Complete => 2,
            NodeState::Failed => 3,
            NodeState::Aborted => 4,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(NodeState::Waiting),
            1 => Some(NodeState::Running),
            2 => Some(NodeState::Complete),
            3 => Some(NodeState::Failed),
            4 => Some(NodeState::Aborted),
            _ => None,
        }
    }
}

/// Counts of nodes in each state, in the order the recovery log records
/// them: waiting, running, complete, failed, aborted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub waiting: u64,
    pub running: u64,
    pub complete: u64,
    pub failed: u64,
    pub aborted: u64,
}

/// One executable vertex in the DAG: a shell command with declared input
/// and output filenames.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub line: usize,
    pub command: String,
    pub local: bool,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub state: NodeState,
    pub job_id: Option<JobId>,
    pub failure_count: u32,

    // Derived topology fields, filled by Graph's analyses. Not invariants.
    pub children: Vec<NodeId>,
    pub children_left: usize,
    pub level: usize,
    pub only_my_children: u32,
}

/// Which concurrency-capped pool a node's job runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local,
    Remote,
}

impl Node {
    pub fn tier(&self) -> Tier {
        if self.local {
            Tier::Local
        } else {
            Tier::Remote
        }
    }

    pub fn new(id: NodeId, line: usize, command: String, local: bool, sources: Vec<String>, targets: Vec<String>) -> Self {
        Self {
            id,
            line,
            command,
            local,
            sources,
            targets,
            state: NodeState::Waiting,
            job_id: None,
            failure_count: 0,
            children: Vec::new(),
            children_left: 0,
            level: 0,
            only_my_children: 0,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("line {new_line}: '{filename}' is already produced by the rule at line {first_line}")]
    DuplicateTarget { filename: String, first_line: usize, new_line: usize },

    #[error("'{filename}' (source of the rule at line {line}) has no producer and does not exist on disk")]
    MissingSource { filename: String, line: usize },

    #[error("no node with id {0}")]
    UnknownNode(NodeId),
}
