use std::fmt;

/// Dense, parse-order node identifier: `0..N-1`.
pub type NodeId = usize;

/// Opaque identifier a [`crate::backend::BackendAdapter`] assigns to a
/// submitted job. Retained after completion to correlate a `wait` result
/// back to its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
