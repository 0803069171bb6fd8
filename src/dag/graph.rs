use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::ids::{JobId, NodeId};

use super::types::{GraphError, Node, NodeState, StateCounts, Tier};

/// How `-a` should turn a topology metric into a worker-count recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoProvision {
    Width,
    Group,
}

/// The in-memory DAG: nodes, the file-producer index, per-file readiness,
/// and the topology analyses used to size worker pools.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    producer_of: HashMap<String, NodeId>,
    running_local: HashMap<JobId, NodeId>,
    running_remote: HashMap<JobId, NodeId>,
    completed_files: HashSet<String>,
    local_max: usize,
    remote_max: usize,
    local_running: usize,
    remote_running: usize,
}

impl Graph {
    pub fn new(local_max: usize, remote_max: usize) -> Self {
        Self {
            nodes: Vec::new(),
            producer_of: HashMap::new(),
            running_local: HashMap::new(),
            running_remote: HashMap::new(),
            completed_files: HashSet::new(),
            local_max: local_max.max(1),
            remote_max: remote_max.max(1),
            local_running: 0,
            remote_running: 0,
        }
    }

    /// Register a node, assigning it the next dense id. Rejects a duplicate
    /// target declaration (I2).
    pub fn add_node(
        &mut self,
        line: usize,
        command: String,
        local: bool,
        sources: Vec<String>,
        targets: Vec<String>,
    ) -> Result<NodeId, GraphError> {
        for t in &targets {
            if let Some(&existing) = self.producer_of.get(t) {
                return Err(GraphError::DuplicateTarget {
                    filename: t.clone(),
                    first_line: self.nodes[existing].line,
                    new_line: line,
                });
            }
        }

        let id = self.nodes.len();
        for t in &targets {
            self.producer_of.insert(t.clone(), id);
        }
        self.nodes.push(Node::new(id, line, command, local, sources, targets));
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    pub fn producer_of(&self, filename: &str) -> Option<NodeId> {
        self.producer_of.get(filename).copied()
    }

    pub fn is_file_completed(&self, filename: &str) -> bool {
        self.completed_files.contains(filename)
    }

    pub fn mark_file_completed(&mut self, filename: String) {
        self.completed_files.insert(filename);
    }

    pub fn unmark_file_completed(&mut self, filename: &str) {
        self.completed_files.remove(filename);
    }

    pub fn completed_files(&self) -> &HashSet<String> {
        &self.completed_files
    }

    pub fn local_running(&self) -> usize {
        self.local_running
    }

    pub fn remote_running(&self) -> usize {
        self.remote_running
    }

    pub fn local_max(&self) -> usize {
        self.local_max
    }

    pub fn remote_max(&self) -> usize {
        self.remote_max
    }

    /// Rightsize the remote concurrency cap, e.g. from an `-a width|group`
    /// auto-provisioning recommendation (spec.md §6 "-a", §4.3).
    pub fn set_remote_max(&mut self, max: usize) {
        self.remote_max = max.max(1);
    }

    pub fn running_table(&self, tier: Tier) -> &HashMap<JobId, NodeId> {
        match tier {
            Tier::Local => &self.running_local,
            Tier::Remote => &self.running_remote,
        }
    }

    /// Seed `completedFiles` with every source that isn't produced by any
    /// rule but is already present on disk (mirrors `dag_check` inserting
    /// untracked on-disk inputs into `completed_files` in the original).
    /// Safe to call even when the I1 validation below is skipped (`-A`),
    /// since a node's sources otherwise never become ready.
    pub fn seed_completed_from_disk(&mut self) {
        for i in 0..self.nodes.len() {
            let sources = self.nodes[i].sources.clone();
            for src in &sources {
                if !self.completed_files.contains(src) && !self.producer_of.contains_key(src) && Path::new(src).exists() {
                    self.completed_files.insert(src.clone());
                }
            }
        }
    }

    /// I1: every source of every node must be producible, already
    /// completed, or present on disk. `-A` (skip_precheck) is honored by
    /// the caller, which calls [`Graph::seed_completed_from_disk`] instead
    /// of this when it wants the seeding effect without the validation.
    pub fn precheck(&mut self) -> Result<(), GraphError> {
        self.seed_completed_from_disk();
        for node in &self.nodes {
            for src in &node.sources {
                let known = self.completed_files.contains(src) || self.producer_of.contains_key(src);
                if !known {
                    return Err(GraphError::MissingSource { filename: src.clone(), line: node.line });
                }
            }
        }
        Ok(())
    }

    /// Readiness predicate (spec.md "Readiness predicate"): WAITING, the
    /// node's tier has spare capacity, and every source is completed.
    pub fn is_ready(&self, id: NodeId) -> bool {
        let node = &self.nodes[id];
        if node.state != NodeState::Waiting {
            return false;
        }
        let (running, max) = match node.tier() {
            Tier::Local => (self.local_running, self.local_max),
            Tier::Remote => (self.remote_running, self.remote_max),
        };
        if running >= max {
            return false;
        }
        node.sources.iter().all(|s| self.completed_files.contains(s))
    }

    /// Record a submitted node as RUNNING under the given job id (I3, I4).
    pub fn record_running(&mut self, id: NodeId, job_id: JobId) {
        let tier = self.nodes[id].tier();
        self.nodes[id].state = NodeState::Running;
        self.nodes[id].job_id = Some(job_id);
        match tier {
            Tier::Local => {
                self.running_local.insert(job_id, id);
                self.local_running += 1;
            }
            Tier::Remote => {
                self.running_remote.insert(job_id, id);
                self.remote_running += 1;
            }
        }
    }

    /// Remove a job from the running table that tracks it, returning the
    /// node id it belonged to, if any.
    pub fn take_running(&mut self, job_id: JobId, tier: Tier) -> Option<NodeId> {
        let table = match tier {
            Tier::Local => &mut self.running_local,
            Tier::Remote => &mut self.running_remote,
        };
        let id = table.remove(&job_id)?;
        match tier {
            Tier::Local => self.local_running -= 1,
            Tier::Remote => self.remote_running -= 1,
        }
        Some(id)
    }

    /// Empty a tier's running table, returning every `(job_id, node_id)`
    /// pair it held. Used by abort to hand every outstanding job to the
    /// backend's `remove` before the nodes themselves are marked ABORTED.
    pub fn drain_running(&mut self, tier: Tier) -> Vec<(JobId, NodeId)> {
        let table = match tier {
            Tier::Local => {
                self.local_running = 0;
                &mut self.running_local
            }
            Tier::Remote => {
                self.remote_running = 0;
                &mut self.running_remote
            }
        };
        table.drain().collect()
    }

    /// Reinsert a node into its tier's running table without changing
    /// counters derived elsewhere (used by recovery repair for jobs
    /// assumed still executing on a backend that outlives the engine).
    pub fn reinsert_running(&mut self, id: NodeId, job_id: JobId, tier: Tier) {
        match tier {
            Tier::Local => {
                self.running_local.insert(job_id, id);
                self.local_running += 1;
            }
            Tier::Remote => {
                self.running_remote.insert(job_id, id);
                self.remote_running += 1;
            }
        }
    }

    /// I5: mark a node COMPLETE and add all its targets to `completedFiles`.
    pub fn mark_complete(&mut self, id: NodeId) {
        self.nodes[id].state = NodeState::Complete;
        let targets = self.nodes[id].targets.clone();
        for t in targets {
            self.completed_files.insert(t);
        }
    }

    pub fn state_counts(&self) -> StateCounts {
        let mut c = StateCounts::default();
        for n in &self.nodes {
            match n.state {
                NodeState::Waiting => c.waiting += 1,
                NodeState::Running => c.running += 1,
                NodeState::Complete => c.complete += 1,
                NodeState::Failed => c.failed += 1,
                NodeState::Aborted => c.aborted += 1,
            }
        }
        c
    }

    /// Reverse topological level: sinks (no consumer of their targets) are
    /// level 0; a node's level is one more than the max level among nodes
    /// that consume one of its targets. Width is the widest level.
    pub fn width(&mut self) -> usize {
        self.compute_children();

        let n = self.nodes.len();
        if n == 0 {
            return 0;
        }

        let mut ready: Vec<NodeId> = Vec::new();
        for id in 0..n {
            self.nodes[id].level = 0;
            if self.nodes[id].children_left == 0 {
                ready.push(id);
            }
        }

        let mut by_level: HashMap<usize, usize> = HashMap::new();
        let mut processed = 0usize;
        let mut idx = 0;
        while idx < ready.len() {
            let id = ready[idx];
            idx += 1;
            processed += 1;

            let level = self.nodes[id].level;
            *by_level.entry(level).or_insert(0) += 1;

            // Every producer of one of this node's sources is a "parent" in
            // the reverse graph; decrement its children_left and, once it
            // reaches zero, its level is final and it becomes ready.
            let sources = self.nodes[id].sources.clone();
            for src in sources {
                if let Some(&parent) = self.producer_of.get(&src) {
                    let candidate_level = level + 1;
                    if candidate_level > self.nodes[parent].level {
                        self.nodes[parent].level = candidate_level;
                    }
                    self.nodes[parent].children_left -= 1;
                    if self.nodes[parent].children_left == 0 {
                        ready.push(parent);
                    }
                }
            }
        }

        debug!(nodes = n, processed, "computed dag width");
        by_level.values().copied().max().unwrap_or(0)
    }

    /// For each node with exactly one producer-parent (all its sources
    /// produced by that one node), increment the parent's counter. Returns
    /// the maximum such counter, clamped to `ceiling`.
    pub fn largest_single_parent_group(&mut self, ceiling: u32) -> u32 {
        for n in &mut self.nodes {
            n.only_my_children = 0;
        }

        for id in 0..self.nodes.len() {
            let sources = self.nodes[id].sources.clone();
            if sources.is_empty() {
                continue;
            }
            let mut sole_parent: Option<NodeId> = None;
            let mut single = true;
            for src in &sources {
                match self.producer_of.get(src) {
                    Some(&p) => match sole_parent {
                        None => sole_parent = Some(p),
                        Some(existing) if existing == p => {}
                        Some(_) => {
                            single = false;
                            break;
                        }
                    },
                    None => {
                        single = false;
                        break;
                    }
                }
            }
            if single {
                if let Some(p) = sole_parent {
                    self.nodes[p].only_my_children += 1;
                }
            }
        }

        self.nodes.iter().map(|n| n.only_my_children).max().unwrap_or(0).min(ceiling)
    }

    /// `-a width|group`: recommend a worker count from a topology metric,
    /// never above `actual_max` and never below the node count at the
    /// deepest level.
    pub fn estimate_workers_needed(&mut self, mode: AutoProvision, actual_max: usize) -> usize {
        let metric = match mode {
            AutoProvision::Width => self.width(),
            AutoProvision::Group => self.largest_single_parent_group(actual_max as u32) as usize,
        };
        metric.clamp(1, actual_max.max(1))
    }

    fn compute_children(&mut self) {
        for n in &mut self.nodes {
            n.children.clear();
            n.children_left = 0;
        }
        for id in 0..self.nodes.len() {
            let sources = self.nodes[id].sources.clone();
            for src in sources {
                if let Some(&parent) = self.producer_of.get(&src) {
                    self.nodes[parent].children.push(id);
                    self.nodes[parent].children_left += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_chain() -> Graph {
        // a -> b -> c : b consumes a, c consumes b.
        let mut g = Graph::new(4, 4);
        g.mark_file_completed("a".into());
        g.add_node(1, "cp a b".into(), false, vec!["a".into()], vec!["b".into()]).unwrap();
        g.add_node(2, "cp b c".into(), false, vec!["b".into()], vec!["c".into()]).unwrap();
        g
    }

    #[test]
    fn duplicate_target_is_rejected() {
        let mut g = Graph::new(1, 1);
        g.add_node(1, "touch x".into(), false, vec![], vec!["x".into()]).unwrap();
        let err = g.add_node(2, "touch x".into(), false, vec![], vec!["x".into()]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTarget { first_line: 1, new_line: 2, .. }));
    }

    #[test]
    fn precheck_accepts_existing_producers_and_completed_files() {
        let mut g = linear_chain();
        assert!(g.precheck().is_ok());
    }

    #[test]
    fn precheck_seeds_completed_files_for_on_disk_untracked_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, b"hi").unwrap();
        let input_s = input.to_string_lossy().to_string();

        let mut g = Graph::new(1, 1);
        g.add_node(1, "cp input out".into(), false, vec![input_s.clone()], vec!["out".into()]).unwrap();
        assert!(!g.is_file_completed(&input_s));

        assert!(g.precheck().is_ok());
        assert!(g.is_file_completed(&input_s));
    }

    #[test]
    fn precheck_rejects_unknown_source() {
        let mut g = Graph::new(1, 1);
        g.add_node(1, "cat missing".into(), false, vec!["missing".into()], vec!["out".into()]).unwrap();
        assert!(g.precheck().is_err());
    }

    #[test]
    fn readiness_requires_completed_sources_and_spare_capacity() {
        let g = linear_chain();
        assert!(g.is_ready(0)); // b: a -- a is completed
        assert!(!g.is_ready(1)); // c: b -- b not completed yet
    }

    #[test]
    fn width_of_linear_chain_is_one() {
        let mut g = linear_chain();
        assert_eq!(g.width(), 1);
    }

    #[test]
    fn width_of_diamond_is_two() {
        let mut g = Graph::new(4, 4);
        g.mark_file_completed("a".into());
        g.add_node(1, "cp a b".into(), false, vec!["a".into()], vec!["b".into()]).unwrap();
        g.add_node(2, "cp a c".into(), false, vec!["a".into()], vec!["c".into()]).unwrap();
        g.add_node(3, "cat b c > d".into(), false, vec!["b".into(), "c".into()], vec!["d".into()]).unwrap();
        assert_eq!(g.width(), 2);
    }

    #[test]
    fn largest_single_parent_group_counts_sole_producer_children() {
        let mut g = Graph::new(4, 4);
        g.mark_file_completed("a".into());
        g.add_node(1, "split a".into(), false, vec!["a".into()], vec!["p".into()]).unwrap();
        g.add_node(2, "cp p x".into(), false, vec!["p".into()], vec!["x".into()]).unwrap();
        g.add_node(3, "cp p y".into(), false, vec!["p".into()], vec!["y".into()]).unwrap();
        g.add_node(4, "cp p z".into(), false, vec!["p".into()], vec!["z".into()]).unwrap();
        assert_eq!(g.largest_single_parent_group(100), 3);
        assert_eq!(g.largest_single_parent_group(2), 2);
    }
}
