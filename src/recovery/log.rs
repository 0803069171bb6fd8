use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::dag::{Graph, NodeState, Tier};
use crate::ids::JobId;

use super::types::LogError;

/// Append-only, fsync'd record of every node state transition, used to
/// resume a workflow after a crash.
pub struct RecoveryLog {
    file: File,
    path: PathBuf,
}

impl RecoveryLog {
    /// Replay an existing log (if any) into `graph`, then reopen it in
    /// append mode for the run ahead.
    pub fn open_and_replay(path: &Path, graph: &mut Graph) -> Result<Self, LogError> {
        if path.exists() {
            replay(path, graph)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| LogError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { file, path: path.to_path_buf() })
    }

    /// Append one state-transition record and fsync before returning, so a
    /// crash immediately after this call never loses a transition that was
    /// reported to have happened (spec: crash-consistency).
    pub fn record_transition(&mut self, graph: &Graph, node_id: usize, job_id: Option<JobId>) -> Result<(), LogError> {
        let node = graph.node(node_id);
        let counts = graph.state_counts();
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);

        let line = format!(
            "{ts} {id} {state} {job} {w} {r} {c} {f} {a} {total}\n",
            ts = ts,
            id = node_id,
            state = node.state.as_u8(),
            job = job_id.map(|j| j.0).unwrap_or(0),
            w = counts.waiting,
            r = counts.running,
            c = counts.complete,
            f = counts.failed,
            a = counts.aborted,
            total = graph.len(),
        );

        self.file.write_all(line.as_bytes()).map_err(io_err(&self.path))?;
        self.file.flush().map_err(io_err(&self.path))?;
        self.file.sync_all().map_err(io_err(&self.path))?;
        Ok(())
    }
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> LogError + '_ {
    move |e| LogError::Io { path: path.display().to_string(), message: e.to_string() }
}

fn replay(path: &Path, graph: &mut Graph) -> Result<(), LogError> {
    let file = File::open(path).map_err(|e| LogError::Io { path: path.display().to_string(), message: e.to_string() })?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| LogError::Io { path: path.display().to_string(), message: e.to_string() })?;
        if line.trim().is_empty() {
            continue;
        }

        let corrupted = || LogError::Corrupted { path: path.display().to_string(), line: line_no };

        let mut fields = line.split_whitespace();
        let _ts: u64 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(corrupted)?;
        let node_id: usize = fields.next().and_then(|f| f.parse().ok()).ok_or_else(corrupted)?;
        let state_raw: u8 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(corrupted)?;
        let job_id: u64 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(corrupted)?;

        if node_id >= graph.len() {
            // The original engine treats a well-formed record for an
            // unknown node id the same as a malformed one: the log and
            // the DAG must agree on every id it mentions.
            return Err(corrupted());
        }

        let state = NodeState::from_u8(state_raw).ok_or_else(corrupted)?;
        {
            let node = graph.node_mut(node_id);
            node.state = state;
            node.job_id = if job_id == 0 { None } else { Some(JobId(job_id)) };
        }

        // I5: a replayed COMPLETE record must re-establish its targets in
        // `completedFiles`, or a downstream consumer can never become
        // ready after recovery (spec.md §8 P4 replay idempotence).
        if state == NodeState::Complete {
            let targets = graph.node(node_id).targets.clone();
            for t in targets {
                graph.mark_file_completed(t);
            }
        }
    }

    Ok(())
}

/// Post-replay repair (spec.md §4.4): reconcile RUNNING/FAILED nodes with
/// reality before the scheduler resumes dispatching.
///
/// `node_was_running` callbacks are the caller's clean-up hook (unlinking
/// target files) so this module stays filesystem-agnostic beyond that.
pub fn repair<F>(graph: &mut Graph, backend_outlives_engine: bool, mut clean_targets: F)
where
    F: FnMut(&mut Graph, usize),
{
    let ids: Vec<usize> = graph.ids().collect();
    for id in ids {
        let node = graph.node(id);
        let state = node.state;
        let tier = node.tier();
        let job_id = node.job_id;

        match state {
            NodeState::Running if tier == Tier::Remote && backend_outlives_engine => {
                if let Some(jid) = job_id {
                    info!(node = id, "rule still running on a backend that outlives the engine");
                    graph.reinsert_running(id, jid, Tier::Remote);
                }
            }
            NodeState::Running | NodeState::Failed => {
                info!(node = id, "will retry rule after recovery");
                clean_targets(graph, id);
                graph.node_mut(id).state = NodeState::Waiting;
            }
            NodeState::Complete | NodeState::Aborted => {}
            NodeState::Waiting => {}
        }
    }
}
