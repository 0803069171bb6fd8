use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::ids::JobId;

use super::types::{BackendAdapter, BackendError, JobInfo};

/// Runs jobs as real child processes on this machine via `sh -c`. The only
/// backend this crate implements end to end; `cluster`/`worker_pool` are
/// scaffolds over the same [`BackendAdapter`] interface.
pub struct LocalBackend {
    next_id: u64,
    children: HashMap<JobId, Child>,
    options: Option<String>,
    log_file: Option<PathBuf>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self { next_id: 1, children: HashMap::new(), options: None, log_file: None }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for LocalBackend {
    async fn submit(&mut self, command: &str, _inputs: &[String], _outputs: &[String]) -> Result<JobId, BackendError> {
        let job_id = JobId(self.next_id);
        self.next_id += 1;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.kill_on_drop(true);
        if let Some(opts) = &self.options {
            cmd.env("BATCH_OPTIONS", opts);
        }

        let child = cmd.spawn().map_err(|e| BackendError::Submit(e.to_string()))?;
        debug!(job = job_id.0, %command, "submitted local job");
        self.children.insert(job_id, child);
        Ok(job_id)
    }

    async fn wait(&mut self, deadline: Duration) -> Result<Option<(JobId, JobInfo)>, BackendError> {
        if self.children.is_empty() {
            return Ok(None);
        }

        let start = Instant::now();
        loop {
            let mut finished = None;
            for (&id, child) in self.children.iter_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        finished = Some((id, JobInfo::from_exit_status(status)));
                        break;
                    }
                    Ok(None) => continue,
                    Err(e) => return Err(BackendError::Wait(e.to_string())),
                }
            }

            if let Some((id, info)) = finished {
                self.children.remove(&id);
                return Ok(Some((id, info)));
            }

            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Ok(None);
            }
            tokio::time::sleep((deadline - elapsed).min(Duration::from_millis(100))).await;
        }
    }

    async fn remove(&mut self, job_id: JobId) {
        if let Some(mut child) = self.children.remove(&job_id) {
            let _ = child.start_kill();
        }
    }

    fn set_options(&mut self, options: &str) {
        self.options = Some(options.to_string());
    }

    fn set_log_file(&mut self, path: &Path) {
        self.log_file = Some(path.to_path_buf());
    }
}
