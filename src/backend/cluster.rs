use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::ids::JobId;

use super::types::{BackendAdapter, BackendError, JobInfo};

/// Interface-only scaffold for a cluster batch queue (Condor/SLURM-style
/// submission). Submitting a real job to an external scheduler is out of
/// scope here; this exists so the engine can be wired against the same
/// [`BackendAdapter`] contract regardless of which backend a deployment
/// eventually plugs in.
pub struct ClusterBackend {
    options: Option<String>,
    log_file: Option<PathBuf>,
}

impl ClusterBackend {
    pub fn new() -> Self {
        Self { options: None, log_file: None }
    }
}

impl Default for ClusterBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for ClusterBackend {
    async fn submit(&mut self, _command: &str, _inputs: &[String], _outputs: &[String]) -> Result<JobId, BackendError> {
        Err(BackendError::Unsupported("cluster backend"))
    }

    async fn wait(&mut self, _deadline: Duration) -> Result<Option<(JobId, JobInfo)>, BackendError> {
        Err(BackendError::Unsupported("cluster backend"))
    }

    async fn remove(&mut self, _job_id: JobId) {}

    fn set_options(&mut self, options: &str) {
        self.options = Some(options.to_string());
    }

    fn set_log_file(&mut self, path: &Path) {
        self.log_file = Some(path.to_path_buf());
    }
}
