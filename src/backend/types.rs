use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::JobId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("submission failed: {0}")]
    Submit(String),

    #[error("wait failed: {0}")]
    Wait(String),

    #[error("this backend is not available in this build: {0}")]
    Unsupported(&'static str),
}

/// What a completed job reported, mirroring a Unix wait status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobInfo {
    pub exited_normally: bool,
    pub exit_code: i32,
    pub exit_signal: Option<i32>,
}

impl JobInfo {
    pub fn success() -> Self {
        Self { exited_normally: true, exit_code: 0, exit_signal: None }
    }

    #[cfg(unix)]
    pub fn from_exit_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        match status.code() {
            Some(code) => Self { exited_normally: true, exit_code: code, exit_signal: None },
            None => Self { exited_normally: false, exit_code: -1, exit_signal: status.signal() },
        }
    }
}

/// Which concrete batch backend the engine was configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Local process fork.
    Local,
    /// A cluster batch queue (e.g. Condor/SLURM-style submission).
    Cluster,
    /// A distributed worker pool (work-queue-style).
    WorkerPool,
}

impl BackendKind {
    /// Backends that cannot mount arbitrary filesystem paths require
    /// filename translation during parsing (spec.md §4.2).
    pub fn sandboxes_files(&self) -> bool {
        matches!(self, BackendKind::Cluster | BackendKind::WorkerPool)
    }

    /// Only the cluster backend additionally needs a symlink materialized
    /// at parse time (spec.md §4.2, §4.4 `clean_symlinks`).
    pub fn materializes_symlinks(&self) -> bool {
        matches!(self, BackendKind::Cluster)
    }

    /// Whether a job this backend reports RUNNING at crash time is assumed
    /// to still be executing after the engine restarts (spec.md §4.4).
    pub fn outlives_engine(&self) -> bool {
        matches!(self, BackendKind::Cluster)
    }
}

/// Uniform interface the scheduler uses to submit and observe jobs,
/// regardless of which concrete batch system is behind it. The core never
/// assumes a backend is safe to call concurrently; the scheduler serializes
/// every call onto its single main loop.
#[async_trait]
pub trait BackendAdapter: Send {
    /// Submit `command` for execution. Non-blocking: returns as soon as
    /// the backend has accepted the job, without waiting for it to run.
    async fn submit(&mut self, command: &str, inputs: &[String], outputs: &[String]) -> Result<JobId, BackendError>;

    /// Block up to `deadline` for any one job to complete. `Ok(None)`
    /// means the deadline elapsed with nothing to report.
    async fn wait(&mut self, deadline: Duration) -> Result<Option<(JobId, JobInfo)>, BackendError>;

    /// Best-effort cancellation; the backend may not be able to kill a job
    /// already past the point of no return, in which case it is allowed to
    /// complete and will be reported normally on a later `wait`.
    async fn remove(&mut self, job_id: JobId);

    /// Side-channel passthrough for backend-specific submit options
    /// (`-B`/`BATCH_OPTIONS`).
    fn set_options(&mut self, options: &str);

    /// Side-channel passthrough for the backend's own log file (`-L`).
    fn set_log_file(&mut self, path: &Path);
}
