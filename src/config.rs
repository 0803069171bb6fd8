//! CLI surface and the `EngineConfig` it (and the environment) populate
//! (spec.md §6 "CLI surface", "Environment consumed"; SPEC_FULL.md
//! "Configuration"). Mirrors the teacher's use of `clap`'s derive API for
//! its own binary entry point.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::backend::BackendKind;
use crate::dag::AutoProvision;
use crate::scheduler::{RetryPolicy, SubmitPolicy};

#[derive(Parser, Debug)]
#[command(name = "makeflow", version, about = "Drive a DAG of shell commands to completion")]
pub struct Cli {
    /// DAG description file. Defaults to `./Makeflow`.
    #[arg()]
    pub dagfile: Option<PathBuf>,

    /// Remove every target file this DAG would produce, then exit.
    #[arg(short = 'c')]
    pub clean: bool,

    /// Batch system type: local, cluster, or wq (worker pool).
    #[arg(short = 'T', value_name = "TYPE")]
    pub backend: Option<String>,

    /// Max concurrent local jobs.
    #[arg(short = 'j', value_name = "N")]
    pub local_jobs: Option<usize>,

    /// Max concurrent remote jobs.
    #[arg(short = 'J', value_name = "N")]
    pub remote_jobs: Option<usize>,

    /// Port the distributed worker pool master listens on.
    #[arg(short = 'p', value_name = "PORT")]
    pub port: Option<u16>,

    /// Syntax-check the DAG file and exit without running anything.
    #[arg(short = 'C')]
    pub syntax_check: bool,

    /// Emit the DAG as Graphviz `digraph` source on stdout and exit.
    #[arg(short = 'D')]
    pub emit_graph: bool,

    /// Backend-specific submit options, passed through as-is.
    #[arg(short = 'B', value_name = "OPTS")]
    pub backend_options: Option<String>,

    /// Submission retry deadline, in seconds.
    #[arg(short = 'S', value_name = "SECS")]
    pub submit_timeout: Option<u64>,

    /// Enable retry with the given cap.
    #[arg(short = 'r', value_name = "N")]
    pub retry_cap: Option<u32>,

    /// Enable retry with the default cap (100).
    #[arg(short = 'R')]
    pub retry_default: bool,

    /// Engine (recovery) log path. Defaults to `<dagfile>.makeflowlog`.
    #[arg(short = 'l', value_name = "PATH")]
    pub engine_log: Option<PathBuf>,

    /// Backend-specific log path, passed to `set_log_file`.
    #[arg(short = 'L', value_name = "PATH")]
    pub backend_log: Option<PathBuf>,

    /// Skip the filesystem precheck (I1) before scheduling.
    #[arg(short = 'A')]
    pub skip_precheck: bool,

    /// Preserve translation symlinks on exit instead of unlinking them.
    #[arg(short = 'P')]
    pub preserve_symlinks: bool,

    /// Announce this project name to the catalog server.
    #[arg(short = 'N', value_name = "NAME")]
    pub project_name: Option<String>,

    /// Catalog announcement priority.
    #[arg(short = 'E', value_name = "N")]
    pub priority: Option<i32>,

    /// Auto-provision worker count from a topology metric: width or group.
    #[arg(short = 'a', value_name = "width|group")]
    pub auto_provision: Option<String>,

    /// Restrict debug output to a comma-separated list of subsystems.
    #[arg(short = 'd', value_name = "SUBSYS")]
    pub debug_subsystems: Option<String>,

    /// Redirect engine log/debug output to this path.
    #[arg(short = 'o', value_name = "PATH")]
    pub debug_output: Option<PathBuf>,
}

/// Resolved configuration: CLI flags folded over environment overrides
/// folded over built-in defaults, in that order of precedence
/// (SPEC_FULL.md "Configuration").
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dagfile: PathBuf,
    pub clean: bool,
    pub backend: BackendKind,
    pub local_jobs: usize,
    pub remote_jobs: usize,
    pub port: Option<u16>,
    pub syntax_check: bool,
    pub emit_graph: bool,
    pub backend_options: Option<String>,
    pub submit: SubmitPolicy,
    pub retry: RetryPolicy,
    pub engine_log: Option<PathBuf>,
    pub backend_log: Option<PathBuf>,
    pub skip_precheck: bool,
    pub preserve_symlinks: bool,
    pub project_name: Option<String>,
    pub priority: i32,
    pub auto_provision: Option<AutoProvision>,
    pub debug_subsystems: Vec<String>,
    pub debug_output: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unknown batch system type '{0}' (expected local, cluster, or wq)")]
    UnknownBackend(String),
    #[error("-a expects 'width' or 'group', got '{0}'")]
    UnknownAutoProvision(String),
}

impl EngineConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let backend = match cli.backend.as_deref() {
            None => BackendKind::Local,
            Some("local") => BackendKind::Local,
            Some("cluster" | "condor" | "batch") => BackendKind::Cluster,
            Some("wq" | "workqueue" | "worker-pool") => BackendKind::WorkerPool,
            Some(other) => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let auto_provision = match cli.auto_provision.as_deref() {
            None => None,
            Some("width") => Some(AutoProvision::Width),
            Some("group") => Some(AutoProvision::Group),
            Some(other) => return Err(ConfigError::UnknownAutoProvision(other.to_string())),
        };

        let env_usize = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<usize>().ok());
        let default_parallelism = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

        let local_jobs = cli.local_jobs.or_else(|| env_usize("MAKEFLOW_MAX_LOCAL_JOBS")).unwrap_or(default_parallelism);
        let remote_jobs = cli.remote_jobs.or_else(|| env_usize("MAKEFLOW_MAX_REMOTE_JOBS")).unwrap_or(100);

        let backend_options = cli.backend_options.or_else(|| std::env::var("BATCH_OPTIONS").ok());

        let retry = if let Some(cap) = cli.retry_cap {
            RetryPolicy { enabled: true, cap }
        } else if cli.retry_default {
            RetryPolicy { enabled: true, cap: RetryPolicy::default_cap() }
        } else {
            RetryPolicy { enabled: false, cap: RetryPolicy::default_cap() }
        };

        let submit = SubmitPolicy {
            deadline: cli.submit_timeout.map(Duration::from_secs).unwrap_or(SubmitPolicy::default().deadline),
            ..SubmitPolicy::default()
        };

        let debug_subsystems = cli
            .debug_subsystems
            .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        Ok(Self {
            dagfile: cli.dagfile.unwrap_or_else(|| PathBuf::from("./Makeflow")),
            clean: cli.clean,
            backend,
            local_jobs,
            remote_jobs,
            port: cli.port,
            syntax_check: cli.syntax_check,
            emit_graph: cli.emit_graph,
            backend_options,
            submit,
            retry,
            engine_log: cli.engine_log,
            backend_log: cli.backend_log,
            skip_precheck: cli.skip_precheck,
            preserve_symlinks: cli.preserve_symlinks,
            project_name: cli.project_name,
            priority: cli.priority.unwrap_or(0),
            auto_provision,
            debug_subsystems,
            debug_output: cli.debug_output,
        })
    }

    /// Where the recovery log lives when `-l` wasn't given: alongside the
    /// dag file, with a `.makeflowlog` suffix.
    pub fn engine_log_path(&self) -> PathBuf {
        self.engine_log.clone().unwrap_or_else(|| {
            let mut name = self.dagfile.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            name.push(".makeflowlog");
            self.dagfile.with_file_name(name)
        })
    }
}
