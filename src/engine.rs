//! Orchestration: ties Parser → Graph → (optional) RecoveryLog replay →
//! Scheduler ↔ BackendAdapter together behind the four run modes the CLI
//! exposes (spec.md §2 "Data flow", §6 "CLI surface").

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::info;

use crate::backend::{BackendAdapter, ClusterBackend, LocalBackend, WorkerPoolBackend};
use crate::catalog::{Catalog, CatalogConfig};
use crate::clean;
use crate::config::EngineConfig;
use crate::dag::Graph;
use crate::graphviz;
use crate::parser::{self, ParserOptions};
use crate::recovery::RecoveryLog;
use crate::scheduler::{EngineContext, RunOutcome, Scheduler, SchedulerConfig};
use crate::translate::FilenameTranslator;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("couldn't read dag file {path}: {source}")]
    ReadDagFile { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Parse(#[from] crate::parser::ParseError),

    #[error(transparent)]
    Graph(#[from] crate::dag::GraphError),

    #[error(transparent)]
    Log(#[from] crate::recovery::LogError),

    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::SchedulerError),
}

struct Dag {
    graph: Graph,
    translator: FilenameTranslator,
}

/// Read, translate, and build the in-memory DAG. `execution_mode` is
/// false for `-c`/`-D`/`-C`, so sandboxed filenames are still translated
/// (commands print/clean correctly) but no symlink is materialized
/// (spec.md §4.2 "Filename handling during parse").
fn build_dag(config: &EngineConfig, execution_mode: bool) -> Result<Dag, EngineError> {
    let text = std::fs::read_to_string(&config.dagfile)
        .map_err(|source| EngineError::ReadDagFile { path: config.dagfile.clone(), source })?;

    let mut translator = FilenameTranslator::new();
    let opts = ParserOptions {
        sandbox_files: config.backend.sandboxes_files(),
        materialize_symlinks: config.backend.materializes_symlinks(),
        execution_mode,
    };

    let file_label = config.dagfile.display().to_string();
    let rules = parser::parse(&text, &file_label, Some(&mut translator), &opts)?;

    let mut graph = Graph::new(config.local_jobs, config.remote_jobs);
    for rule in rules {
        graph.add_node(rule.line, rule.command, rule.local, rule.sources, rule.targets)?;
    }

    Ok(Dag { graph, translator })
}

/// `-C`: validate the DAG (every source resolvable) without scheduling
/// anything (spec.md §7 (b) "Precheck errors"; SPEC_FULL.md `dag_check`).
pub fn check(config: &EngineConfig) -> Result<(), EngineError> {
    let mut dag = build_dag(config, false)?;
    dag.graph.precheck()?;
    info!(nodes = dag.graph.len(), "dag is well-formed");
    Ok(())
}

/// `-c`: remove every node's target files (and sandbox symlinks), then
/// clear `completedFiles`.
pub fn clean(config: &EngineConfig) -> Result<(), EngineError> {
    let mut dag = build_dag(config, false)?;
    clean::clean_dag(&mut dag.graph, &dag.translator, config.backend.sandboxes_files(), false);
    Ok(())
}

/// `-D`: print the DAG as Graphviz source.
pub fn emit_graph(config: &EngineConfig) -> Result<(), EngineError> {
    let dag = build_dag(config, false)?;
    let rendered = graphviz::render(&dag.graph, |id| dag.graph.node(id).command.clone());
    print!("{rendered}");
    Ok(())
}

/// Execute the DAG: the default mode.
pub async fn run(config: &EngineConfig) -> Result<RunOutcome, EngineError> {
    let mut dag = build_dag(config, true)?;

    // Seed `completedFiles` from disk even under `-A`: without this, a
    // source file that already exists but isn't produced by any rule
    // never satisfies readiness (spec.md §3 I1; §6 `-A`).
    if config.skip_precheck {
        dag.graph.seed_completed_from_disk();
    } else {
        dag.graph.precheck()?;
    }

    if let Some(mode) = config.auto_provision {
        let ceiling = dag.graph.remote_max();
        let recommended = dag.graph.estimate_workers_needed(mode, ceiling);
        info!(?mode, recommended, ceiling, "auto-provisioning recommendation, sizing remote concurrency accordingly");
        dag.graph.set_remote_max(recommended);
    }

    let log_path = config.engine_log_path();
    let log = RecoveryLog::open_and_replay(&log_path, &mut dag.graph)?;

    let ctx = EngineContext::new();
    let abort_flag = ctx.abort_flag();
    let _ = ctrlc::set_handler(move || {
        abort_flag.store(true, Ordering::SeqCst);
    });

    let local_backend: Box<dyn BackendAdapter> = Box::new(configured_local_backend(config));
    let remote_backend: Box<dyn BackendAdapter> = configured_remote_backend(config);

    let catalog = match &config.project_name {
        Some(project) => match bind_catalog(config, project).await {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(error = %e, "couldn't start catalog announcements, continuing without them");
                None
            }
        },
        None => None,
    };

    let scheduler_config = SchedulerConfig { retry: config.retry, submit: config.submit, poll_deadline: Duration::from_secs(5) };
    let mut scheduler = Scheduler::new(dag.graph, Some(log), local_backend, remote_backend, scheduler_config, ctx, catalog);
    scheduler.repair(config.backend.outlives_engine(), Some(&dag.translator));

    let outcome = scheduler.run().await?;

    if !config.preserve_symlinks {
        dag.translator.unlink_all(false);
    }

    Ok(outcome)
}

fn configured_local_backend(config: &EngineConfig) -> LocalBackend {
    let mut backend = LocalBackend::new();
    if let Some(opts) = &config.backend_options {
        backend.set_options(opts);
    }
    backend
}

fn configured_remote_backend(config: &EngineConfig) -> Box<dyn BackendAdapter> {
    let mut backend: Box<dyn BackendAdapter> = match config.backend {
        crate::backend::BackendKind::Local => Box::new(LocalBackend::new()),
        crate::backend::BackendKind::Cluster => Box::new(ClusterBackend::new()),
        crate::backend::BackendKind::WorkerPool => Box::new(WorkerPoolBackend::new()),
    };
    if let Some(opts) = &config.backend_options {
        backend.set_options(opts);
    }
    if let Some(path) = &config.backend_log {
        backend.set_log_file(path);
    }
    backend
}

async fn bind_catalog(config: &EngineConfig, project: &str) -> std::io::Result<Catalog> {
    let catalog_config = CatalogConfig {
        project: project.to_string(),
        port: config.port.unwrap_or(0),
        priority: config.priority,
        catalog_addr: std::env::var("MAKEFLOW_CATALOG_SERVER").unwrap_or_else(|_| "catalog.cse.nd.edu:9097".to_string()),
        period: CatalogConfig::default_period(),
    };
    Catalog::bind(catalog_config).await
}
