//! Integration-level scenario tests (spec.md §8 "Scenarios"). These drive
//! the real `Graph`/`Scheduler`/`RecoveryLog`/`Parser` together behind a
//! deterministic fake backend, without spawning real processes.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use makeflow::backend::{BackendAdapter, BackendError, JobInfo};
use makeflow::dag::{Graph, NodeState};
use makeflow::ids::JobId;
use makeflow::parser::{self, ParseError, ParserOptions};
use makeflow::recovery::RecoveryLog;
use makeflow::scheduler::{EngineContext, RunOutcome, Scheduler, SchedulerConfig};

/// Scripted outcomes, one per submission, served in submission order.
struct FakeBackend {
    next_id: u64,
    outcomes: VecDeque<JobInfo>,
    pending: VecDeque<JobId>,
}

impl FakeBackend {
    fn new(outcomes: Vec<JobInfo>) -> Self {
        Self { next_id: 1, outcomes: outcomes.into(), pending: VecDeque::new() }
    }

    fn always_succeeding() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl BackendAdapter for FakeBackend {
    async fn submit(&mut self, _command: &str, _inputs: &[String], _outputs: &[String]) -> Result<JobId, BackendError> {
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.pending.push_back(id);
        Ok(id)
    }

    async fn wait(&mut self, _deadline: Duration) -> Result<Option<(JobId, JobInfo)>, BackendError> {
        let Some(id) = self.pending.pop_front() else { return Ok(None) };
        let info = self.outcomes.pop_front().unwrap_or_else(JobInfo::success);
        Ok(Some((id, info)))
    }

    async fn remove(&mut self, _job_id: JobId) {}
    fn set_options(&mut self, _options: &str) {}
    fn set_log_file(&mut self, _path: &Path) {}
}

fn touch_targets_backend(paths: Vec<std::path::PathBuf>) -> FakeBackend {
    // The fake backend never runs a shell, so pre-create every file the
    // DAG's commands would have produced; target verification then passes
    // the same way it would against a real `cp`/`touch`.
    for p in &paths {
        std::fs::write(p, b"ok").unwrap();
    }
    FakeBackend::always_succeeding()
}

/// Scenario 1: linear chain `b: a` / `c: b`, `a` present on disk.
#[tokio::test]
async fn linear_chain_completes_in_order() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let c = dir.path().join("c");
    std::fs::write(&a, b"a").unwrap();

    let dag_text = format!("{b}: {a}\n\tcp {a} {b}\n{c}: {b}\n\tcp {b} {c}\n", a = a.display(), b = b.display(), c = c.display());

    let opts = ParserOptions::default();
    let rules = parser::parse(&dag_text, "Makeflow", None, &opts).unwrap();
    assert_eq!(rules.len(), 2);

    let mut graph = Graph::new(4, 4);
    graph.mark_file_completed(a.to_string_lossy().to_string());
    for rule in rules {
        graph.add_node(rule.line, rule.command, rule.local, rule.sources, rule.targets).unwrap();
    }

    let local = Box::new(touch_targets_backend(vec![b.clone(), c.clone()]));
    let remote = Box::new(FakeBackend::always_succeeding());

    let mut sched = Scheduler::new(graph, None, local, remote, SchedulerConfig::default(), EngineContext::new(), None);
    let outcome = sched.run().await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert!(sched.graph().iter().all(|n| n.state == NodeState::Complete));
    assert!(b.exists());
    assert!(c.exists());
}

/// Scenario 2: diamond `b: a`, `c: a`, `d: b c`; `d` must not dispatch
/// until both `b` and `c` are complete.
#[tokio::test]
async fn diamond_waits_for_both_parents_before_dispatching_sink() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let c = dir.path().join("c");
    let d = dir.path().join("d");
    std::fs::write(&a, b"a").unwrap();

    let mut graph = Graph::new(4, 2);
    graph.mark_file_completed(a.to_string_lossy().to_string());
    let a_s = a.to_string_lossy().to_string();
    let b_s = b.to_string_lossy().to_string();
    let c_s = c.to_string_lossy().to_string();
    let d_s = d.to_string_lossy().to_string();

    graph.add_node(1, format!("cp {a_s} {b_s}"), false, vec![a_s.clone()], vec![b_s.clone()]).unwrap();
    graph.add_node(2, format!("cp {a_s} {c_s}"), false, vec![a_s.clone()], vec![c_s.clone()]).unwrap();
    let d_id = graph.add_node(3, format!("cat {b_s} {c_s} > {d_s}"), false, vec![b_s.clone(), c_s.clone()], vec![d_s.clone()]).unwrap();

    // `d` is not ready while only one parent's target exists.
    std::fs::write(&b, b"b").unwrap();
    assert!(!graph.is_ready(d_id));

    std::fs::write(&c, b"c").unwrap();
    std::fs::write(&d, b"d").unwrap();

    let local = Box::new(FakeBackend::always_succeeding());
    let remote = Box::new(FakeBackend::always_succeeding());
    let mut sched = Scheduler::new(graph, None, local, remote, SchedulerConfig::default(), EngineContext::new(), None);
    let outcome = sched.run().await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert!(sched.graph().iter().all(|n| n.state == NodeState::Complete));
}

/// Scenario 3: a node whose command exits 101 (the retryable sentinel),
/// retry cap 3: resubmitted 3 times then FAILED, `failureCount == 4`.
#[tokio::test]
async fn sentinel_exit_code_retries_then_fails_with_expected_failure_count() {
    let mut graph = Graph::new(1, 1);
    graph.add_node(1, "exit 101".into(), false, vec![], vec![]).unwrap();

    let sentinel = JobInfo { exited_normally: true, exit_code: 101, exit_signal: None };
    let local = Box::new(FakeBackend::new(vec![sentinel; 4]));
    let remote = Box::new(FakeBackend::always_succeeding());

    let mut config = SchedulerConfig::default();
    config.retry.cap = 3;

    let mut sched = Scheduler::new(graph, None, local, remote, config, EngineContext::new(), None);
    let outcome = sched.run().await.unwrap();

    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(sched.graph().node(0).failure_count, 4);
    assert_eq!(sched.graph().node(0).state, NodeState::Failed);
}

/// Scenario 4: recovery mid-run. After `b` COMPLETE and `c` RUNNING, a log
/// replay restores those states; post-repair resets `c` to WAITING on a
/// backend that does not outlive the engine, cleaning its (nonexistent)
/// targets, and it is ready to be redispatched.
#[tokio::test]
async fn recovery_replay_resets_running_node_to_waiting() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("Makeflow.makeflowlog");

    let mut graph = Graph::new(4, 4);
    graph.mark_file_completed("a".into());
    graph.add_node(1, "cp a b".into(), false, vec!["a".into()], vec!["b".into()]).unwrap();
    graph.add_node(2, "cp b c".into(), false, vec!["b".into()], vec!["c".into()]).unwrap();

    {
        let mut log = RecoveryLog::open_and_replay(&log_path, &mut graph).unwrap();
        graph.record_running(0, JobId(1));
        log.record_transition(&graph, 0, Some(JobId(1))).unwrap();
        graph.mark_complete(0);
        log.record_transition(&graph, 0, Some(JobId(1))).unwrap();

        graph.record_running(1, JobId(2));
        log.record_transition(&graph, 1, Some(JobId(2))).unwrap();
    }

    let mut fresh = Graph::new(4, 4);
    fresh.add_node(1, "cp a b".into(), false, vec!["a".into()], vec!["b".into()]).unwrap();
    fresh.add_node(2, "cp b c".into(), false, vec!["b".into()], vec!["c".into()]).unwrap();

    let log = RecoveryLog::open_and_replay(&log_path, &mut fresh).unwrap();
    assert_eq!(fresh.node(0).state, NodeState::Complete);
    assert_eq!(fresh.node(1).state, NodeState::Running);
    // P4: replay must re-establish "b" in completed_files, or "c: b" can
    // never become ready once node 1 is reset below.
    assert!(fresh.is_file_completed("b"));

    let mut sched = Scheduler::new(
        fresh,
        Some(log),
        Box::new(FakeBackend::always_succeeding()),
        Box::new(FakeBackend::always_succeeding()),
        SchedulerConfig::default(),
        EngineContext::new(),
        None,
    );
    sched.repair(false, None);
    assert_eq!(sched.graph().node(1).state, NodeState::Waiting);
    assert_eq!(sched.graph().node(1).job_id, None);
    assert!(sched.graph().is_ready(1));
}

/// Scenario 5: duplicate target declarations are rejected at parse time,
/// with both the earlier and the new line number surfaced, and no log
/// file is ever written for a DAG that never started.
#[tokio::test]
async fn duplicate_target_is_a_parse_time_failure() {
    let dag_text = "x: a\n\ttouch x\nx: b\n\ttouch x\n";
    let opts = ParserOptions::default();
    let rules = parser::parse(dag_text, "Makeflow", None, &opts).unwrap();

    let mut graph = Graph::new(1, 1);
    let mut result = Ok(());
    for rule in rules {
        if let Err(e) = graph.add_node(rule.line, rule.command, rule.local, rule.sources, rule.targets) {
            result = Err(e);
            break;
        }
    }

    let err = result.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("line 1"));
    assert!(message.contains("line 3"));
}

/// A line with neither `:` nor `=` is a syntax error, not silently
/// skipped.
#[test]
fn malformed_line_is_reported_as_syntax_error() {
    let err = parser::parse("not a rule at all\n", "Makeflow", None, &ParserOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::Syntax { line: 1, .. }));
}
