use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry-on-failure policy (spec.md §4.5 "Retry policy").
///
/// A node that reaches FAILED returns to WAITING when either retries are
/// globally enabled or its exit code is exactly the `101` retryable
/// sentinel, and its (already-incremented) `failureCount` does not exceed
/// `cap`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub cap: u32,
}

impl RetryPolicy {
    pub const RETRYABLE_EXIT_CODE: i32 = 101;

    pub fn default_cap() -> u32 {
        100
    }

    pub fn allows(&self, exit_code: Option<i32>, failure_count: u32) -> bool {
        let retryable = self.enabled || exit_code == Some(Self::RETRYABLE_EXIT_CODE);
        retryable && failure_count <= self.cap
    }
}

/// Submission retry/backoff policy (spec.md §4.5 "Submission").
#[derive(Debug, Clone, Copy)]
pub struct SubmitPolicy {
    pub deadline: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(3600),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Tunables for the main dispatch/completion loop.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub retry: RetryPolicy,
    pub submit: SubmitPolicy,
    /// The 5-second poll deadline used when a tier is the only one with
    /// running jobs (spec.md §4.5 "Completion drain").
    pub poll_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy { enabled: false, cap: RetryPolicy::default_cap() },
            submit: SubmitPolicy::default(),
            poll_deadline: Duration::from_secs(5),
        }
    }
}

/// Process-wide mutable flags, held outside the `Graph`/`Scheduler` proper
/// so a signal handler only ever touches an `AtomicBool` (spec.md §9
/// "Global mutable state", §5 "signal handlers must be async-signal-safe").
#[derive(Debug, Clone)]
pub struct EngineContext {
    abort_requested: Arc<AtomicBool>,
}

impl EngineContext {
    pub fn new() -> Self {
        Self { abort_requested: Arc::new(AtomicBool::new(false)) }
    }

    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort_requested.clone()
    }

    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

/// How the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every node reached COMPLETE.
    Completed,
    /// The dag-failed flag was raised and no progress remains.
    Failed,
    /// An abort signal was observed.
    Aborted,
}
