mod scheduler;
mod types;

pub use scheduler::{Scheduler, SchedulerError};
pub use types::{EngineContext, RetryPolicy, RunOutcome, SchedulerConfig, SubmitPolicy};
