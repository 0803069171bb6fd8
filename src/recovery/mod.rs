mod log;
mod types;

pub use log::{repair, RecoveryLog};
pub use types::LogError;
