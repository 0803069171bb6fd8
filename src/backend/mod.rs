mod cluster;
mod local;
mod types;
mod worker_pool;

pub use cluster::ClusterBackend;
pub use local::LocalBackend;
pub use types::{BackendAdapter, BackendError, BackendKind, JobInfo};
pub use worker_pool::WorkerPoolBackend;
