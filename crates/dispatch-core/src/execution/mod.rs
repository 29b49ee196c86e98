pub mod tokio_context;

pub use tokio_context::TokioExecutionContext;

use std::sync::Arc;
use std::time::Duration;

use crate::models::{ConcurrencyMode, ContextLabel, DispatchResult};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub type SharedContext = Arc<dyn ExecutionContext>;

pub fn job(operation: impl FnOnce() + Send + 'static) -> Job {
    Box::new(operation)
}

/// A scheduling domain that runs jobs now or after a delay.
///
/// Serial contexts run jobs one at a time in submission order. Concurrent
/// contexts may run jobs in parallel and give no ordering guarantee.
pub trait ExecutionContext: Send + Sync {
    fn label(&self) -> &ContextLabel;

    fn concurrency_mode(&self) -> ConcurrencyMode;

    fn submit(&self, job: Job);

    /// Runs `job` no earlier than `delay` from now. No upper bound is implied.
    fn submit_after(&self, job: Job, delay: Duration);

    /// Blocks the calling thread until `job` has finished.
    ///
    /// Calling this from a job running on the same serial context deadlocks.
    /// Calling it from inside an async task panics.
    fn submit_and_wait(&self, job: Job) -> DispatchResult<()>;

    /// Runs `job` alone: after every earlier job has finished and before any
    /// later job starts.
    fn submit_barrier(&self, job: Job);
}
