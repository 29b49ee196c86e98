use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{
    OwnedRwLockReadGuard, OwnedRwLockWriteGuard, OwnedSemaphorePermit, RwLock, Semaphore, mpsc,
    oneshot,
};

use crate::context_scope::with_context;
use crate::execution::{ExecutionContext, Job};
use crate::models::{
    ConcurrencyMode, ContextLabel, DispatchError, DispatchErrorKind, DispatchResult,
};

/// Execution context backed by a tokio runtime.
///
/// A dispatcher task admits jobs strictly in arrival order through a fair
/// read/write gate: concurrent jobs share the gate, serial jobs and barriers
/// take it exclusively. Admitted jobs run on the runtime's blocking pool, so
/// they may block or sleep freely.
pub struct TokioExecutionContext {
    label: ContextLabel,
    mode: ConcurrencyMode,
    handle: Handle,
    sender: mpsc::UnboundedSender<Envelope>,
}

struct Envelope {
    job: Job,
    exclusive: bool,
    done: Option<oneshot::Sender<()>>,
}

enum GatePermit {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

impl TokioExecutionContext {
    pub fn serial(label: impl Into<ContextLabel>, handle: &Handle) -> Self {
        Self::spawn(label.into(), ConcurrencyMode::Serial, None, handle)
    }

    pub fn concurrent(label: impl Into<ContextLabel>, handle: &Handle) -> Self {
        Self::spawn(label.into(), ConcurrencyMode::Concurrent, None, handle)
    }

    pub fn concurrent_with_limit(
        label: impl Into<ContextLabel>,
        handle: &Handle,
        max_concurrency: usize,
    ) -> DispatchResult<Self> {
        let label = label.into();
        if max_concurrency == 0 {
            return Err(DispatchError::new(
                DispatchErrorKind::InvalidInput,
                "max concurrency must be greater than zero when provided",
            )
            .with_context(label));
        }
        Ok(Self::spawn(
            label,
            ConcurrencyMode::Concurrent,
            Some(max_concurrency),
            handle,
        ))
    }

    /// Builds a concurrent context, capped when `max_concurrency` is set.
    pub fn worker(
        label: impl Into<ContextLabel>,
        handle: &Handle,
        max_concurrency: Option<usize>,
    ) -> DispatchResult<Self> {
        match max_concurrency {
            Some(limit) => Self::concurrent_with_limit(label, handle, limit),
            None => Ok(Self::concurrent(label, handle)),
        }
    }

    fn spawn(
        label: ContextLabel,
        mode: ConcurrencyMode,
        max_concurrency: Option<usize>,
        handle: &Handle,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let limit = max_concurrency.map(|permits| Arc::new(Semaphore::new(permits)));
        handle.spawn(dispatch_loop(label.clone(), mode, limit, receiver));

        Self {
            label,
            mode,
            handle: handle.clone(),
            sender,
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        if self.sender.send(envelope).is_err() {
            tracing::warn!(
                context = %self.label,
                "execution context dispatcher has shut down; dropping job"
            );
        }
    }
}

impl ExecutionContext for TokioExecutionContext {
    fn label(&self) -> &ContextLabel {
        &self.label
    }

    fn concurrency_mode(&self) -> ConcurrencyMode {
        self.mode
    }

    fn submit(&self, job: Job) {
        self.dispatch(Envelope {
            job,
            exclusive: false,
            done: None,
        });
    }

    fn submit_after(&self, job: Job, delay: Duration) {
        let sender = self.sender.clone();
        let label = self.label.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let envelope = Envelope {
                job,
                exclusive: false,
                done: None,
            };
            if sender.send(envelope).is_err() {
                tracing::warn!(
                    context = %label,
                    delay = ?delay,
                    "execution context dispatcher shut down before delayed job was due"
                );
            }
        });
    }

    fn submit_and_wait(&self, job: Job) -> DispatchResult<()> {
        let (done_sender, done_receiver) = oneshot::channel();
        self.dispatch(Envelope {
            job,
            exclusive: false,
            done: Some(done_sender),
        });

        done_receiver.blocking_recv().map_err(|_| {
            DispatchError::new(
                DispatchErrorKind::ContextClosed,
                format!("job on context '{}' did not run to completion", self.label),
            )
            .with_context(self.label.clone())
        })
    }

    fn submit_barrier(&self, job: Job) {
        self.dispatch(Envelope {
            job,
            exclusive: true,
            done: None,
        });
    }
}

async fn dispatch_loop(
    label: ContextLabel,
    mode: ConcurrencyMode,
    limit: Option<Arc<Semaphore>>,
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
) {
    let gate = Arc::new(RwLock::new(()));

    while let Some(envelope) = receiver.recv().await {
        let exclusive = envelope.exclusive || mode == ConcurrencyMode::Serial;
        let permit = if exclusive {
            GatePermit::Exclusive(gate.clone().write_owned().await)
        } else {
            GatePermit::Shared(gate.clone().read_owned().await)
        };

        let slot: Option<OwnedSemaphorePermit> = match &limit {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(slot) => Some(slot),
                Err(_) => {
                    tracing::error!(context = %label, "concurrency limiter closed");
                    break;
                }
            },
            None => None,
        };

        tracing::trace!(context = %label, exclusive, "admitted job");
        tokio::spawn(run_admitted(label.clone(), envelope, permit, slot));
    }

    tracing::debug!(context = %label, "execution context dispatcher stopped");
}

async fn run_admitted(
    label: ContextLabel,
    envelope: Envelope,
    permit: GatePermit,
    slot: Option<OwnedSemaphorePermit>,
) {
    let Envelope { job, done, .. } = envelope;
    let job_label = label.clone();
    let outcome = tokio::task::spawn_blocking(move || with_context(&job_label, job)).await;
    drop(slot);
    drop(permit);

    match outcome {
        Ok(()) => {
            if let Some(done) = done {
                let _ = done.send(());
            }
        }
        Err(join_error) => {
            tracing::error!(
                context = %label,
                error = %join_error,
                "job panicked on execution context"
            );
        }
    }
}
