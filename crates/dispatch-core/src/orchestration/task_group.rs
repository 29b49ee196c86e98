use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::execution::{Job, SharedContext, job};
use crate::models::{DispatchError, DispatchErrorKind, DispatchResult, GroupTaskId};

pub type GroupOperation = Box<dyn FnOnce(CompletionSignal) + Send + 'static>;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(0);

/// One unit of work in a task group, bound to the context it runs on.
pub struct GroupTask {
    context: SharedContext,
    operation: GroupOperation,
}

impl GroupTask {
    pub fn new(
        context: SharedContext,
        operation: impl FnOnce(CompletionSignal) + Send + 'static,
    ) -> Self {
        Self {
            context,
            operation: Box::new(operation),
        }
    }
}

/// Fans out a set of tasks and runs a finalizer once all of them signal
/// completion.
///
/// Each `run` creates an independent group; nothing is shared between runs.
/// Tasks that never signal hold their group open indefinitely.
pub struct TaskGroupCoordinator;

impl TaskGroupCoordinator {
    pub fn run(
        tasks: Vec<GroupTask>,
        final_callback: impl FnOnce() + Send + 'static,
        target_context: SharedContext,
    ) -> TaskGroupHandle {
        let (handle, signals) = Self::open(tasks.len(), job(final_callback), target_context);

        for (task, signal) in tasks.into_iter().zip(signals) {
            let GroupTask { context, operation } = task;
            context.submit(job(move || operation(signal)));
        }

        handle
    }

    /// Creates the group state and one signal per task without scheduling
    /// anything. With zero tasks the finalizer is submitted right away.
    pub(crate) fn open(
        task_count: usize,
        final_callback: Job,
        target_context: SharedContext,
    ) -> (TaskGroupHandle, Vec<CompletionSignal>) {
        let (finished, finished_receiver) = watch::channel(false);
        let state = Arc::new(GroupState {
            group: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            pending: AtomicUsize::new(task_count),
            total: task_count,
            completed: (0..task_count).map(|_| AtomicBool::new(false)).collect(),
            on_all_complete: Mutex::new(Some(final_callback)),
            target: target_context,
            finished,
        });

        tracing::debug!(
            group = state.group,
            tasks = task_count,
            target = %state.target.label(),
            "opened task group"
        );

        if task_count == 0
            && let Err(error) = state.fire()
        {
            tracing::error!(
                group = state.group,
                kind = ?error.kind,
                message = %error.message,
                "failed to fire finalizer for empty task group"
            );
        }

        let signals = (0..task_count)
            .map(|index| CompletionSignal {
                id: GroupTaskId(index),
                state: state.clone(),
            })
            .collect();

        (
            TaskGroupHandle {
                state,
                finished: finished_receiver,
            },
            signals,
        )
    }
}

struct GroupState {
    group: u64,
    pending: AtomicUsize,
    total: usize,
    completed: Vec<AtomicBool>,
    on_all_complete: Mutex<Option<Job>>,
    target: SharedContext,
    finished: watch::Sender<bool>,
}

impl GroupState {
    fn fire(self: &Arc<Self>) -> DispatchResult<()> {
        let callback = self
            .on_all_complete
            .lock()
            .map_err(|_| {
                DispatchError::new(DispatchErrorKind::Internal, "task group mutex poisoned")
            })?
            .take();
        let Some(callback) = callback else {
            return Ok(());
        };

        tracing::debug!(
            group = self.group,
            target = %self.target.label(),
            "all group tasks completed; dispatching finalizer"
        );

        let state = self.clone();
        self.target.submit(job(move || {
            let _finished = MarkFinished(state);
            callback();
        }));
        Ok(())
    }
}

/// Publishes completion when the finalizer returns or unwinds.
struct MarkFinished(Arc<GroupState>);

impl Drop for MarkFinished {
    fn drop(&mut self) {
        self.0.finished.send_replace(true);
    }
}

/// Completion signal handed to exactly one group task.
///
/// Clones refer to the same task; only the first `complete` call counts.
#[derive(Clone)]
pub struct CompletionSignal {
    id: GroupTaskId,
    state: Arc<GroupState>,
}

impl CompletionSignal {
    pub fn task_id(&self) -> GroupTaskId {
        self.id
    }

    pub fn complete(&self) -> DispatchResult<()> {
        let state = &self.state;
        if state.completed[self.id.0].swap(true, Ordering::SeqCst) {
            tracing::error!(
                group = state.group,
                task = self.id.0,
                "task signalled completion more than once"
            );
            return Err(DispatchError::new(
                DispatchErrorKind::DoubleCompletion,
                format!(
                    "task {} in group {} signalled completion more than once",
                    self.id.0, state.group
                ),
            )
            .with_context(state.target.label().clone())
            .with_task(self.id));
        }

        let previous = state
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                pending.checked_sub(1)
            })
            .map_err(|_| {
                DispatchError::new(
                    DispatchErrorKind::Internal,
                    format!("group {} has no pending tasks left", state.group),
                )
                .with_task(self.id)
            })?;

        tracing::debug!(
            group = state.group,
            task = self.id.0,
            remaining = previous - 1,
            "group task completed"
        );

        if previous == 1 {
            state.fire()?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct TaskGroupHandle {
    state: Arc<GroupState>,
    finished: watch::Receiver<bool>,
}

impl TaskGroupHandle {
    pub fn total(&self) -> usize {
        self.state.total
    }

    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// True once the finalizer has finished running, even if it panicked.
    pub fn is_complete(&self) -> bool {
        *self.finished.borrow()
    }

    /// Waits for the finalizer to finish running. A bounded wait that elapses yields
    /// `Timeout` and leaves the group running.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> DispatchResult<()> {
        let mut receiver = self.finished.clone();
        let group = self.state.group;
        let wait = async move {
            receiver
                .wait_for(|finished| *finished)
                .await
                .map(|_| ())
                .map_err(|_| {
                    DispatchError::new(
                        DispatchErrorKind::Internal,
                        format!("completion channel for group {group} closed"),
                    )
                })
        };

        match timeout {
            Some(duration) => tokio::time::timeout(duration, wait).await.map_err(|_| {
                DispatchError::new(
                    DispatchErrorKind::Timeout,
                    format!(
                        "timed out waiting for group {group} with {} pending task(s)",
                        self.pending()
                    ),
                )
                .with_context(self.state.target.label().clone())
            })?,
            None => wait.await,
        }
    }
}
