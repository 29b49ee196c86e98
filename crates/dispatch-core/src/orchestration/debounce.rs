use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::execution::{ExecutionContext, job};
use crate::models::OperationState;

const SCHEDULED: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELLED: u8 = 3;

/// Cooperative cancellation state of one debounced submission.
///
/// `Scheduled` moves to either `Cancelled` or `Running`, and the first
/// transition wins. A running operation is never interrupted.
#[derive(Debug)]
struct OperationCell {
    state: AtomicU8,
}

impl OperationCell {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SCHEDULED),
        }
    }

    fn cancel(&self) -> bool {
        self.transition(SCHEDULED, CANCELLED)
    }

    fn begin(&self) -> bool {
        self.transition(SCHEDULED, RUNNING)
    }

    fn finish(&self) {
        self.transition(RUNNING, COMPLETED);
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn state(&self) -> OperationState {
        match self.state.load(Ordering::SeqCst) {
            SCHEDULED => OperationState::Scheduled,
            RUNNING => OperationState::Running,
            COMPLETED => OperationState::Completed,
            _ => OperationState::Cancelled,
        }
    }
}

struct FinishOnDrop(Arc<OperationCell>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Handle to one particular debounced submission.
#[derive(Clone, Debug)]
pub struct DebounceTicket {
    cell: Arc<OperationCell>,
}

impl DebounceTicket {
    pub fn state(&self) -> OperationState {
        self.cell.state()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == OperationState::Cancelled
    }
}

#[derive(Default)]
struct DebounceSlot {
    inner: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    current: Option<Arc<OperationCell>>,
    superseded_cancelled: bool,
}

/// Collapses rapid submissions per key so that only the latest one runs,
/// once its delay has elapsed without a newer submission.
pub struct DebouncedCanceller<K> {
    slots: Mutex<HashMap<K, Arc<DebounceSlot>>>,
}

impl<K> Default for DebouncedCanceller<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> DebouncedCanceller<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(
        &self,
        key: K,
        operation: impl FnOnce() + Send + 'static,
        delay: Duration,
        context: &dyn ExecutionContext,
    ) -> DebounceTicket {
        let slot = self.slot_or_insert(&key);
        let cell = Arc::new(OperationCell::new());

        let superseded = {
            let mut state = lock(&slot.inner);
            let superseded = state
                .current
                .replace(cell.clone())
                .is_some_and(|previous| previous.cancel());
            state.superseded_cancelled = superseded;
            superseded
        };

        tracing::debug!(
            key = ?key,
            superseded,
            delay = ?delay,
            context = %context.label(),
            "scheduled debounced operation"
        );

        let scheduled = cell.clone();
        context.submit_after(
            job(move || {
                if !scheduled.begin() {
                    tracing::trace!(key = ?key, "skipping cancelled debounced operation");
                    return;
                }
                let _finish = FinishOnDrop(scheduled);
                operation();
            }),
            delay,
        );

        DebounceTicket { cell }
    }

    /// Cancels the pending operation for `key` without scheduling a new one.
    /// Returns false when nothing was waiting to run.
    pub fn cancel(&self, key: &K) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        let state = lock(&slot.inner);
        let cancelled = state.current.as_ref().is_some_and(|cell| cell.cancel());
        if cancelled {
            tracing::debug!(key = ?key, "cancelled debounced operation");
        }
        cancelled
    }

    /// True when the latest operation for `key` was cancelled directly, or when
    /// the latest submission cancelled its predecessor and has not started yet.
    /// Unknown keys report false.
    pub fn is_cancelled(&self, key: &K) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        let state = lock(&slot.inner);
        match state.current.as_ref().map(|cell| cell.state()) {
            Some(OperationState::Cancelled) => true,
            Some(OperationState::Scheduled) => state.superseded_cancelled,
            _ => false,
        }
    }

    pub fn state(&self, key: &K) -> Option<OperationState> {
        let slot = self.slot(key)?;
        let state = lock(&slot.inner);
        state.current.as_ref().map(|cell| cell.state())
    }

    fn slot(&self, key: &K) -> Option<Arc<DebounceSlot>> {
        lock(&self.slots).get(key).cloned()
    }

    fn slot_or_insert(&self, key: &K) -> Arc<DebounceSlot> {
        lock(&self.slots)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(DebounceSlot::default()))
            .clone()
    }
}

// No user code runs while these locks are held, so a poisoned guard still
// protects consistent state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
