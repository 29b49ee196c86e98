use std::cell::RefCell;

use crate::models::ContextLabel;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<ContextLabel>> = const { RefCell::new(None) };
}

/// Label of the execution context whose job is running on this thread.
pub fn current_context() -> Option<ContextLabel> {
    CURRENT_CONTEXT.with(|slot| slot.borrow().clone())
}

pub(crate) fn with_context<R>(label: &ContextLabel, operation: impl FnOnce() -> R) -> R {
    let previous = CURRENT_CONTEXT.with(|slot| slot.replace(Some(label.clone())));
    let _restore = RestoreContext(previous);
    operation()
}

struct RestoreContext(Option<ContextLabel>);

impl Drop for RestoreContext {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT_CONTEXT.with(|slot| *slot.borrow_mut() = previous);
    }
}
