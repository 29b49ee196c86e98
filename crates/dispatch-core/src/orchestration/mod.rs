pub mod debounce;
pub mod dependency;
pub mod task_group;

pub use debounce::{DebounceTicket, DebouncedCanceller};
pub use dependency::{OperationGraph, OperationId};
pub use task_group::{
    CompletionSignal, GroupOperation, GroupTask, TaskGroupCoordinator, TaskGroupHandle,
};
