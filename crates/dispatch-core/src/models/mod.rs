pub mod context;
pub mod error;
pub mod task;

pub use context::{ConcurrencyMode, ContextLabel};
pub use error::{DispatchError, DispatchErrorKind, DispatchResult};
pub use task::{GroupTaskId, OperationState};
