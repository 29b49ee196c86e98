use thiserror::Error;

use crate::models::{ContextLabel, GroupTaskId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DispatchErrorKind {
    DoubleCompletion,
    Timeout,
    ContextClosed,
    InvalidInput,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct DispatchError {
    pub context: Option<ContextLabel>,
    pub task: Option<GroupTaskId>,
    pub kind: DispatchErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            context: None,
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn with_context(mut self, context: ContextLabel) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_task(mut self, task: GroupTaskId) -> Self {
        self.task = Some(task);
        self
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
