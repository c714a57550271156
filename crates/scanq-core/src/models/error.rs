use crate::models::{TaskId, TaskType};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    ParseFailure,
    ProcessFailure,
    StorageFailure,
    BrokerFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task_id: Option<TaskId>,
    pub task: Option<TaskType>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidInput, message)
    }

    /// Fills in task attribution the error does not already carry.
    pub fn attribute(mut self, task_id: &TaskId, task_type: TaskType) -> Self {
        self.task_id = self.task_id.or_else(|| Some(task_id.clone()));
        self.task = self.task.or(Some(task_type));
        self
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
