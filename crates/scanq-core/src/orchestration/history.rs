use std::sync::Arc;

use serde::Serialize;

use crate::models::{TaskRecord, TaskStatus};
use crate::orchestration::{OrchestrationResult, with_task_store};
use crate::persistence::TaskStore;

#[derive(Clone, Debug, PartialEq)]
pub enum OwnerHistory {
    /// The owner has never submitted a task.
    NoTasks,
    /// Newest first; never empty.
    Tasks(Vec<TaskRecord>),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub success: u64,
    pub failure: u64,
    pub total: u64,
}

/// Read-only projections over the record store.
#[derive(Clone)]
pub struct TaskHistory {
    task_store: Arc<dyn TaskStore>,
}

impl TaskHistory {
    pub fn new(task_store: Arc<dyn TaskStore>) -> Self {
        Self { task_store }
    }

    pub async fn list(&self, owner: &str) -> OrchestrationResult<OwnerHistory> {
        let owner = owner.to_string();
        let tasks =
            with_task_store(&self.task_store, move |store| store.list_tasks_by_owner(&owner))
                .await?;
        Ok(if tasks.is_empty() {
            OwnerHistory::NoTasks
        } else {
            OwnerHistory::Tasks(tasks)
        })
    }

    pub async fn count(&self, status: TaskStatus) -> OrchestrationResult<u64> {
        with_task_store(&self.task_store, move |store| store.count_by_status(status)).await
    }

    pub async fn counts(&self) -> OrchestrationResult<StatusCounts> {
        with_task_store(&self.task_store, |store| {
            let pending = store.count_by_status(TaskStatus::Pending)?;
            let success = store.count_by_status(TaskStatus::Success)?;
            let failure = store.count_by_status(TaskStatus::Failure)?;
            Ok(StatusCounts {
                pending,
                success,
                failure,
                total: pending + success + failure,
            })
        })
        .await
    }
}
