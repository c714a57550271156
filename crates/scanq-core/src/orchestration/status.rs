use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::broker::{Broker, BrokerTaskState};
use crate::models::{TaskId, TaskRecord, TaskStatus};
use crate::orchestration::{OrchestrationResult, with_task_store};
use crate::persistence::TaskStore;

/// The reconciled view of one task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskStatusReport {
    /// The durable record is terminal and authoritative.
    Terminal(TaskRecord),
    /// A PENDING record exists; `state` is the broker's live view.
    Pending { state: BrokerTaskState },
    /// No record exists (yet); only the broker knows about the task, if anyone does.
    Unrecorded { state: BrokerTaskState },
}

impl TaskStatusReport {
    /// Never FAILURE unless the durable record says so.
    pub fn status_label(&self) -> &'static str {
        match self {
            TaskStatusReport::Terminal(record) => record.status.as_str(),
            TaskStatusReport::Pending { .. } => TaskStatus::Pending.as_str(),
            TaskStatusReport::Unrecorded { state } => state.label(),
        }
    }

    pub fn to_response(&self, task_id: &TaskId) -> StatusResponse {
        match self {
            TaskStatusReport::Terminal(record) => StatusResponse::Terminal {
                task_id: task_id.clone(),
                status: record.status,
                result: record.result.clone().unwrap_or(Value::Null),
            },
            TaskStatusReport::Pending { state } | TaskStatusReport::Unrecorded { state } => {
                StatusResponse::InFlight {
                    task_id: task_id.clone(),
                    status: self.status_label().to_string(),
                    state: *state,
                }
            }
        }
    }
}

/// Serialized status payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusResponse {
    Terminal {
        task_id: TaskId,
        status: TaskStatus,
        result: Value,
    },
    InFlight {
        task_id: TaskId,
        status: String,
        state: BrokerTaskState,
    },
}

#[derive(Clone)]
pub struct StatusResolver {
    task_store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
}

impl StatusResolver {
    pub fn new(task_store: Arc<dyn TaskStore>, broker: Arc<dyn Broker>) -> Self {
        Self { task_store, broker }
    }

    pub async fn get_status(&self, task_id: &TaskId) -> OrchestrationResult<TaskStatusReport> {
        let record = self.read(task_id).await?;
        if let Some(record) = &record
            && record.status.is_terminal()
        {
            return Ok(TaskStatusReport::Terminal(record.clone()));
        }

        let state = match self.broker.task_state(task_id.clone()).await {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(
                    task_id = %task_id,
                    kind = ?error.kind,
                    message = %error.message,
                    recorded = record.is_some(),
                    "broker state unavailable; reporting from the record store"
                );
                BrokerTaskState::Unknown
            }
        };

        // The completion may have landed between the first read and the broker check.
        let record = if state == BrokerTaskState::Acknowledged {
            let reread = self.read(task_id).await?;
            if let Some(reread) = &reread
                && reread.status.is_terminal()
            {
                return Ok(TaskStatusReport::Terminal(reread.clone()));
            }
            reread
        } else {
            record
        };

        Ok(match record {
            Some(_) => TaskStatusReport::Pending { state },
            None => TaskStatusReport::Unrecorded { state },
        })
    }

    pub async fn get_status_response(&self, task_id: &TaskId) -> OrchestrationResult<StatusResponse> {
        Ok(self.get_status(task_id).await?.to_response(task_id))
    }

    async fn read(&self, task_id: &TaskId) -> OrchestrationResult<Option<TaskRecord>> {
        let task_id = task_id.clone();
        with_task_store(&self.task_store, move |store| store.read_task(&task_id)).await
    }
}
