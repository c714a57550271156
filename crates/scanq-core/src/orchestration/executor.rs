use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;

use crate::config::TimeoutSettings;
use crate::models::{
    CoreError, CoreErrorKind, TaskCompletion, TaskId, TaskMessage, TaskRecord, TaskRequest,
    TaskStatus, TaskType,
};
use crate::normalizer::normalize;
use crate::orchestration::{OrchestrationResult, with_task_store};
use crate::persistence::TaskStore;
use crate::sandbox::{AdapterOutcome, Sandbox, ToolInvocation};

/// What happened to one delivered message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionDisposition {
    /// The record was already terminal; nothing ran.
    Duplicate { status: TaskStatus },
    /// This execution performed the terminal write.
    Recorded { status: TaskStatus },
    /// Another execution completed the record first; this result was discarded.
    LostRace,
}

/// Runs delivered task messages and reconciles their outcome into the store.
///
/// Tool failures are recorded as FAILURE results. Only store failures surface
/// as errors, in which case the caller should let the broker redeliver.
#[derive(Clone)]
pub struct TaskExecutor {
    task_store: Arc<dyn TaskStore>,
    sandbox: Arc<dyn Sandbox>,
    timeouts: TimeoutSettings,
}

impl TaskExecutor {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        sandbox: Arc<dyn Sandbox>,
        timeouts: TimeoutSettings,
    ) -> Self {
        Self {
            task_store,
            sandbox,
            timeouts,
        }
    }

    pub async fn execute(&self, message: TaskMessage) -> OrchestrationResult<ExecutionDisposition> {
        let task_id = message.id.clone();
        let message_type = message.task_type;

        let record = self
            .load_or_create(message)
            .await
            .map_err(|error| error.attribute(&task_id, message_type))?;

        if record.status.is_terminal() {
            tracing::info!(
                task_id = %task_id,
                task_type = %record.task_type,
                status = %record.status,
                "discarding duplicate delivery of a completed task"
            );
            return Ok(ExecutionDisposition::Duplicate {
                status: record.status,
            });
        }

        if record.task_type != message_type {
            tracing::warn!(
                task_id = %task_id,
                task_type = %record.task_type,
                message_task_type = %message_type,
                "message task type disagrees with the stored record; using the record"
            );
        }
        let task_type = record.task_type;

        let (request, outcome) = match TaskRequest::from_parameters(task_type, &record.parameters)
        {
            Ok(request) => {
                let invocation = ToolInvocation::new(
                    task_id.clone(),
                    request.clone(),
                    self.timeouts.for_task(task_type),
                );
                let outcome = self.sandbox.run(invocation).await;
                (request, outcome)
            }
            Err(error) => (
                TaskRequest::new(task_type, subject_text(task_type, &record.parameters)),
                AdapterOutcome::launch_error(error.message),
            ),
        };

        tracing::debug!(
            task_id = %task_id,
            task_type = %task_type,
            outcome = outcome.kind(),
            "tool run finished"
        );

        let normalized = normalize(&task_id, &request, &outcome);
        let status = normalized.status;
        let completion = TaskCompletion {
            status,
            result: normalized.result,
            completed_at: SystemTime::now(),
        };

        let won = {
            let id = task_id.clone();
            with_task_store(&self.task_store, move |store| store.complete_task(&id, &completion))
                .await
                .map_err(|error| error.attribute(&task_id, task_type))?
        };

        if !won {
            tracing::warn!(
                task_id = %task_id,
                task_type = %task_type,
                discarded_status = %status,
                derived_rows = normalized.derived.len(),
                "task was completed by another execution; discarding this result"
            );
            return Ok(ExecutionDisposition::LostRace);
        }

        if !normalized.derived.is_empty() {
            let derived = normalized.derived;
            if let Err(error) = with_task_store(&self.task_store, move |store| {
                store.append_derived_records(&derived)
            })
            .await
            {
                tracing::error!(
                    task_id = %task_id,
                    task_type = %task_type,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to append derived result rows"
                );
            }
        }

        Ok(ExecutionDisposition::Recorded { status })
    }

    async fn load_or_create(&self, message: TaskMessage) -> OrchestrationResult<TaskRecord> {
        let task_id = message.id.clone();
        if let Some(record) = self.read(&task_id).await? {
            return Ok(record);
        }

        // Published without going through the gateway: record it before running.
        let record = TaskRecord::pending(
            message.id,
            message.task_type,
            message.parameters,
            message.owner,
        );
        let created =
            with_task_store(&self.task_store, move |store| store.create_task_if_absent(&record))
                .await?;
        if created {
            tracing::info!(task_id = %task_id, "created missing task record from delivery");
        }

        self.read(&task_id).await?.ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::StorageFailure,
                format!("task '{task_id}' vanished after being created"),
            )
        })
    }

    async fn read(&self, task_id: &TaskId) -> OrchestrationResult<Option<TaskRecord>> {
        let task_id = task_id.clone();
        with_task_store(&self.task_store, move |store| store.read_task(&task_id)).await
    }
}

fn subject_text(task_type: TaskType, parameters: &Value) -> String {
    match parameters.get(task_type.subject_key()) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
