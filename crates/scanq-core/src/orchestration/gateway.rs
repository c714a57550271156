use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::json;

use crate::broker::Broker;
use crate::models::{
    CoreError, TaskCompletion, TaskId, TaskMessage, TaskRecord, TaskRequest, TaskStatus,
};
use crate::orchestration::{OrchestrationResult, with_task_store};
use crate::persistence::TaskStore;

/// What a caller gets back after a successful submission.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub task_id: TaskId,
    pub message: String,
    pub check_status: String,
}

/// Validates submissions, records them PENDING, and hands them to the broker.
#[derive(Clone)]
pub struct TaskGateway {
    task_store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
}

impl TaskGateway {
    pub fn new(task_store: Arc<dyn TaskStore>, broker: Arc<dyn Broker>) -> Self {
        Self { task_store, broker }
    }

    pub async fn submit(
        &self,
        owner: &str,
        request: TaskRequest,
    ) -> OrchestrationResult<SubmissionReceipt> {
        if owner.trim().is_empty() {
            return Err(CoreError::invalid_input("owner is required"));
        }
        request.validate()?;

        let task_type = request.task_type();
        let task_id = TaskId::generate();
        let record = TaskRecord::pending(task_id.clone(), task_type, request.parameters(), owner);
        let message = TaskMessage::from_record(&record);

        with_task_store(&self.task_store, move |store| store.create_task(&record))
            .await
            .map_err(|error| error.attribute(&task_id, task_type))?;

        if let Err(error) = self.broker.publish(message).await {
            let error = error.attribute(&task_id, task_type);
            tracing::error!(
                task_id = %task_id,
                task_type = %task_type,
                kind = ?error.kind,
                message = %error.message,
                "failed to publish task; marking it failed"
            );
            self.fail_undispatched(&task_id, &request, &error).await;
            return Err(error);
        }

        tracing::info!(task_id = %task_id, task_type = %task_type, owner, "task submitted");

        Ok(SubmissionReceipt {
            message: format!("{task_type} task for '{}' started", request.input()),
            check_status: format!("scanq status {task_id}"),
            task_id,
        })
    }

    /// A record that was never dispatched must not stay PENDING forever.
    async fn fail_undispatched(&self, task_id: &TaskId, request: &TaskRequest, error: &CoreError) {
        let completion = TaskCompletion {
            status: TaskStatus::Failure,
            result: json!({
                "status": "error",
                request.task_type().subject_key(): request.input(),
                "error": format!("dispatch failed: {}", error.message),
            }),
            completed_at: SystemTime::now(),
        };
        let id = task_id.clone();
        if let Err(store_error) = with_task_store(&self.task_store, move |store| {
            store.complete_task(&id, &completion)
        })
        .await
        {
            tracing::error!(
                task_id = %task_id,
                kind = ?store_error.kind,
                message = %store_error.message,
                "failed to record dispatch failure"
            );
        }
    }
}
