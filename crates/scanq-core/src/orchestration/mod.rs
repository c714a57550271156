pub mod executor;
pub mod gateway;
pub mod history;
pub mod pool;
pub mod status;

pub use executor::{ExecutionDisposition, TaskExecutor};
pub use gateway::{SubmissionReceipt, TaskGateway};
pub use history::{OwnerHistory, StatusCounts, TaskHistory};
pub use pool::{ShutdownSignal, WorkerPool, WorkerPoolHandle};
pub use status::{StatusResolver, StatusResponse, TaskStatusReport};

use std::sync::Arc;

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::{PersistenceResult, TaskStore};

pub type OrchestrationResult<T> = Result<T, CoreError>;

/// Runs a synchronous store call on the blocking pool.
pub(crate) async fn with_task_store<T, F>(
    task_store: &Arc<dyn TaskStore>,
    operation: F,
) -> OrchestrationResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn TaskStore) -> PersistenceResult<T> + Send + 'static,
{
    let task_store = task_store.clone();
    tokio::task::spawn_blocking(move || operation(task_store.as_ref()))
        .await
        .map_err(|join_error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("task persistence join failure: {join_error}"),
            )
        })?
}
