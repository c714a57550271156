use std::sync::Arc;
use std::time::SystemTime;

use scanq_core::broker::Broker;
use scanq_core::config::ScanqConfig;
use scanq_core::execution::TokioProcessExecutor;
use scanq_core::models::{CoreError, CoreErrorKind, CoreResult, TaskId, TaskRecord, TaskRequest};
use scanq_core::orchestration::{
    OwnerHistory, StatusResolver, TaskExecutor, TaskGateway, TaskHistory, WorkerPool,
};
use scanq_core::persistence::TaskStore;
use scanq_core::sandbox::ProcessSandbox;
use scanq_core::sqlite::{SqliteBroker, SqliteStore};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cli::{SubmitArgs, WorkerArgs};

pub async fn migrate(config: &ScanqConfig) -> CoreResult<()> {
    open_store(config).await?;
    println!(
        "schema is up to date at {}",
        config.database_path.display()
    );
    Ok(())
}

pub async fn submit(config: &ScanqConfig, args: SubmitArgs) -> CoreResult<()> {
    let store = open_store(config).await?;
    let gateway = TaskGateway::new(store, broker(config));
    let request = TaskRequest::new(args.kind.task_type(), args.input);
    let receipt = gateway.submit(&args.owner, request).await?;
    print_json(&receipt)
}

pub async fn worker(config: &ScanqConfig, args: WorkerArgs) -> CoreResult<()> {
    let store = open_store(config).await?;
    let pool_size = args.pool_size.unwrap_or(config.worker.pool_size);
    if pool_size == 0 {
        return Err(CoreError::invalid_input("--pool-size must be at least 1"));
    }

    let sandbox = Arc::new(ProcessSandbox::new(
        Arc::new(TokioProcessExecutor),
        config.tools.clone(),
    ));
    let executor = TaskExecutor::new(store, sandbox, config.timeouts.clone());
    let handle = WorkerPool::new(
        broker(config),
        executor,
        pool_size,
        config.worker.poll_interval(),
    )
    .start();

    tokio::signal::ctrl_c().await.map_err(|error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("failed to listen for Ctrl-C: {error}"),
        )
    })?;
    tracing::info!("shutdown requested; waiting for in-flight tasks");
    handle.shutdown();
    handle.join().await
}

pub async fn status(config: &ScanqConfig, task_id: String) -> CoreResult<()> {
    let store = open_store(config).await?;
    let resolver = StatusResolver::new(store, broker(config));
    let response = resolver
        .get_status_response(&TaskId::from(task_id.as_str()))
        .await?;
    print_json(&response)
}

pub async fn history(config: &ScanqConfig, owner: String) -> CoreResult<()> {
    let store = open_store(config).await?;
    match TaskHistory::new(store).list(&owner).await? {
        OwnerHistory::NoTasks => println!("no tasks found for owner '{owner}'"),
        OwnerHistory::Tasks(tasks) => {
            for task in &tasks {
                println!("{}", history_line(task));
            }
        }
    }
    Ok(())
}

pub async fn stats(config: &ScanqConfig) -> CoreResult<()> {
    let store = open_store(config).await?;
    let counts = TaskHistory::new(store).counts().await?;
    print_json(&counts)
}

async fn open_store(config: &ScanqConfig) -> CoreResult<Arc<dyn TaskStore>> {
    let store = Arc::new(SqliteStore::new(&config.database_path));
    let migrating = store.clone();
    tokio::task::spawn_blocking(move || migrating.migrate_to_latest())
        .await
        .map_err(|join_error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("migration join failure: {join_error}"),
            )
        })??;
    Ok(store)
}

fn broker(config: &ScanqConfig) -> Arc<dyn Broker> {
    Arc::new(
        SqliteBroker::new(
            &config.database_path,
            config.worker.visibility_timeout(),
            config.worker.poll_interval(),
        )
        .with_acknowledged_retention(config.worker.acknowledged_retention()),
    )
}

fn history_line(task: &TaskRecord) -> String {
    let completed = task
        .completed_at
        .map(rfc3339)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {}  {:<12}  {:<7}  {}",
        rfc3339(task.created_at),
        task.id,
        task.task_type,
        task.status,
        completed
    )
}

fn rfc3339(at: SystemTime) -> String {
    OffsetDateTime::from(at)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-time".to_string())
}

fn print_json(value: &impl Serialize) -> CoreResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("failed to render output: {error}"),
        )
    })?;
    println!("{rendered}");
    Ok(())
}
