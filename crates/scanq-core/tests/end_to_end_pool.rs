#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use scanq_core::broker::{Broker, InMemoryBroker};
use scanq_core::config::{TimeoutSettings, ToolSettings, ToolSpec};
use scanq_core::execution::TokioProcessExecutor;
use scanq_core::models::{TaskId, TaskRecord, TaskRequest, TaskStatus};
use scanq_core::orchestration::{
    StatusResolver, TaskExecutor, TaskGateway, TaskStatusReport, WorkerPool, WorkerPoolHandle,
};
use scanq_core::persistence::{DerivedRecordStore, TaskStore};
use scanq_core::sandbox::ProcessSandbox;
use scanq_core::sqlite::SqliteStore;

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("scanq-{test_name}-{nanos}.sqlite3"))
}

fn fixture_path(relative: &str) -> String {
    format!("{}/tests/fixtures/{relative}", env!("CARGO_MANIFEST_DIR"))
}

struct Harness {
    store: Arc<SqliteStore>,
    broker: Arc<InMemoryBroker>,
    gateway: TaskGateway,
    pool: WorkerPoolHandle,
}

impl Harness {
    fn start(test_name: &str, tools: ToolSettings, timeouts: TimeoutSettings) -> Self {
        let store = Arc::new(SqliteStore::new(test_db_path(test_name)));
        store.migrate_to_latest().expect("migration should succeed");
        let broker = Arc::new(InMemoryBroker::new(
            Duration::from_secs(60),
            Duration::from_millis(50),
        ));
        let sandbox = Arc::new(ProcessSandbox::new(Arc::new(TokioProcessExecutor), tools));
        let executor = TaskExecutor::new(store.clone(), sandbox, timeouts);
        let pool = WorkerPool::new(broker.clone(), executor, 2, Duration::from_millis(50)).start();
        let gateway = TaskGateway::new(store.clone(), broker.clone());

        Self {
            store,
            broker,
            gateway,
            pool,
        }
    }

    async fn submit(&self, request: TaskRequest) -> TaskId {
        self.gateway
            .submit("alice", request)
            .await
            .expect("submission should succeed")
            .task_id
    }

    async fn wait_for_terminal(&self, task_id: &TaskId) -> TaskRecord {
        for _ in 0..200 {
            let record = self
                .store
                .read_task(task_id)
                .expect("read should succeed")
                .expect("submitted task should be recorded");
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("task {task_id} did not reach a terminal status");
    }

    async fn stop(self) {
        self.pool.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.pool.join())
            .await
            .expect("pool should stop promptly")
            .expect("workers should not panic");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn command_task_runs_to_success() {
    let harness = Harness::start(
        "e2e-command",
        ToolSettings::default(),
        TimeoutSettings::default(),
    );

    let task_id = harness.submit(TaskRequest::command("echo hello")).await;
    let record = harness.wait_for_terminal(&task_id).await;

    assert_eq!(record.status, TaskStatus::Success);
    let result = record.result.expect("success carries a result");
    assert_eq!(result["status"], "success");
    assert_eq!(result["command"], "echo hello");
    assert_eq!(result["stdout"], "hello\n");
    assert_eq!(result["stderr"], "");
    assert_eq!(result["return_code"], 0);
    assert!(record.completed_at.is_some());

    let resolver = StatusResolver::new(harness.store.clone(), harness.broker.clone());
    match resolver.get_status(&task_id).await.unwrap() {
        TaskStatusReport::Terminal(terminal) => assert_eq!(terminal.status, TaskStatus::Success),
        other => panic!("expected terminal report, got {other:?}"),
    }

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scan_that_outlives_its_budget_times_out() {
    let tools = ToolSettings {
        scanner: ToolSpec::new("/bin/sleep", &["30"]),
        ..ToolSettings::default()
    };
    let timeouts = TimeoutSettings {
        scan_secs: 1,
        ..TimeoutSettings::default()
    };
    let harness = Harness::start("e2e-scan-timeout", tools, timeouts);

    let started = std::time::Instant::now();
    let task_id = harness.submit(TaskRequest::scan("10.0.0.1")).await;
    let record = harness.wait_for_terminal(&task_id).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(record.status, TaskStatus::Failure);
    let result = record.result.expect("timeout carries a result");
    assert_eq!(result["status"], "timeout");
    assert_eq!(result["target"], "10.0.0.1");
    assert_eq!(result["error"], "nmap timeout (1 second)");
    assert!(record.completed_at.is_some());
    assert!(harness.store.list_scan_records(&task_id).unwrap().is_empty());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crawl_output_becomes_result_entries_and_rows() {
    let tools = ToolSettings {
        crawler: ToolSpec::new("/bin/cat", &[&fixture_path("katana/crawl.jsonl")]),
        ..ToolSettings::default()
    };
    let harness = Harness::start("e2e-crawl", tools, TimeoutSettings::default());

    let task_id = harness
        .submit(TaskRequest::crawl("https://example.com"))
        .await;
    let record = harness.wait_for_terminal(&task_id).await;

    assert_eq!(record.status, TaskStatus::Success);
    let result = record.result.expect("success carries a result");
    assert_eq!(result["url"], "https://example.com");
    assert_eq!(result["total_found"], 3);
    assert_eq!(result["crawl_results"].as_array().unwrap().len(), 3);
    assert_eq!(
        result["found_url"],
        serde_json::json!([
            "https://example.com/",
            "https://example.com/about",
            "https://example.com/about",
        ])
    );

    let rows = harness.store.list_crawl_records(&task_id).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].record.content_length, Some(1256));
    assert_eq!(rows[2].record.content_length, None);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_command_is_recorded_as_failure() {
    let harness = Harness::start(
        "e2e-command-failure",
        ToolSettings::default(),
        TimeoutSettings::default(),
    );

    let task_id = harness.submit(TaskRequest::command("false")).await;
    let record = harness.wait_for_terminal(&task_id).await;

    assert_eq!(record.status, TaskStatus::Failure);
    let result = record.result.unwrap();
    assert_eq!(result["status"], "error");
    assert_eq!(result["return_code"], 1);
    assert_eq!(result["error"], "command exited with code 1");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_are_acked_after_completion() {
    let harness = Harness::start(
        "e2e-ack",
        ToolSettings::default(),
        TimeoutSettings::default(),
    );

    let task_id = harness.submit(TaskRequest::command("echo done")).await;
    harness.wait_for_terminal(&task_id).await;

    for _ in 0..100 {
        if harness.broker.queue_length().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.broker.queue_length().await, 0);
    assert_eq!(
        harness.broker.task_state(task_id).await.unwrap(),
        scanq_core::broker::BrokerTaskState::Acknowledged
    );

    harness.stop().await;
}

#[tokio::test]
async fn idle_pool_shuts_down_promptly() {
    let harness = Harness::start(
        "e2e-idle-shutdown",
        ToolSettings::default(),
        TimeoutSettings::default(),
    );
    harness.stop().await;
}
