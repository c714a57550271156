use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tokio::time::Instant;

use crate::broker::{
    Broker, BrokerFuture, BrokerTaskState, Delivery, ReceiptHandle, broker_error, decode_message,
    encode_message,
};
use crate::models::{CoreError, CoreErrorKind, CoreResult, TaskId, TaskMessage};
use crate::sqlite::connection::{ensure_schema_ready, open_connection, to_i64, to_unix_millis};

const CLAIM_RETRY_STEP: Duration = Duration::from_millis(100);
const DEFAULT_ACKNOWLEDGED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Durable queue in the `broker_messages` table, shareable across processes.
#[derive(Clone)]
pub struct SqliteBroker {
    inner: Arc<SqliteBrokerInner>,
}

struct SqliteBrokerInner {
    database_path: PathBuf,
    visibility_timeout: Duration,
    poll_interval: Duration,
    acknowledged_retention: Duration,
}

struct ClaimedRow {
    message_id: i64,
    payload: String,
    receive_count: i64,
}

impl SqliteBroker {
    pub fn new(
        database_path: impl Into<PathBuf>,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SqliteBrokerInner {
                database_path: database_path.into(),
                visibility_timeout,
                poll_interval,
                acknowledged_retention: DEFAULT_ACKNOWLEDGED_RETENTION,
            }),
        }
    }

    /// Acknowledged rows older than `retention` are deleted on the next publish.
    pub fn with_acknowledged_retention(self, retention: Duration) -> Self {
        Self {
            inner: Arc::new(SqliteBrokerInner {
                database_path: self.inner.database_path.clone(),
                visibility_timeout: self.inner.visibility_timeout,
                poll_interval: self.inner.poll_interval,
                acknowledged_retention: retention,
            }),
        }
    }

    /// Runs one sqlite operation on the blocking pool with a fresh connection.
    async fn blocking<T: Send + 'static>(
        &self,
        operation_name: &'static str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    ) -> CoreResult<T> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = open_connection(&inner.database_path)
                .map_err(|error| sqlite_broker_error(operation_name, error))?;
            ensure_schema_ready(&connection)
                .map_err(|error| sqlite_broker_error(operation_name, error))?;
            operation(&mut connection).map_err(|error| sqlite_broker_error(operation_name, error))
        })
        .await
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("sqlite broker '{operation_name}' worker panicked: {error}"),
            )
        })?
    }

    async fn try_claim(&self) -> CoreResult<Option<Delivery>> {
        let visibility_timeout = self.inner.visibility_timeout;
        let claimed = self
            .blocking("receive", move |connection| {
                let now = SystemTime::now();
                let now_ms = to_unix_millis(now)?;
                let invisible_until_ms = to_unix_millis(now + visibility_timeout)?;

                let transaction =
                    connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let row = transaction
                    .query_row(
                        "
SELECT message_id, payload, receive_count
FROM broker_messages
WHERE acknowledged_at_unix_ms IS NULL AND visible_at_unix_ms <= ?1
ORDER BY message_id ASC
LIMIT 1
",
                        params![now_ms],
                        |row| {
                            Ok(ClaimedRow {
                                message_id: row.get(0)?,
                                payload: row.get(1)?,
                                receive_count: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;

                if let Some(claimed) = &row {
                    transaction.execute(
                        "
UPDATE broker_messages
SET receive_count = receive_count + 1,
    visible_at_unix_ms = ?2,
    last_received_at_unix_ms = ?3
WHERE message_id = ?1
",
                        params![claimed.message_id, invisible_until_ms, now_ms],
                    )?;
                }
                transaction.commit()?;
                Ok(row)
            })
            .await?;

        let Some(claimed) = claimed else {
            return Ok(None);
        };
        let receipt = ReceiptHandle {
            message_id: u64::try_from(claimed.message_id).unwrap_or_default(),
            receive_count: u32::try_from(claimed.receive_count + 1).unwrap_or(u32::MAX),
        };

        match decode_message(&claimed.payload) {
            Ok(message) => Ok(Some(Delivery {
                message,
                receipt,
                delivery_count: receipt.receive_count,
            })),
            Err(error) => {
                // An undecodable payload would otherwise be redelivered forever.
                tracing::error!(
                    message_id = claimed.message_id,
                    kind = ?error.kind,
                    message = %error.message,
                    "dropping undecodable broker message"
                );
                self.ack(receipt).await?;
                Ok(None)
            }
        }
    }
}

impl Broker for SqliteBroker {
    fn publish(&self, message: TaskMessage) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let payload = encode_message(&message)?;
            let task_id = message.id.0;
            let retention = self.inner.acknowledged_retention;
            let pruned = self
                .blocking("publish", move |connection| {
                    let now = SystemTime::now();
                    let now_ms = to_unix_millis(now)?;
                    let cutoff_ms = to_unix_millis(
                        now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH),
                    )?;
                    let transaction =
                        connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
                    let pruned = transaction.execute(
                        "
DELETE FROM broker_messages
WHERE acknowledged_at_unix_ms IS NOT NULL AND acknowledged_at_unix_ms < ?1
",
                        params![cutoff_ms],
                    )?;
                    transaction.execute(
                        "
INSERT INTO broker_messages (task_id, payload, enqueued_at_unix_ms, visible_at_unix_ms)
VALUES (?1, ?2, ?3, ?3)
",
                        params![task_id, payload, now_ms],
                    )?;
                    transaction.commit()?;
                    Ok(pruned)
                })
                .await?;
            if pruned > 0 {
                tracing::debug!(pruned, "pruned acknowledged broker messages");
            }
            Ok(())
        })
    }

    fn receive(&self) -> BrokerFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let deadline = Instant::now() + self.inner.poll_interval;
            loop {
                if let Some(delivery) = self.try_claim().await? {
                    return Ok(Some(delivery));
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(CLAIM_RETRY_STEP.min(deadline - now)).await;
            }
        })
    }

    fn ack(&self, receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let updated = self
                .blocking("ack", move |connection| {
                    connection.execute(
                        "
UPDATE broker_messages
SET acknowledged_at_unix_ms = ?2
WHERE message_id = ?1 AND receive_count = ?3 AND acknowledged_at_unix_ms IS NULL
",
                        params![
                            to_i64(receipt.message_id)?,
                            to_unix_millis(SystemTime::now())?,
                            receipt.receive_count
                        ],
                    )
                })
                .await?;
            if updated == 0 {
                return Err(broker_error(format!("stale or unknown receipt {receipt}")));
            }
            Ok(())
        })
    }

    fn nack(&self, receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let updated = self
                .blocking("nack", move |connection| {
                    connection.execute(
                        "
UPDATE broker_messages
SET visible_at_unix_ms = ?2
WHERE message_id = ?1 AND receive_count = ?3 AND acknowledged_at_unix_ms IS NULL
",
                        params![
                            to_i64(receipt.message_id)?,
                            to_unix_millis(SystemTime::now())?,
                            receipt.receive_count
                        ],
                    )
                })
                .await?;
            if updated == 0 {
                return Err(broker_error(format!("stale or unknown receipt {receipt}")));
            }
            Ok(())
        })
    }

    fn task_state(&self, task_id: TaskId) -> BrokerFuture<'_, BrokerTaskState> {
        Box::pin(async move {
            self.blocking("task_state", move |connection| {
                let now_ms = to_unix_millis(SystemTime::now())?;
                let mut statement = connection.prepare(
                    "
SELECT visible_at_unix_ms, receive_count, acknowledged_at_unix_ms
FROM broker_messages
WHERE task_id = ?1
",
                )?;
                let rows = statement.query_map(params![task_id.as_str()], |row| {
                    let visible_at: i64 = row.get(0)?;
                    let receive_count: i64 = row.get(1)?;
                    let acknowledged_at: Option<i64> = row.get(2)?;
                    Ok(match acknowledged_at {
                        Some(_) => BrokerTaskState::Acknowledged,
                        None if receive_count > 0 && visible_at > now_ms => {
                            BrokerTaskState::Started
                        }
                        None => BrokerTaskState::Queued,
                    })
                })?;

                let mut state = BrokerTaskState::Unknown;
                for row in rows {
                    state = merge_state(state, row?);
                }
                Ok(state)
            })
            .await
        })
    }
}

/// Live copies outrank a finished one, and a running copy outranks a queued one.
fn merge_state(current: BrokerTaskState, next: BrokerTaskState) -> BrokerTaskState {
    fn rank(state: BrokerTaskState) -> u8 {
        match state {
            BrokerTaskState::Unknown => 0,
            BrokerTaskState::Acknowledged => 1,
            BrokerTaskState::Queued => 2,
            BrokerTaskState::Started => 3,
        }
    }
    if rank(next) > rank(current) {
        next
    } else {
        current
    }
}

fn sqlite_broker_error(operation: &str, error: rusqlite::Error) -> CoreError {
    broker_error(format!("sqlite broker '{operation}' failed: {error}"))
}
