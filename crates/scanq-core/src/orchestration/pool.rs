use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::broker::{Broker, Delivery};
use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::{ExecutionDisposition, OrchestrationResult, TaskExecutor};

/// Cooperative stop flag shared by every worker loop.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// Fixed number of worker loops, each handling one message at a time.
pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    executor: TaskExecutor,
    size: usize,
    error_backoff: Duration,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn Broker>,
        executor: TaskExecutor,
        size: usize,
        error_backoff: Duration,
    ) -> Self {
        Self {
            broker,
            executor,
            size: size.max(1),
            error_backoff,
        }
    }

    pub fn start(self) -> WorkerPoolHandle {
        self.start_with_signal(ShutdownSignal::new())
    }

    pub fn start_with_signal(self, shutdown: ShutdownSignal) -> WorkerPoolHandle {
        let workers = (0..self.size)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    broker: self.broker.clone(),
                    executor: self.executor.clone(),
                    shutdown: shutdown.clone(),
                    error_backoff: self.error_backoff,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::info!(pool_size = self.size, "worker pool started");
        WorkerPoolHandle { shutdown, workers }
    }
}

pub struct WorkerPoolHandle {
    shutdown: ShutdownSignal,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Stops the loops after their current message.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub async fn join(self) -> OrchestrationResult<()> {
        let mut first_error = None;
        for worker in self.workers {
            if let Err(join_error) = worker.await
                && first_error.is_none()
            {
                first_error = Some(CoreError::new(
                    CoreErrorKind::Internal,
                    format!("worker task failed: {join_error}"),
                ));
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct Worker {
    id: usize,
    broker: Arc<dyn Broker>,
    executor: TaskExecutor,
    shutdown: ShutdownSignal,
    error_backoff: Duration,
}

impl Worker {
    async fn run(self) {
        while !self.shutdown.is_triggered() {
            let received = tokio::select! {
                _ = self.shutdown.triggered() => break,
                received = self.broker.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => self.handle(delivery).await,
                Ok(None) => {}
                Err(error) => {
                    tracing::error!(
                        worker = self.id,
                        kind = ?error.kind,
                        message = %error.message,
                        "broker receive failed; backing off"
                    );
                    tokio::select! {
                        _ = self.shutdown.triggered() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    async fn handle(&self, delivery: Delivery) {
        let task_id = delivery.message.id.clone();
        let task_type = delivery.message.task_type;

        match self.executor.execute(delivery.message).await {
            Ok(disposition) => {
                if let ExecutionDisposition::Recorded { status } = disposition {
                    tracing::info!(
                        worker = self.id,
                        task_id = %task_id,
                        task_type = %task_type,
                        status = %status,
                        delivery_count = delivery.delivery_count,
                        "task completed"
                    );
                }
                if let Err(error) = self.broker.ack(delivery.receipt).await {
                    tracing::error!(
                        worker = self.id,
                        task_id = %task_id,
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to acknowledge message"
                    );
                }
            }
            Err(error) => {
                tracing::error!(
                    worker = self.id,
                    task_id = %task_id,
                    task_type = %task_type,
                    kind = ?error.kind,
                    message = %error.message,
                    "task execution aborted; returning message to the broker"
                );
                if let Err(nack_error) = self.broker.nack(delivery.receipt).await {
                    tracing::error!(
                        worker = self.id,
                        task_id = %task_id,
                        kind = ?nack_error.kind,
                        message = %nack_error.message,
                        "failed to negatively acknowledge message"
                    );
                }
            }
        }
    }
}
