use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

const DEFAULT_ACKNOWLEDGED_CAPACITY: usize = 10_000;

use crate::broker::{Broker, BrokerFuture, BrokerTaskState, Delivery, ReceiptHandle, broker_error};
use crate::models::{TaskId, TaskMessage};

#[derive(Debug)]
struct InMemoryQueuedMessage {
    id: u64,
    message: TaskMessage,
    /// `None` while visible; otherwise the instant it becomes visible again.
    invisible_until: Option<Instant>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    acknowledged: HashSet<TaskId>,
    /// Acknowledgement order, oldest first, for evicting from `acknowledged`.
    acknowledged_order: VecDeque<TaskId>,
    next_id: u64,
}

impl InMemoryQueue {
    fn remember_acknowledged(&mut self, task_id: TaskId, capacity: usize) {
        if !self.acknowledged.insert(task_id.clone()) {
            return;
        }
        self.acknowledged_order.push_back(task_id);
        while self.acknowledged_order.len() > capacity {
            if let Some(evicted) = self.acknowledged_order.pop_front() {
                self.acknowledged.remove(&evicted);
            }
        }
    }

    fn position(&self, receipt: ReceiptHandle) -> Option<usize> {
        self.messages.iter().position(|entry| {
            entry.id == receipt.message_id && entry.receive_count == receipt.receive_count
        })
    }
}

/// Single-process broker for tests and embedded use.
#[derive(Debug)]
pub struct InMemoryBroker {
    queue: Mutex<InMemoryQueue>,
    notify: Notify,
    visibility_timeout: Duration,
    poll_interval: Duration,
    acknowledged_capacity: usize,
}

impl InMemoryBroker {
    pub fn new(visibility_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            queue: Mutex::new(InMemoryQueue {
                next_id: 1,
                ..InMemoryQueue::default()
            }),
            notify: Notify::new(),
            visibility_timeout,
            poll_interval,
            acknowledged_capacity: DEFAULT_ACKNOWLEDGED_CAPACITY,
        }
    }

    /// Caps how many acknowledged task ids are remembered for `task_state`;
    /// the oldest are forgotten first.
    pub fn with_acknowledged_capacity(mut self, capacity: usize) -> Self {
        self.acknowledged_capacity = capacity;
        self
    }

    /// Messages not yet acknowledged, in flight or not.
    pub async fn queue_length(&self) -> usize {
        self.queue.lock().await.messages.len()
    }

    async fn try_claim(&self) -> Option<Delivery> {
        let mut queue = self.queue.lock().await;
        let now = Instant::now();
        let visibility_timeout = self.visibility_timeout;

        queue
            .messages
            .iter_mut()
            .find(|entry| entry.invisible_until.is_none_or(|until| until <= now))
            .map(|entry| {
                entry.invisible_until = Some(now + visibility_timeout);
                entry.receive_count += 1;
                Delivery {
                    message: entry.message.clone(),
                    receipt: ReceiptHandle {
                        message_id: entry.id,
                        receive_count: entry.receive_count,
                    },
                    delivery_count: entry.receive_count,
                }
            })
    }
}

impl Broker for InMemoryBroker {
    fn publish(&self, message: TaskMessage) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let mut queue = self.queue.lock().await;
            let id = queue.next_id;
            queue.next_id += 1;
            queue.messages.push_back(InMemoryQueuedMessage {
                id,
                message,
                invisible_until: None,
                receive_count: 0,
            });
            drop(queue);
            self.notify.notify_one();
            Ok(())
        })
    }

    fn receive(&self) -> BrokerFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let deadline = Instant::now() + self.poll_interval;
            loop {
                if let Some(delivery) = self.try_claim().await {
                    return Ok(Some(delivery));
                }
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                // Expired visibility deadlines are only noticed on the next pass.
                let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
            }
        })
    }

    fn ack(&self, receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let mut queue = self.queue.lock().await;
            let position = queue
                .position(receipt)
                .ok_or_else(|| broker_error(format!("stale or unknown receipt {receipt}")))?;
            if let Some(entry) = queue.messages.remove(position) {
                queue.remember_acknowledged(entry.message.id, self.acknowledged_capacity);
            }
            Ok(())
        })
    }

    fn nack(&self, receipt: ReceiptHandle) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let mut queue = self.queue.lock().await;
            let position = queue
                .position(receipt)
                .ok_or_else(|| broker_error(format!("stale or unknown receipt {receipt}")))?;
            if let Some(entry) = queue.messages.get_mut(position) {
                entry.invisible_until = None;
            }
            drop(queue);
            self.notify.notify_one();
            Ok(())
        })
    }

    fn task_state(&self, task_id: TaskId) -> BrokerFuture<'_, BrokerTaskState> {
        Box::pin(async move {
            let queue = self.queue.lock().await;
            let now = Instant::now();
            let in_queue = queue
                .messages
                .iter()
                .filter(|entry| entry.message.id == task_id)
                .map(|entry| match entry.invisible_until {
                    Some(until) if until > now => BrokerTaskState::Started,
                    _ => BrokerTaskState::Queued,
                })
                .max_by_key(|state| matches!(state, BrokerTaskState::Started));

            Ok(match in_queue {
                Some(state) => state,
                None if queue.acknowledged.contains(&task_id) => BrokerTaskState::Acknowledged,
                None => BrokerTaskState::Unknown,
            })
        })
    }
}
