//! At-least-once delivery of task messages between the gateway and workers.
//!
//! A received message stays invisible to other consumers until it is acked,
//! nacked, or its visibility timeout lapses, at which point it is redelivered.

pub mod in_memory;

pub use in_memory::InMemoryBroker;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, CoreResult, TaskId, TaskMessage};

pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = CoreResult<T>> + Send + 'a>>;

/// Identifies one receive of a message for ack/nack. A redelivery of the same
/// message gets a new handle, and the old one stops working.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ReceiptHandle {
    pub message_id: u64,
    pub receive_count: u32,
}

impl Display for ReceiptHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.message_id, self.receive_count)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub message: TaskMessage,
    pub receipt: ReceiptHandle,
    /// 1 on first delivery; higher values mean redelivery.
    pub delivery_count: u32,
}

/// The broker's live view of a task, independent of the record store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerTaskState {
    Unknown,
    #[serde(rename = "PENDING")]
    Queued,
    Started,
    Acknowledged,
}

impl BrokerTaskState {
    pub fn label(self) -> &'static str {
        match self {
            BrokerTaskState::Unknown => "UNKNOWN",
            BrokerTaskState::Queued => "PENDING",
            BrokerTaskState::Started => "STARTED",
            BrokerTaskState::Acknowledged => "ACKNOWLEDGED",
        }
    }
}

impl Display for BrokerTaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub trait Broker: Send + Sync {
    fn publish(&self, message: TaskMessage) -> BrokerFuture<'_, ()>;

    /// Waits at most one poll window for a visible message.
    fn receive(&self) -> BrokerFuture<'_, Option<Delivery>>;

    /// Fails for a receipt whose message was since redelivered or settled.
    fn ack(&self, receipt: ReceiptHandle) -> BrokerFuture<'_, ()>;

    /// Makes the message visible again immediately.
    fn nack(&self, receipt: ReceiptHandle) -> BrokerFuture<'_, ()>;

    fn task_state(&self, task_id: TaskId) -> BrokerFuture<'_, BrokerTaskState>;
}

pub(crate) fn broker_error(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::BrokerFailure, message)
}

pub(crate) fn encode_message(message: &TaskMessage) -> CoreResult<String> {
    serde_json::to_string(message).map_err(|error| {
        CoreError::new(
            CoreErrorKind::ParseFailure,
            format!("failed to encode task message: {error}"),
        )
    })
}

pub(crate) fn decode_message(payload: &str) -> CoreResult<TaskMessage> {
    serde_json::from_str(payload).map_err(|error| {
        CoreError::new(
            CoreErrorKind::ParseFailure,
            format!("failed to decode task message: {error}"),
        )
    })
}
