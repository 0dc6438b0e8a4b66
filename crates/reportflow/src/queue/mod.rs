//! At-least-once message queue with a visibility window.
//!
//! A received message is hidden from other receivers for the visibility
//! timeout. Acknowledging removes it for good; otherwise it becomes
//! receivable again once the window elapses.

use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub mod message;
pub mod pg;

pub use memory::MemoryQueue;
pub use message::{decode, DecodeError, ReportMessage};
pub use pg::PgMessageQueue;

/// One delivery of a message. The receipt is only valid for this delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt: String,
    pub body: String,
    pub receive_count: i32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueues a raw body and returns the message id.
    async fn send(&self, body: &str) -> anyhow::Result<String>;

    /// Waits up to `wait` for at least one visible message. An empty vec
    /// means the wait elapsed, not an error.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> anyhow::Result<Vec<ReceivedMessage>>;

    /// Deletes the message behind `receipt`. Returns false when the receipt
    /// is stale (the message was redelivered or already deleted).
    async fn acknowledge(&self, receipt: &str) -> anyhow::Result<bool>;
}
