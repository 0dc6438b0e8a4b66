use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{MessageQueue, ReceivedMessage};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// In-process queue with the same visibility semantics as `PgMessageQueue`.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<Stored>>,
}

struct Stored {
    id: String,
    body: String,
    visible_at: Instant,
    receipt: Option<String>,
    receive_count: i32,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages not yet acknowledged, visible or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Stored>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_receive(&self, max_messages: usize, visibility_timeout: Duration) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut messages = self.lock();

        messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages.max(1))
            .map(|m| {
                let receipt = Uuid::new_v4().to_string();
                m.visible_at = now + visibility_timeout;
                m.receipt = Some(receipt.clone());
                m.receive_count += 1;
                ReceivedMessage {
                    message_id: m.id.clone(),
                    receipt,
                    body: m.body.clone(),
                    receive_count: m.receive_count,
                }
            })
            .collect()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, body: &str) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        self.lock().push(Stored {
            id: id.clone(),
            body: body.to_string(),
            visible_at: Instant::now(),
            receipt: None,
            receive_count: 0,
        });
        Ok(id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> anyhow::Result<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + wait;

        loop {
            let batch = self.try_receive(max_messages, visibility_timeout);
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn acknowledge(&self, receipt: &str) -> anyhow::Result<bool> {
        let mut messages = self.lock();
        let before = messages.len();
        messages.retain(|m| m.receipt.as_deref() != Some(receipt));
        Ok(messages.len() < before)
    }
}
