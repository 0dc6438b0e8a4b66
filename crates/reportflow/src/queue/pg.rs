use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{MessageQueue, ReceivedMessage};

/// Visibility-timeout queue stored in `queue_messages`.
///
/// Claiming uses `FOR UPDATE SKIP LOCKED`, so concurrent receivers never get
/// the same message inside one visibility window. Every delivery gets a new
/// receipt handle; acknowledging with an older one deletes nothing.
#[derive(Clone)]
pub struct PgMessageQueue {
    pool: PgPool,
    queue: String,
    poll_interval: Duration,
}

impl PgMessageQueue {
    pub fn new(pool: PgPool, queue: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            pool,
            queue: queue.into(),
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    async fn try_receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> anyhow::Result<Vec<ReceivedMessage>> {
        let mut tx = self.pool.begin().await?;

        let candidates: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM queue_messages
            WHERE queue = $1
              AND visible_at <= now()
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $2
            "#,
        )
        .bind(&self.queue)
        .bind(max_messages.max(1) as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut received = Vec::with_capacity(candidates.len());
        for id in candidates {
            let receipt = Uuid::new_v4();
            let (body, receive_count): (String, i32) = sqlx::query_as(
                r#"
                UPDATE queue_messages
                SET visible_at = now() + ($2::bigint * interval '1 millisecond'),
                    receipt_handle = $3,
                    receive_count = receive_count + 1
                WHERE id = $1
                RETURNING body, receive_count
                "#,
            )
            .bind(id)
            .bind(visibility_timeout.as_millis() as i64)
            .bind(receipt)
            .fetch_one(&mut *tx)
            .await?;

            received.push(ReceivedMessage {
                message_id: id.to_string(),
                receipt: receipt.to_string(),
                body,
                receive_count,
            });
        }

        tx.commit().await?;
        Ok(received)
    }
}

#[async_trait]
impl MessageQueue for PgMessageQueue {
    async fn send(&self, body: &str) -> anyhow::Result<String> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, queue, body, visible_at)
            VALUES ($1, $2, $3, now())
            "#,
        )
        .bind(id)
        .bind(&self.queue)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(id.to_string())
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> anyhow::Result<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + wait;

        loop {
            let batch = self.try_receive(max_messages, visibility_timeout).await?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn acknowledge(&self, receipt: &str) -> anyhow::Result<bool> {
        let Ok(receipt) = receipt.parse::<Uuid>() else {
            return Ok(false);
        };

        let res = sqlx::query("DELETE FROM queue_messages WHERE queue = $1 AND receipt_handle = $2")
            .bind(&self.queue)
            .bind(receipt)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() > 0)
    }
}
