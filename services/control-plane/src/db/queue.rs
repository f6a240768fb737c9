//! Postgres-backed reschedule queue.
//!
//! Each pending channel has at most one unclaimed row, so enqueuing a
//! channel that is already waiting is a no-op.

use async_trait::async_trait;
use berth_reconcile::{ChannelReference, QueueError, TaskQueue};
use sqlx::postgres::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of rows not yet claimed by the scheduler.
    pub async fn pending(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM reschedule_queue WHERE claimed_at IS NULL")
            .fetch_one(&self.pool)
            .await
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(
        &self,
        reference: ChannelReference,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let insert = sqlx::query(
            r#"
            INSERT INTO reschedule_queue (app_id, channel_id)
            VALUES ($1, $2)
            ON CONFLICT (app_id, channel_id) WHERE claimed_at IS NULL DO NOTHING
            "#,
        )
        .bind(reference.app_id.to_string())
        .bind(reference.channel_id.to_string())
        .execute(&self.pool);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            result = insert => result,
        };

        let done = result.map_err(|e| QueueError::Unavailable(e.to_string()))?;
        debug!(
            channel = %reference,
            inserted = done.rows_affected(),
            "Reschedule row written"
        );
        Ok(())
    }
}
