use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::errors::{DbError, Result};
use crate::db::models::{DeliveryStatus, WebhookDelivery};

/// Optional filters accepted by [`Deliveries::list`].
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub endpoint_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
}

/// Repository for the `webhook_deliveries` table.
///
/// Row mutation is the [`crate::webhooks::executor::DeliveryExecutor`]'s
/// exclusive responsibility; everything else only reads through this
/// repository or resets a row via [`Deliveries::reset_for_replay`].
pub struct Deliveries<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> Deliveries<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Insert one PENDING delivery row for `(endpoint_id, event_id)`.
    ///
    /// Callers scheduling fan-out are expected to match on
    /// [`DbError::UniqueViolation`] and swallow it: the unique constraint on
    /// `(endpoint_id, event_id)` is what makes repeated scheduling of the
    /// same event idempotent.
    #[tracing::instrument(skip(self), err)]
    pub async fn insert(&mut self, endpoint_id: Uuid, event_id: Uuid, max_attempt: i32) -> Result<WebhookDelivery> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            INSERT INTO webhook_deliveries (endpoint_id, event_id, max_attempt)
            VALUES ($1, $2, $3)
            RETURNING id, endpoint_id, event_id, status, attempt, max_attempt,
                      next_attempt_at, last_error, response_status, response_body,
                      created_at, updated_at
            "#,
        )
        .bind(endpoint_id)
        .bind(event_id)
        .bind(max_attempt)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(delivery)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get(&mut self, id: Uuid) -> Result<WebhookDelivery> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            SELECT id, endpoint_id, event_id, status, attempt, max_attempt,
                   next_attempt_at, last_error, response_status, response_body,
                   created_at, updated_at
            FROM webhook_deliveries WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(delivery)
    }

    /// Transition PENDING|FAILED -> DELIVERING. Returns `false` if the row
    /// was in neither state, meaning the caller's claim is stale and should
    /// be dropped without sending anything.
    ///
    /// FAILED is claimable because that's where a row sits between a
    /// non-terminal failed attempt and its next retry (`mark_failed_with_backoff`
    /// leaves `status='failed'`); only DELIVERED and DLQ are truly terminal.
    ///
    /// `attempt` is not incremented here: the spec's attempt-exhaustion
    /// check (`attempt+1 >= max_attempt`) reads the pre-attempt count, and
    /// only the terminal `mark_*` call that records the outcome bumps it.
    #[tracing::instrument(skip(self), err)]
    pub async fn mark_delivering(&mut self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivering', updated_at = now()
            WHERE id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self, response_body), err)]
    pub async fn mark_delivered(&mut self, id: Uuid, response_status: i32, response_body: Option<String>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivered', attempt = attempt + 1, response_status = $2, response_body = $3,
                last_error = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(response_status)
        .bind(response_body)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Record a non-terminal failure: the row moves back to FAILED with
    /// `next_attempt_at` pushed out by `delay` and the task queue separately
    /// rescheduling the claim task.
    #[tracing::instrument(skip(self), err)]
    pub async fn mark_failed_with_backoff(
        &mut self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
        response_status: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed', attempt = attempt + 1, next_attempt_at = $2, last_error = $3,
                response_status = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(last_error)
        .bind(response_status)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Move a delivery to its terminal DLQ state. Does not write the
    /// [`crate::db::models::DlqEntry`] row itself — see [`crate::db::handlers::DlqEntries::insert`].
    #[tracing::instrument(skip(self), err)]
    pub async fn mark_dlq(&mut self, id: Uuid, last_error: &str, response_status: Option<i32>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'dlq', attempt = attempt + 1, last_error = $2, response_status = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_error)
        .bind(response_status)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Admin replay: reset a terminal delivery back to PENDING with a clean
    /// slate. This is the only way a DELIVERED or DLQ row ever transitions
    /// again.
    #[tracing::instrument(skip(self), err)]
    pub async fn reset_for_replay(&mut self, id: Uuid) -> Result<WebhookDelivery> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', attempt = 0, last_error = NULL,
                next_attempt_at = now(), updated_at = now()
            WHERE id = $1
            RETURNING id, endpoint_id, event_id, status, attempt, max_attempt,
                      next_attempt_at, last_error, response_status, response_body,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(delivery)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn list(&mut self, filter: &DeliveryFilter, limit: i64, offset: i64) -> Result<Vec<WebhookDelivery>> {
        let rows = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            SELECT id, endpoint_id, event_id, status, attempt, max_attempt,
                   next_attempt_at, last_error, response_status, response_body,
                   created_at, updated_at
            FROM webhook_deliveries
            WHERE ($1::uuid IS NULL OR endpoint_id = $1)
              AND ($2::uuid IS NULL OR event_id = $2)
              AND ($3::delivery_status IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.endpoint_id)
        .bind(filter.event_id)
        .bind(filter.status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn count(&mut self, filter: &DeliveryFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*)
            FROM webhook_deliveries
            WHERE ($1::uuid IS NULL OR endpoint_id = $1)
              AND ($2::uuid IS NULL OR event_id = $2)
              AND ($3::delivery_status IS NULL OR status = $3)
            "#,
        )
        .bind(filter.endpoint_id)
        .bind(filter.event_id)
        .bind(filter.status)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(count)
    }
}
