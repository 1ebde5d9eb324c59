use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::errors::{DbError, Result};
use crate::db::models::DlqEntry;

/// Repository for the `dlq_entries` table.
pub struct DlqEntries<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> DlqEntries<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Insert a denormalized failure record. Duplicate-key on `delivery_id`
    /// is swallowed by the caller (see [`crate::db::errors::DbError::UniqueViolation`]):
    /// the delivery row having moved to DLQ is the source of truth, this is
    /// best-effort operator convenience.
    #[tracing::instrument(skip(self, payload_snapshot), err)]
    pub async fn insert(&mut self, delivery_id: Uuid, reason: &str, attempts: i32, payload_snapshot: Value) -> Result<DlqEntry> {
        let entry = sqlx::query_as::<_, DlqEntry>(
            r#"
            INSERT INTO dlq_entries (delivery_id, reason, attempts, payload_snapshot)
            VALUES ($1, $2, $3, $4)
            RETURNING id, delivery_id, reason, attempts, payload_snapshot, created_at
            "#,
        )
        .bind(delivery_id)
        .bind(reason)
        .bind(attempts)
        .bind(payload_snapshot)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(entry)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get(&mut self, id: Uuid) -> Result<DlqEntry> {
        let entry = sqlx::query_as::<_, DlqEntry>(
            "SELECT id, delivery_id, reason, attempts, payload_snapshot, created_at FROM dlq_entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(entry)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get_by_delivery(&mut self, delivery_id: Uuid) -> Result<Option<DlqEntry>> {
        let entry = sqlx::query_as::<_, DlqEntry>(
            "SELECT id, delivery_id, reason, attempts, payload_snapshot, created_at FROM dlq_entries WHERE delivery_id = $1",
        )
        .bind(delivery_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(entry)
    }

    /// Delete the DLQ row for a delivery, if one exists. Called as part of
    /// admin replay so a replayed delivery doesn't leave a stale DLQ entry
    /// behind.
    #[tracing::instrument(skip(self), err)]
    pub async fn delete_by_delivery(&mut self, delivery_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM dlq_entries WHERE delivery_id = $1")
            .bind(delivery_id)
            .execute(&mut *self.conn)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn delete(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM dlq_entries WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn list(&mut self, limit: i64, offset: i64) -> Result<Vec<DlqEntry>> {
        let rows = sqlx::query_as::<_, DlqEntry>(
            r#"
            SELECT id, delivery_id, reason, attempts, payload_snapshot, created_at
            FROM dlq_entries
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM dlq_entries").fetch_one(&mut *self.conn).await?;

        Ok(count)
    }
}
