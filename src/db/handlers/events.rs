use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::db::models::DomainEvent;

/// Repository for the append-only `domain_events` table.
pub struct Events<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> Events<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    #[tracing::instrument(skip(self, payload), fields(topic = %topic), err)]
    pub async fn create(&mut self, topic: &str, aggregate_id: &str, payload: Value) -> Result<DomainEvent> {
        let event = sqlx::query_as::<_, DomainEvent>(
            r#"
            INSERT INTO domain_events (topic, aggregate_id, payload)
            VALUES ($1, $2, $3)
            RETURNING id, topic, aggregate_id, payload, occurred_at
            "#,
        )
        .bind(topic)
        .bind(aggregate_id)
        .bind(payload)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(event)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get(&mut self, id: Uuid) -> Result<DomainEvent> {
        let event = sqlx::query_as::<_, DomainEvent>(
            "SELECT id, topic, aggregate_id, payload, occurred_at FROM domain_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or(crate::db::errors::DbError::NotFound)?;

        Ok(event)
    }
}
