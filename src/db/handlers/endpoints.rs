use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::db::models::WebhookEndpoint;

/// Repository for the `webhook_endpoints` table.
pub struct Endpoints<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> Endpoints<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    #[tracing::instrument(skip(self, secret), err)]
    pub async fn create(&mut self, name: &str, url: &str, secret: &[u8], topics: &[String]) -> Result<WebhookEndpoint> {
        let endpoint = sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            INSERT INTO webhook_endpoints (name, url, secret, topics)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, url, secret, active, topics, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(secret)
        .bind(topics)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(endpoint)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get(&mut self, id: Uuid) -> Result<WebhookEndpoint> {
        let endpoint = sqlx::query_as::<_, WebhookEndpoint>(
            "SELECT id, name, url, secret, active, topics, created_at, updated_at FROM webhook_endpoints WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or(crate::db::errors::DbError::NotFound)?;

        Ok(endpoint)
    }

    /// Active endpoints subscribed to `topic` (or subscribed to every topic).
    #[tracing::instrument(skip(self), err)]
    pub async fn active_for_topic(&mut self, topic: &str) -> Result<Vec<WebhookEndpoint>> {
        let endpoints = sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            SELECT id, name, url, secret, active, topics, created_at, updated_at
            FROM webhook_endpoints
            WHERE active
              AND (cardinality(topics) = 0 OR $1 = ANY(topics))
            "#,
        )
        .bind(topic)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(endpoints)
    }
}
