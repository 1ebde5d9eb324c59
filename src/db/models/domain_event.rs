use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// An immutable record of something that happened in the surrounding domain.
///
/// Once written a `DomainEvent` is never mutated or deleted by this crate;
/// the pipeline only ever re-serializes `payload` verbatim.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub topic: String,
    pub aggregate_id: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}
