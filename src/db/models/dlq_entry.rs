use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Denormalized record of a delivery that exhausted its attempts, kept
/// around for operator inspection and replay independent of the delivery
/// row it references.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DlqEntry {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub reason: String,
    pub attempts: i32,
    pub payload_snapshot: Value,
    pub created_at: DateTime<Utc>,
}
