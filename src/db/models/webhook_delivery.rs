use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle state of a single `(endpoint, event)` delivery.
///
/// `Delivered` and `Dlq` are terminal: nothing but an explicit admin replay
/// moves a row out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "delivery_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Delivered,
    Failed,
    Dlq,
}

/// One attempt ledger row for a specific `(endpoint_id, event_id)` pair.
///
/// The `(endpoint_id, event_id)` unique constraint is what makes fan-out
/// idempotent: re-scheduling the same event simply hits a conflict.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub max_attempt: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// Whether the next failure would exhaust `max_attempt`, and therefore
    /// must move the row to the DLQ instead of rescheduling it.
    pub fn exhausts_on_next_failure(&self) -> bool {
        self.attempt + 1 >= self.max_attempt
    }
}
