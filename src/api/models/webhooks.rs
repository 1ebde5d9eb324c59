//! Request/response DTOs for the delivery-admin endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{DeliveryStatus, WebhookDelivery};

/// Query parameters for `GET /admin/webhook-deliveries`.
#[derive(Debug, Default, Deserialize)]
pub struct DeliveryListQuery {
    #[serde(rename = "endpointId")]
    pub endpoint_id: Option<Uuid>,
    #[serde(rename = "eventId")]
    pub event_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One `webhook_deliveries` row as returned to an admin caller.
#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub id: Uuid,
    #[serde(rename = "endpointId")]
    pub endpoint_id: Uuid,
    #[serde(rename = "eventId")]
    pub event_id: Uuid,
    pub status: DeliveryStatus,
    pub attempt: i32,
    #[serde(rename = "maxAttempt")]
    pub max_attempt: i32,
    #[serde(rename = "nextAttemptAt")]
    pub next_attempt_at: DateTime<Utc>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(rename = "responseStatus")]
    pub response_status: Option<i32>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookDelivery> for DeliveryResponse {
    fn from(delivery: WebhookDelivery) -> Self {
        Self {
            id: delivery.id,
            endpoint_id: delivery.endpoint_id,
            event_id: delivery.event_id,
            status: delivery.status,
            attempt: delivery.attempt,
            max_attempt: delivery.max_attempt,
            next_attempt_at: delivery.next_attempt_at,
            last_error: delivery.last_error,
            response_status: delivery.response_status,
            created_at: delivery.created_at,
            updated_at: delivery.updated_at,
        }
    }
}

/// Response for `POST /admin/webhook-deliveries/{id}/replay`.
#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub delivery: DeliveryResponse,
    /// Whether a replay-guard suppression key for this `(endpoint, event)`
    /// pair was cleared as part of the replay.
    #[serde(rename = "replayGuardCleared")]
    pub replay_guard_cleared: bool,
}
