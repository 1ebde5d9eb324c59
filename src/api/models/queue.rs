//! Request/response DTOs for the queue/DLQ admin endpoints.
//!
//! `kind` is optional everywhere: this crate only ever schedules one task
//! kind ([`crate::webhooks::WEBHOOK_DELIVERY_KIND`]), so an omitted `kind`
//! defaults to it rather than requiring callers to know the internal name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::queue::DlqTaskEntry;

#[derive(Debug, Default, Deserialize)]
pub struct DlqListQuery {
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /admin/queue/dlq`'s `{data, total, kind}` envelope — a DLQ-specific
/// variant of [`crate::api::models::pagination::Page`] that also echoes
/// back the resolved `kind` (defaulted or caller-supplied).
#[derive(Debug, Serialize)]
pub struct DlqPage {
    pub data: Vec<DlqTaskResponse>,
    pub total: i64,
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct DlqTaskResponse {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub attempt: u32,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u32,
    pub reason: String,
    #[serde(rename = "failedAt")]
    pub failed_at: DateTime<Utc>,
}

impl From<DlqTaskEntry> for DlqTaskResponse {
    fn from(entry: DlqTaskEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            payload: entry.payload,
            attempt: entry.attempt,
            max_attempts: entry.max_attempts,
            reason: entry.reason,
            failed_at: entry.failed_at,
        }
    }
}

/// Body for `POST /admin/queue/dlq/replay`. Either `ids` replays specific
/// entries, or an omitted `ids` replays up to `limit` entries for `kind`
/// (newest-failed first, matching [`crate::queue::store::RedisQueueStore::list_dlq`]'s
/// ordering).
#[derive(Debug, Default, Deserialize)]
pub struct DlqReplayRequest {
    pub kind: Option<String>,
    pub ids: Option<Vec<Uuid>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DlqReplayResponse {
    pub replayed: u64,
    /// Present only when the request named specific `ids`: how many of
    /// them were not found in the DLQ (already replayed, wrong kind, or
    /// never existed) and therefore were not replayed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueStatsQuery {
    pub kind: Option<String>,
}

/// Field names match the admin surface's pinned wire format exactly
/// (`ready`/`processing`/`dlq`/`oldest_lag_ms`/`visibility_timeout`), not
/// this crate's own internal naming for the same quantities.
#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    pub kind: String,
    pub ready: u64,
    pub processing: u64,
    pub dlq: u64,
    pub oldest_lag_ms: Option<i64>,
    pub visibility_timeout: u128,
}
