//! HTTP handlers for the dead-letter queue and queue-stats admin endpoints.

use axum::extract::{Query, State};
use axum::response::Json;

use crate::api::models::queue::{DlqListQuery, DlqPage, DlqReplayRequest, DlqReplayResponse, QueueStatsQuery, QueueStatsResponse};
use crate::errors::Result;
use crate::webhooks::WEBHOOK_DELIVERY_KIND;
use crate::AppState;

fn resolve_kind(kind: Option<String>) -> String {
    kind.unwrap_or_else(|| WEBHOOK_DELIVERY_KIND.to_string())
}

/// `GET /admin/queue/dlq`
#[tracing::instrument(skip_all)]
pub async fn list_dlq(State(state): State<AppState>, Query(query): Query<DlqListQuery>) -> Result<Json<DlqPage>> {
    let kind = resolve_kind(query.kind);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let entries = state.queue.list_dlq(&kind, limit, offset).await?;
    let total = state.queue.count_dlq(&kind).await?;

    Ok(Json(DlqPage {
        data: entries.into_iter().map(Into::into).collect(),
        total,
        kind,
    }))
}

/// `POST /admin/queue/dlq/replay`
///
/// Replays specific `ids` if given, otherwise up to `limit` entries for
/// `kind` newest-failed first.
#[tracing::instrument(skip_all)]
pub async fn replay_dlq(State(state): State<AppState>, Json(request): Json<DlqReplayRequest>) -> Result<Json<DlqReplayResponse>> {
    let kind = resolve_kind(request.kind);

    let (replayed, failed) = match request.ids {
        Some(ids) if !ids.is_empty() => {
            let requested = ids.len() as u64;
            let replayed = state.queue.replay_dlq_by_ids(&kind, &ids).await?;
            (replayed, Some(requested.saturating_sub(replayed)))
        }
        Some(_) => (0, Some(0)),
        None => (state.queue.replay_dlq_by_kind(&kind, request.limit).await?, None),
    };

    Ok(Json(DlqReplayResponse { replayed, failed }))
}

/// `GET /admin/queue/stats`
#[tracing::instrument(skip_all)]
pub async fn queue_stats(State(state): State<AppState>, Query(query): Query<QueueStatsQuery>) -> Result<Json<QueueStatsResponse>> {
    let kind = resolve_kind(query.kind);
    let visibility_timeout = state.config.queue.visibility_timeout.into();

    let stats = state.queue.stats(&kind, visibility_timeout).await?;

    Ok(Json(QueueStatsResponse {
        kind,
        ready: stats.ready_depth,
        processing: stats.inflight_depth,
        dlq: stats.dlq_count,
        oldest_lag_ms: stats.oldest_ready_age_ms,
        visibility_timeout: stats.visibility_timeout.as_millis(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_kind_defaults_to_webhook_delivery() {
        assert_eq!(resolve_kind(None), WEBHOOK_DELIVERY_KIND);
        assert_eq!(resolve_kind(Some("custom".to_string())), "custom");
    }

    #[test]
    fn queue_stats_response_uses_pinned_field_names() {
        let response = QueueStatsResponse {
            kind: "webhook-delivery".to_string(),
            ready: 3,
            processing: 1,
            dlq: 0,
            oldest_lag_ms: Some(42),
            visibility_timeout: 60_000,
        };
        let value = serde_json::to_value(&response).unwrap();
        for key in ["kind", "ready", "processing", "dlq", "oldest_lag_ms", "visibility_timeout"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn dlq_replay_response_omits_failed_when_unset() {
        let value = serde_json::to_value(crate::api::models::queue::DlqReplayResponse { replayed: 2, failed: None }).unwrap();
        assert!(value.get("failed").is_none());
        assert_eq!(value["replayed"], 2);
    }
}
