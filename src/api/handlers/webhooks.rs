//! HTTP handlers for the delivery-admin endpoints.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use uuid::Uuid;

use crate::api::models::pagination::{Page, Pagination};
use crate::api::models::webhooks::{DeliveryListQuery, DeliveryResponse, ReplayResponse};
use crate::db::errors::DbError;
use crate::db::handlers::{Deliveries, DeliveryFilter, DlqEntries};
use crate::errors::{Error, Result};
use crate::replay_guard;
use crate::AppState;

/// `GET /admin/webhook-deliveries`
#[tracing::instrument(skip_all)]
pub async fn list_deliveries(State(state): State<AppState>, Query(query): Query<DeliveryListQuery>) -> Result<Json<Page<DeliveryResponse>>> {
    let pagination = Pagination {
        limit: query.limit,
        offset: query.offset,
    };
    let filter = DeliveryFilter {
        endpoint_id: query.endpoint_id,
        event_id: query.event_id,
        status: query.status,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(DbError::from(e)))?;
    let mut repo = Deliveries::new(&mut conn);
    let rows = repo.list(&filter, pagination.limit(), pagination.offset()).await?;
    let total = repo.count(&filter).await?;

    Ok(Json(Page {
        data: rows.into_iter().map(Into::into).collect(),
        total,
    }))
}

/// `POST /admin/webhook-deliveries/{id}/replay`
///
/// Resets the row to PENDING, drops any stale DLQ entry, clears the
/// replay-guard suppression key so the next attempt isn't silently dropped,
/// and re-enqueues a claim task immediately.
#[tracing::instrument(skip(state))]
pub async fn replay_delivery(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ReplayResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(DbError::from(e)))?;
    let delivery = Deliveries::new(&mut conn).reset_for_replay(id).await?;
    DlqEntries::new(&mut conn).delete_by_delivery(id).await?;
    drop(conn);

    let key = replay_guard::delivery_key(&state.config.queue.redis_prefix, delivery.endpoint_id, delivery.event_id);
    let replay_guard_cleared = state.replay_guard.release(&key).await.map(|_| true).unwrap_or_else(|err| {
        tracing::warn!(error = %err, %key, "failed to clear replay guard key during replay");
        false
    });

    state
        .scheduler
        .enqueue_delivery(delivery.id, delivery.max_attempt as u32)
        .await?;

    Ok(Json(ReplayResponse {
        delivery: delivery.into(),
        replay_guard_cleared,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_response_carries_through_guard_flag() {
        // Smoke-checks the construction path used above compiles against
        // the response model's field names; full coverage lives in the
        // end-to-end admin-surface tests.
        let _ = ReplayResponse {
            delivery: DeliveryResponse {
                id: Uuid::nil(),
                endpoint_id: Uuid::nil(),
                event_id: Uuid::nil(),
                status: crate::db::models::DeliveryStatus::Pending,
                attempt: 0,
                max_attempt: 1,
                next_attempt_at: chrono::Utc::now(),
                last_error: None,
                response_status: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            },
            replay_guard_cleared: true,
        };
    }
}
