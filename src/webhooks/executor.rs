//! Delivery Executor: the state machine that drives a single
//! `webhook_delivery` row through PENDING → DELIVERING → DELIVERED | FAILED
//! | DLQ for one claimed queue task.
//!
//! This is the exclusive mutator of `webhook_deliveries` rows referenced by
//! [`crate::db::handlers::Deliveries`]'s doc comments — every row mutation
//! in this crate outside of admin replay happens here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::errors::DbError;
use crate::db::handlers::{Deliveries, DlqEntries, Endpoints, Events};
use crate::db::models::DeliveryStatus;
use crate::lock::DistributedLock;
use crate::replay_guard::{self, ReplayGuard};
use crate::resilience::backoff;
use crate::resilience::http_client::{HttpSendError, ReplayableRequest, ResilientHttpClient};
use crate::webhooks::signing::{self, OutboundEnvelope};

/// Response bodies longer than this are truncated before being stored.
const RESPONSE_BODY_CAP: usize = 4096;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub replay_ttl: Duration,
    pub replay_guard_prefix: String,
    pub lock_ttl: Duration,
    pub backoff_base: Duration,
    pub backoff_jitter: f64,
}

/// What the caller (the worker loop) should do with the queue task once
/// the executor has finished one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorOutcome {
    /// Terminal for this task: ack it (delivered, replay-suppressed, or a
    /// stale/missing-row claim that should not be retried).
    Ack,
    /// Non-terminal failure: nack the task so the queue's own backoff
    /// reschedules the claim.
    Nack,
}

pub struct DeliveryExecutor {
    db: PgPool,
    lock: Arc<DistributedLock>,
    replay_guard: Arc<ReplayGuard>,
    http: Arc<ResilientHttpClient>,
    config: ExecutorConfig,
}

impl DeliveryExecutor {
    pub fn new(db: PgPool, lock: Arc<DistributedLock>, replay_guard: Arc<ReplayGuard>, http: Arc<ResilientHttpClient>, config: ExecutorConfig) -> Self {
        Self {
            db,
            lock,
            replay_guard,
            http,
            config,
        }
    }

    /// Runs exactly one attempt for `delivery_id` under the per-delivery
    /// distributed lock. Returns what the caller should do with the queue
    /// task that drove this call.
    #[tracing::instrument(skip(self), fields(delivery_id = %delivery_id))]
    pub async fn attempt(&self, delivery_id: Uuid, cancel: &tokio_util::sync::CancellationToken) -> anyhow::Result<ExecutorOutcome> {
        let key = format!("{}:lock:delivery:{delivery_id}", self.config.replay_guard_prefix);
        self.lock
            .with_lock(&key, self.config.lock_ttl, cancel, || self.attempt_locked(delivery_id))
            .await
            .map_err(|err| anyhow::anyhow!("lock error for delivery {delivery_id}: {err}"))?
    }

    async fn attempt_locked(&self, delivery_id: Uuid) -> anyhow::Result<ExecutorOutcome> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;

        let claimed = Deliveries::new(&mut conn).mark_delivering(delivery_id).await?;
        if !claimed {
            tracing::debug!("delivery row not pending/failed, stale claim, acking without sending");
            return Ok(ExecutorOutcome::Ack);
        }

        let delivery = Deliveries::new(&mut conn).get(delivery_id).await?;
        let endpoint = match Endpoints::new(&mut conn).get(delivery.endpoint_id).await {
            Ok(endpoint) => endpoint,
            Err(DbError::NotFound) => {
                return self.fail_terminally(&mut conn, &delivery, "endpoint not found").await;
            }
            Err(err) => return Err(err.into()),
        };
        let event = match Events::new(&mut conn).get(delivery.event_id).await {
            Ok(event) => event,
            Err(DbError::NotFound) => {
                return self.fail_terminally(&mut conn, &delivery, "event not found").await;
            }
            Err(err) => return Err(err.into()),
        };
        drop(conn);

        let guard_key = replay_guard::delivery_key(&self.config.replay_guard_prefix, endpoint.id, event.id);
        let acquired = self.replay_guard.acquire(&guard_key, self.config.replay_ttl).await?;
        if !acquired {
            tracing::info!("replay-suppressed");
            let mut conn = self.db.acquire().await.map_err(DbError::from)?;
            Deliveries::new(&mut conn)
                .mark_delivered(delivery_id, 0, Some("replay-suppressed".to_string()))
                .await?;
            return Ok(ExecutorOutcome::Ack);
        }

        if let Err(err) = validate_url(&endpoint.url) {
            let mut conn = self.db.acquire().await.map_err(DbError::from)?;
            return self.fail_or_dlq(&mut conn, &delivery, &format!("err={err}"), None).await;
        }

        let occurred_at = event.occurred_at;
        let envelope = OutboundEnvelope {
            event_id: event.id,
            topic: &event.topic,
            data: &event.payload,
            occurred_at,
        };
        let body = envelope.to_json_bytes()?;
        let ts = Utc::now().timestamp();
        let signature = signing::sign(&endpoint.secret, ts, event.id, &body);
        let headers = signing::headers(event.id, delivery.id, ts, &signature);

        let request = ReplayableRequest {
            url: endpoint.url.clone(),
            headers,
            body: bytes::Bytes::from(body),
        };

        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        match self.http.post(&request).await {
            Ok(outcome) if outcome.status.is_some_and(|s| (200..300).contains(&s)) => {
                let truncated = outcome.body.map(|b| truncate(&b, RESPONSE_BODY_CAP));
                Deliveries::new(&mut conn).mark_delivered(delivery_id, outcome.status.unwrap() as i32, truncated).await?;
                Ok(ExecutorOutcome::Ack)
            }
            Ok(outcome) => {
                let status = outcome.status;
                let reason = format!("status={}", status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()));
                self.fail_or_dlq(&mut conn, &delivery, &reason, status.map(|s| s as i32)).await
            }
            Err(HttpSendError::BreakerOpen) => {
                self.fail_or_dlq(&mut conn, &delivery, "err=circuit open", None).await
            }
            Err(HttpSendError::Transport(err)) => {
                self.fail_or_dlq(&mut conn, &delivery, &format!("err={err}"), None).await
            }
        }
    }

    async fn fail_terminally(&self, conn: &mut sqlx::PgConnection, delivery: &crate::db::models::WebhookDelivery, reason: &str) -> anyhow::Result<ExecutorOutcome> {
        self.fail_or_dlq(conn, delivery, reason, None).await
    }

    /// Shared tail of both the send-failure and pre-send-validation-failure
    /// paths: moves the row to DLQ if this attempt exhausts `max_attempt`,
    /// otherwise reschedules it with backoff.
    async fn fail_or_dlq(
        &self,
        conn: &mut sqlx::PgConnection,
        delivery: &crate::db::models::WebhookDelivery,
        reason: &str,
        response_status: Option<i32>,
    ) -> anyhow::Result<ExecutorOutcome> {
        if delivery.exhausts_on_next_failure() {
            Deliveries::new(conn).mark_dlq(delivery.id, reason, response_status).await?;
            let attempts = delivery.attempt + 1;
            match DlqEntries::new(conn)
                .insert(
                    delivery.id,
                    reason,
                    attempts,
                    serde_json::json!({
                        "endpoint_id": delivery.endpoint_id,
                        "event_id": delivery.event_id,
                    }),
                )
                .await
            {
                Ok(_) | Err(DbError::UniqueViolation { .. }) => {}
                Err(err) => return Err(err.into()),
            }
            Ok(ExecutorOutcome::Ack)
        } else {
            let delay = backoff::compute(self.config.backoff_base, (delivery.attempt + 1) as u32, self.config.backoff_jitter);
            let next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            Deliveries::new(conn)
                .mark_failed_with_backoff(delivery.id, next_attempt_at, reason, response_status)
                .await?;
            Ok(ExecutorOutcome::Nack)
        }
    }
}

fn truncate(body: &str, cap: usize) -> String {
    if body.len() <= cap {
        body.to_string()
    } else {
        body.chars().take(cap).collect()
    }
}

/// `http://` only for `localhost` / `127.0.0.1`; everything else requires
/// `https://`. A missing host is rejected.
fn validate_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid url: {e}"))?;
    let host = parsed.host_str().ok_or_else(|| "missing host".to_string())?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if host == "localhost" || host == "127.0.0.1" => Ok(()),
        "http" => Err(format!("http scheme only allowed for loopback hosts, got {host}")),
        other => Err(format!("unsupported scheme {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_any_host_is_allowed() {
        assert!(validate_url("https://example.com/hook").is_ok());
    }

    #[test]
    fn http_loopback_is_allowed() {
        assert!(validate_url("http://localhost:8080/hook").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/hook").is_ok());
    }

    #[test]
    fn http_non_loopback_is_rejected() {
        assert!(validate_url("http://example.com/hook").is_err());
    }

    #[test]
    fn missing_host_is_rejected() {
        assert!(validate_url("not-a-url").is_err());
    }

    #[test]
    fn truncate_leaves_short_bodies_untouched() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn truncate_caps_long_bodies() {
        let long = "a".repeat(100);
        assert_eq!(truncate(&long, 10).len(), 10);
    }
}
