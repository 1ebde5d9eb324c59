//! Redis-backed implementation of the ordered-set queue store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid kind {0:?}: must match [a-z0-9_:-]+")]
    InvalidKind(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub max_attempts: u32,
    pub idempotency_key: Option<String>,
    pub available_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqTaskEntry {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub max_attempts: u32,
    pub idempotency_key: Option<String>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum NackOutcome {
    Requeued,
    DeadLettered(DlqTaskEntry),
}

#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub ready_depth: u64,
    pub inflight_depth: u64,
    pub dlq_count: u64,
    pub oldest_ready_age_ms: Option<i64>,
    pub visibility_timeout: Duration,
}

fn valid_kind(kind: &str) -> bool {
    !kind.is_empty() && kind.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | ':' | '-'))
}

fn check_kind(kind: &str) -> Result<(), QueueError> {
    if valid_kind(kind) {
        Ok(())
    } else {
        Err(QueueError::InvalidKind(kind.to_string()))
    }
}

fn nanos_score(at: DateTime<Utc>) -> f64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX) as f64
}

fn ready_key(prefix: &str, kind: &str) -> String {
    format!("{prefix}:queue:{kind}:ready")
}

fn inflight_key(prefix: &str, kind: &str) -> String {
    format!("{prefix}:queue:{kind}:inflight")
}

fn dlq_key(prefix: &str, kind: &str) -> String {
    format!("{prefix}:queue:{kind}:dlq")
}

fn dedup_key(prefix: &str, idempotency_key: &str) -> String {
    format!("{prefix}:queue:dedup:{idempotency_key}")
}

/// Ordered-set task queue. Cheap to clone: it wraps a `ConnectionManager`,
/// which is itself a cheap, already-pooled clone.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisQueueStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self { conn, prefix: prefix.into() }
    }

    /// If `idempotency_key` is set and a dedup marker for it already exists,
    /// the enqueue is silently dropped (returns `Ok(None)`). Otherwise the
    /// task is inserted into the ready set scored by `available_at`.
    #[tracing::instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: serde_json::Value,
        delay: Duration,
        max_attempts: u32,
        idempotency_key: Option<String>,
        dedup_ttl: Duration,
    ) -> Result<Option<Uuid>, QueueError> {
        check_kind(kind)?;
        let mut conn = self.conn.clone();

        if let Some(ref key) = idempotency_key {
            let set: bool = redis::cmd("SET")
                .arg(dedup_key(&self.prefix, key))
                .arg("1")
                .arg("NX")
                .arg("PX")
                .arg(dedup_ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            if !set {
                return Ok(None);
            }
        }

        let available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        let task = Task {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            payload,
            attempt: 0,
            max_attempts,
            idempotency_key,
            available_at,
        };
        let member = serde_json::to_string(&task)?;
        let _: () = conn.zadd(ready_key(&self.prefix, kind), member, nanos_score(available_at)).await?;

        Ok(Some(task.id))
    }

    /// Pops the minimum-scored task. If its score is in the future it is
    /// pushed back and this call sleeps up to one second before retrying.
    /// On a due task, increments `attempt` and moves it to the in-flight
    /// set scored at `now + visibility_timeout`.
    #[tracing::instrument(skip(self))]
    pub async fn claim(&self, kind: &str, visibility_timeout: Duration) -> Result<Option<Task>, QueueError> {
        check_kind(kind)?;
        let mut conn = self.conn.clone();
        let ready = ready_key(&self.prefix, kind);

        loop {
            let popped: Vec<(String, f64)> = conn.zpopmin(&ready, 1).await?;
            let Some((member, score)) = popped.into_iter().next() else {
                return Ok(None);
            };

            let now = nanos_score(Utc::now());
            if score > now {
                let _: () = conn.zadd(&ready, &member, score).await?;
                let wait_secs = ((score - now) / 1_000_000_000.0).clamp(0.0, 1.0);
                tokio::time::sleep(Duration::from_secs_f64(wait_secs)).await;
                continue;
            }

            let mut task: Task = serde_json::from_str(&member)?;
            task.attempt += 1;
            let deadline = Utc::now() + chrono::Duration::from_std(visibility_timeout).unwrap_or_default();
            let new_member = serde_json::to_string(&task)?;
            let _: () = conn.zadd(inflight_key(&self.prefix, kind), new_member, nanos_score(deadline)).await?;

            return Ok(Some(task));
        }
    }

    /// Removes `task` from in-flight and deletes its dedup marker, if any.
    #[tracing::instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn ack(&self, task: &Task) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let member = serde_json::to_string(task)?;
        let _: () = conn.zrem(inflight_key(&self.prefix, &task.kind), member).await?;
        if let Some(ref key) = task.idempotency_key {
            let _: () = conn.del(dedup_key(&self.prefix, key)).await?;
        }
        Ok(())
    }

    /// Removes `task` from in-flight. If `task.attempt < max_attempts`,
    /// re-enqueues it with a backed-off `available_at`; otherwise moves it
    /// to the per-kind DLQ sink and deletes its dedup marker.
    #[tracing::instrument(skip(self, task, reason), fields(task_id = %task.id))]
    pub async fn nack(
        &self,
        mut task: Task,
        reason: &str,
        backoff_base: Duration,
        backoff_jitter: f64,
    ) -> Result<NackOutcome, QueueError> {
        let mut conn = self.conn.clone();
        let old_member = serde_json::to_string(&task)?;
        let _: () = conn.zrem(inflight_key(&self.prefix, &task.kind), old_member).await?;

        if task.attempt < task.max_attempts {
            let delay = crate::resilience::backoff::compute(backoff_base, task.attempt, backoff_jitter);
            task.available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            let member = serde_json::to_string(&task)?;
            let _: () = conn.zadd(ready_key(&self.prefix, &task.kind), member, nanos_score(task.available_at)).await?;
            Ok(NackOutcome::Requeued)
        } else {
            if let Some(ref key) = task.idempotency_key {
                let _: () = conn.del(dedup_key(&self.prefix, key)).await?;
            }
            let entry = DlqTaskEntry {
                id: task.id,
                kind: task.kind.clone(),
                payload: task.payload,
                attempt: task.attempt,
                max_attempts: task.max_attempts,
                idempotency_key: task.idempotency_key,
                reason: reason.to_string(),
                failed_at: Utc::now(),
            };
            let member = serde_json::to_string(&entry)?;
            let _: () = conn.zadd(dlq_key(&self.prefix, &entry.kind), member, nanos_score(entry.failed_at)).await?;
            Ok(NackOutcome::DeadLettered(entry))
        }
    }

    /// Moves every in-flight entry whose deadline has passed back to ready
    /// with `available_at = now`. The crash-recovery path: run on a
    /// one-second ticker and once more during graceful shutdown.
    #[tracing::instrument(skip(self))]
    pub async fn requeue_expired(&self, kind: &str) -> Result<u64, QueueError> {
        check_kind(kind)?;
        let mut conn = self.conn.clone();
        let inflight = inflight_key(&self.prefix, kind);
        let now = nanos_score(Utc::now());

        let expired: Vec<String> = conn.zrangebyscore(&inflight, f64::NEG_INFINITY, now).await?;
        let mut moved = 0u64;
        for member in expired {
            let removed: i64 = conn.zrem(&inflight, &member).await?;
            if removed == 0 {
                // Another sweep (or an ack/nack racing the deadline) already claimed it.
                continue;
            }
            let mut task: Task = serde_json::from_str(&member)?;
            task.available_at = Utc::now();
            let new_member = serde_json::to_string(&task)?;
            let _: () = conn.zadd(ready_key(&self.prefix, kind), new_member, nanos_score(task.available_at)).await?;
            moved += 1;
        }

        Ok(moved)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_dlq(&self, kind: &str, limit: i64, offset: i64) -> Result<Vec<DlqTaskEntry>, QueueError> {
        check_kind(kind)?;
        let mut conn = self.conn.clone();
        let stop = offset + limit - 1;
        let members: Vec<String> = conn.zrevrange(dlq_key(&self.prefix, kind), offset as isize, stop.max(offset) as isize).await?;
        members.iter().map(|m| serde_json::from_str(m).map_err(QueueError::from)).collect()
    }

    /// Cardinality of the per-kind DLQ set, for the admin list endpoint's
    /// `total` field.
    #[tracing::instrument(skip(self))]
    pub async fn count_dlq(&self, kind: &str) -> Result<i64, QueueError> {
        check_kind(kind)?;
        let mut conn = self.conn.clone();
        let count: i64 = conn.zcard(dlq_key(&self.prefix, kind)).await?;
        Ok(count)
    }

    /// Re-enqueues the stored task with `attempt` decremented by one (we
    /// keep the history rather than resetting to zero) and deletes the DLQ
    /// row. Returns the number of entries replayed.
    #[tracing::instrument(skip(self))]
    pub async fn replay_dlq_by_kind(&self, kind: &str, limit: Option<i64>) -> Result<u64, QueueError> {
        check_kind(kind)?;
        let mut conn = self.conn.clone();
        let key = dlq_key(&self.prefix, kind);
        let stop = limit.map(|n| n - 1).unwrap_or(-1);
        let members: Vec<String> = conn.zrevrange(&key, 0, stop as isize).await?;
        self.replay_members(kind, members).await
    }

    /// Scans the full per-kind DLQ set for entries matching `ids` and
    /// replays those. Bounded to admin-tool scale; no secondary index on
    /// task id exists in the sorted set.
    #[tracing::instrument(skip(self, ids))]
    pub async fn replay_dlq_by_ids(&self, kind: &str, ids: &[Uuid]) -> Result<u64, QueueError> {
        check_kind(kind)?;
        let mut conn = self.conn.clone();
        let key = dlq_key(&self.prefix, kind);
        let all: Vec<String> = conn.zrange(&key, 0, -1).await?;
        let matching: Vec<String> = all
            .into_iter()
            .filter(|member| match serde_json::from_str::<DlqTaskEntry>(member) {
                Ok(entry) => ids.contains(&entry.id),
                Err(_) => false,
            })
            .collect();
        self.replay_members(kind, matching).await
    }

    async fn replay_members(&self, kind: &str, members: Vec<String>) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let dlq = dlq_key(&self.prefix, kind);
        let mut replayed = 0u64;
        for member in members {
            let removed: i64 = conn.zrem(&dlq, &member).await?;
            if removed == 0 {
                continue;
            }
            let entry: DlqTaskEntry = serde_json::from_str(&member)?;
            let task = Task {
                id: entry.id,
                kind: entry.kind.clone(),
                payload: entry.payload,
                attempt: entry.attempt.saturating_sub(1),
                max_attempts: entry.max_attempts,
                idempotency_key: entry.idempotency_key,
                available_at: Utc::now(),
            };
            let new_member = serde_json::to_string(&task)?;
            let _: () = conn.zadd(ready_key(&self.prefix, kind), new_member, nanos_score(task.available_at)).await?;
            replayed += 1;
        }
        Ok(replayed)
    }

    /// Ready depth, in-flight depth, DLQ count, and the age in milliseconds
    /// of the oldest ready task whose score is already in the past.
    /// Updates the depth and DLQ-size gauges as a side effect.
    #[tracing::instrument(skip(self))]
    pub async fn stats(&self, kind: &str, visibility_timeout: Duration) -> Result<QueueStats, QueueError> {
        check_kind(kind)?;
        let mut conn = self.conn.clone();
        let ready = ready_key(&self.prefix, kind);
        let inflight = inflight_key(&self.prefix, kind);
        let dlq = dlq_key(&self.prefix, kind);

        let ready_depth: u64 = conn.zcard(&ready).await?;
        let inflight_depth: u64 = conn.zcard(&inflight).await?;
        let dlq_count: u64 = conn.zcard(&dlq).await?;

        let oldest: Vec<(String, f64)> = conn.zrange_withscores(&ready, 0, 0).await?;
        let now = nanos_score(Utc::now());
        let oldest_ready_age_ms = oldest.into_iter().next().and_then(|(_, score)| {
            if score <= now {
                Some(((now - score) / 1_000_000.0) as i64)
            } else {
                None
            }
        });

        metrics::gauge!("queue_ready_depth", "kind" => kind.to_string()).set(ready_depth as f64);
        metrics::gauge!("queue_inflight_depth", "kind" => kind.to_string()).set(inflight_depth as f64);
        metrics::gauge!("queue_dlq_depth", "kind" => kind.to_string()).set(dlq_count as f64);

        Ok(QueueStats {
            ready_depth,
            inflight_depth,
            dlq_count,
            oldest_ready_age_ms,
            visibility_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_validation_rejects_uppercase_and_whitespace() {
        assert!(valid_kind("webhook-delivery"));
        assert!(valid_kind("email:notify_v2"));
        assert!(!valid_kind("Webhook-Delivery"));
        assert!(!valid_kind("has space"));
        assert!(!valid_kind(""));
    }

    #[test]
    fn nanos_score_is_monotonic_for_increasing_timestamps() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1);
        assert!(nanos_score(b) > nanos_score(a));
    }
}
