//! Key-scoped distributed lock, backed by Redis.
//!
//! One [`DistributedLock`] instance is shared across all callers inside a
//! process; the redis `ConnectionManager` it wraps is itself a cheap clone
//! and already pools/reconnects under the hood.

use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Script;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock acquisition cancelled")]
    Cancelled,
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Compare-and-delete: only the holder that set `KEYS[1] == ARGV[1]` may
/// remove it. A lock that expired and was re-acquired by someone else is
/// left alone.
fn release_script() -> &'static Script {
    static SCRIPT: once_cell::sync::Lazy<Script> = once_cell::sync::Lazy::new(|| {
        Script::new(
            r#"
            if redis.call("get", KEYS[1]) == ARGV[1] then
                return redis.call("del", KEYS[1])
            else
                return 0
            end
            "#,
        )
    });
    &SCRIPT
}

/// `true` for the class of errors the contract calls out explicitly:
/// servers (or Redis-compatible proxies) that don't support EVAL. Matched
/// on the error message rather than `RedisErrorKind` because redis-rs
/// folds several distinct server-side rejections into `ExecAbortError`.
fn is_unsupported_scripting(err: &redis::RedisError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("unknown command") && (msg.contains("eval") || msg.contains("evalsha"))
}

/// Key → holder-token mapping with TTL, guaranteeing exclusive ownership
/// for the TTL window. See [`DistributedLock::with_lock`] for the usual
/// entry point.
pub struct DistributedLock {
    conn: ConnectionManager,
    retry_backoff: Duration,
}

impl DistributedLock {
    pub fn new(conn: ConnectionManager, retry_backoff: Duration) -> Self {
        Self { conn, retry_backoff }
    }

    /// SETNX-equivalent write of a fresh, caller-unique token with `ttl`.
    /// Returns the token on success so the caller can hand it to
    /// [`Self::release`] later.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>, LockError> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.then_some(token))
    }

    /// Compare-and-delete keyed on `token`. Falls back to an unconditional
    /// delete if the server rejects EVAL, per the documented tradeoff: a
    /// lock whose TTL already expired and was re-taken by another holder
    /// could in that fallback path be released out from under them.
    #[tracing::instrument(skip(self, token))]
    pub async fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        match release_script().key(key).arg(token).invoke_async::<i64>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) if is_unsupported_scripting(&err) => {
                tracing::warn!(%key, error = %err, "release script unsupported by backend, falling back to unconditional delete");
                redis::cmd("DEL").arg(key).query_async::<i64>(&mut conn).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Acquire `key` or block with bounded retry backoff until `f`
    /// completes or `cancel` fires. The lock is always released before
    /// returning, success or not.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, ttl: Duration, cancel: &CancellationToken, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            if let Some(token) = self.acquire(key, ttl).await? {
                let result = f().await;
                self.release(key, &token).await?;
                return Ok(result);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_backoff) => {}
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_scripting_detection_matches_eval_rejections() {
        let err = redis::RedisError::from((redis::ErrorKind::ExecAbortError, "unknown command 'EVAL'"));
        assert!(is_unsupported_scripting(&err));

        let err = redis::RedisError::from((redis::ErrorKind::ResponseError, "WRONGTYPE"));
        assert!(!is_unsupported_scripting(&err));
    }
}
