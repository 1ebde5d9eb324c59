//! Short-TTL "seen" set preventing a duplicate outbound call for the same
//! logical delivery within a window. Unlike [`crate::lock::DistributedLock`]
//! there is no holder token: the first caller to set the key wins and the
//! key simply expires, it is never explicitly released by the winner.

use std::time::Duration;

use redis::aio::ConnectionManager;

pub struct ReplayGuard {
    conn: ConnectionManager,
}

impl ReplayGuard {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Sets `key` if absent and returns whether acquisition succeeded.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired)
    }

    /// Removes `key`. Used when an admin replay should let a suppressed
    /// delivery through again immediately rather than waiting out the TTL.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<i64>(&mut conn).await?;
        Ok(())
    }
}

/// Key for a single `(endpoint, event)` delivery attempt, namespaced so it
/// can share a Redis keyspace with the task queue and lock.
pub fn delivery_key(prefix: &str, endpoint_id: uuid::Uuid, event_id: uuid::Uuid) -> String {
    format!("{prefix}:replay:{endpoint_id}:{event_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_key_is_namespaced_and_stable() {
        let endpoint = uuid::Uuid::nil();
        let event = uuid::Uuid::nil();
        assert_eq!(delivery_key("webhooks", endpoint, event), format!("webhooks:replay:{endpoint}:{event}"));
    }
}
