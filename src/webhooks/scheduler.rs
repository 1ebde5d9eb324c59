//! Delivery Scheduler: turns one persisted domain event into N delivery
//! rows — one per active, subscribed endpoint — and enqueues a task per
//! row. Fan-out is idempotent via the `(endpoint_id, event_id)` unique
//! constraint: a conflict on insert is swallowed rather than propagated.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::errors::DbError;
use crate::db::handlers::{Deliveries, Endpoints};
use crate::db::models::DomainEvent;
use crate::errors::Error;
use crate::queue::RedisQueueStore;

pub const WEBHOOK_DELIVERY_KIND: &str = "webhook-delivery";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub default_max_attempts: i32,
    /// TTL for the queue's dedup marker on `idempotency_key = delivery_id`.
    pub idempotency_ttl: Duration,
}

pub struct DeliveryScheduler {
    db: PgPool,
    queue: Arc<RedisQueueStore>,
    config: SchedulerConfig,
}

impl DeliveryScheduler {
    pub fn new(db: PgPool, queue: Arc<RedisQueueStore>, config: SchedulerConfig) -> Self {
        Self { db, queue, config }
    }

    /// Resolves active subscribers for `event.topic`, inserts one PENDING
    /// delivery row per endpoint (swallowing unique-violation conflicts),
    /// and enqueues a `webhook-delivery` task for each newly-inserted row.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, topic = %event.topic))]
    pub async fn schedule(&self, event: &DomainEvent) -> Result<(), Error> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        let endpoints = Endpoints::new(&mut conn).active_for_topic(&event.topic).await?;
        drop(conn);

        let mut last_err: Option<Error> = None;

        for endpoint in endpoints {
            let mut conn = self.db.acquire().await.map_err(DbError::from)?;
            let inserted = Deliveries::new(&mut conn)
                .insert(endpoint.id, event.id, self.config.default_max_attempts)
                .await;
            drop(conn);

            let delivery = match inserted {
                Ok(delivery) => delivery,
                Err(DbError::UniqueViolation { .. }) => {
                    tracing::debug!(endpoint_id = %endpoint.id, event_id = %event.id, "delivery already scheduled, skipping enqueue");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(endpoint_id = %endpoint.id, event_id = %event.id, error = %err, "failed to insert delivery row");
                    last_err = Some(err.into());
                    continue;
                }
            };

            if let Err(err) = self.enqueue_delivery(delivery.id, self.config.default_max_attempts as u32).await {
                tracing::warn!(delivery_id = %delivery.id, error = %err, "failed to enqueue delivery task");
                last_err = Some(err);
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Enqueues (or re-enqueues) a `webhook-delivery` task for `delivery_id`,
    /// deduplicated on the delivery id so a second enqueue attempt within
    /// `idempotency_ttl` is a no-op.
    pub async fn enqueue_delivery(&self, delivery_id: Uuid, max_attempts: u32) -> Result<(), Error> {
        self.queue
            .enqueue(
                WEBHOOK_DELIVERY_KIND,
                serde_json::json!({ "delivery_id": delivery_id }),
                Duration::ZERO,
                max_attempts,
                Some(delivery_id.to_string()),
                self.config.idempotency_ttl,
            )
            .await
            .map_err(|err| Error::Internal {
                operation: format!("enqueue delivery {delivery_id}: {err}"),
            })?;
        Ok(())
    }
}
