//! Event Bus: atomically persists a domain event and fans it out to the
//! delivery scheduler and every registered in-process notifier.

use futures::future::join_all;
use sqlx::PgPool;

use crate::db::handlers::Events;
use crate::db::models::DomainEvent;
use crate::errors::Error;
use crate::webhooks::notifiers::Notifier;
use crate::webhooks::scheduler::DeliveryScheduler;

/// Accepts a structure, a byte slice, or a string for `payload`; byte/string
/// form must parse as JSON.
pub enum EventPayload {
    Value(serde_json::Value),
    Bytes(Vec<u8>),
    Str(String),
}

impl From<serde_json::Value> for EventPayload {
    fn from(value: serde_json::Value) -> Self {
        EventPayload::Value(value)
    }
}

impl EventPayload {
    fn into_value(self) -> Result<serde_json::Value, Error> {
        match self {
            EventPayload::Value(v) => Ok(v),
            EventPayload::Bytes(b) => serde_json::from_slice(&b).map_err(|e| Error::InvalidInput {
                message: format!("payload is not valid JSON: {e}"),
            }),
            EventPayload::Str(s) => serde_json::from_str(&s).map_err(|e| Error::InvalidInput {
                message: format!("payload is not valid JSON: {e}"),
            }),
        }
    }
}

pub struct EventBus {
    db: PgPool,
    scheduler: DeliveryScheduler,
    notifiers: Vec<Box<dyn Notifier>>,
}

impl EventBus {
    pub fn new(db: PgPool, scheduler: DeliveryScheduler, notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { db, scheduler, notifiers }
    }

    /// Persists the event, then calls the Scheduler and every notifier.
    /// Persistence failure is the only way this returns `Err` outright —
    /// once the event row exists it is always returned, alongside a joined
    /// downstream error if the Scheduler or any notifier failed. The event
    /// row is never rolled back by a downstream failure.
    #[tracing::instrument(skip(self, payload), fields(topic = %topic))]
    pub async fn emit(
        &self,
        topic: &str,
        aggregate_id: &str,
        payload: impl Into<EventPayload>,
    ) -> Result<(DomainEvent, Result<(), Error>), Error> {
        if topic.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: "topic must not be empty".to_string(),
            });
        }
        if aggregate_id.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: "aggregate_id must not be empty".to_string(),
            });
        }

        let payload = payload.into().into_value()?;

        let mut conn = self.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
        let event = Events::new(&mut conn).create(topic, aggregate_id, payload).await?;
        drop(conn);

        let mut errors: Vec<String> = Vec::new();

        if let Err(err) = self.scheduler.schedule(&event).await {
            tracing::warn!(event_id = %event.id, error = %err, "scheduler failed for emitted event");
            errors.push(format!("scheduler: {err}"));
        }

        let notifications = join_all(self.notifiers.iter().map(|notifier| async move {
            (notifier.name(), notifier.notify(&event).await)
        }))
        .await;

        for (name, result) in notifications {
            if let Err(err) = result {
                tracing::warn!(event_id = %event.id, notifier = name, error = %err, "notifier failed for emitted event");
                errors.push(format!("notifier[{name}]: {err}"));
            }
        }

        let downstream = if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Internal {
                operation: format!("emit({topic}) downstream failures: {}", errors.join("; ")),
            })
        };

        Ok((event, downstream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_payload_must_parse_as_json() {
        let payload = EventPayload::Bytes(b"not json".to_vec());
        assert!(payload.into_value().is_err());
    }

    #[test]
    fn string_payload_parses_valid_json() {
        let payload = EventPayload::Str(r#"{"a":1}"#.to_string());
        assert_eq!(payload.into_value().unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn value_payload_passes_through_unchanged() {
        let value = serde_json::json!({"orderId": "o-1"});
        let payload: EventPayload = value.clone().into();
        assert_eq!(payload.into_value().unwrap(), value);
    }
}
