use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A registered subscriber for one or more event topics.
///
/// `topics` empty means "all topics". `secret` is the raw HMAC key used by
/// [`crate::webhooks::signing`] to sign outbound deliveries; it is never
/// returned to API callers.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub secret: Vec<u8>,
    pub active: bool,
    pub topics: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Whether this endpoint is subscribed to `topic`. An empty `topics` list
    /// subscribes to every topic.
    pub fn subscribes_to(&self, topic: &str) -> bool {
        self.active && (self.topics.is_empty() || self.topics.iter().any(|t| t == topic))
    }
}
