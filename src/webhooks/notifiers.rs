//! In-process observers invoked by the [`crate::webhooks::bus::EventBus`]
//! synchronously after a domain event is persisted.
//!
//! Notifiers never gate scheduling: a failing notifier's error is joined
//! into the Bus's combined error and returned to the caller, but the event
//! row already exists and the Scheduler still runs.

use async_trait::async_trait;

use crate::config::EmailTransportConfig;
use crate::db::models::DomainEvent;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name used in error messages when this notifier's call fails.
    fn name(&self) -> &str;

    async fn notify(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Keys checked, in order, for an addressee on an event's JSON payload.
const ADDRESS_KEYS: &[&str] = &["email", "recipient", "userEmail", "customerEmail"];

fn extract_address(payload: &serde_json::Value) -> Option<&str> {
    ADDRESS_KEYS.iter().find_map(|key| payload.get(*key)).and_then(|v| v.as_str())
}

/// `topic -> (subject template, body template)`. Templates use `{payload}`
/// as the sole substitution point — the email notifier is the one
/// component allowed to peek into `data`, but it does not attempt a
/// general-purpose templating language, just a fixed table per topic.
fn template_for(topic: &str) -> Option<(&'static str, &'static str)> {
    match topic {
        "order.paid" => Some(("Your order has been paid", "We've received payment for your order.\n\nDetails: {payload}")),
        "order.shipped" => Some(("Your order has shipped", "Your order is on its way.\n\nDetails: {payload}")),
        "order.refunded" => Some(("Your order has been refunded", "A refund has been issued for your order.\n\nDetails: {payload}")),
        _ => None,
    }
}

/// Sends a plain-text email for events whose payload carries a recognised
/// addressee key and whose topic has an entry in the template table.
/// Topics without a match or payloads without an address are silently
/// skipped — this is an optional enrichment, not a delivery guarantee.
pub struct EmailNotifier {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
}

enum EmailTransport {
    Smtp(lettre::AsyncSmtpTransport<lettre::Tokio1Executor>),
    File(lettre::AsyncFileTransport<lettre::Tokio1Executor>),
}

impl EmailNotifier {
    pub fn new(config: &crate::config::EmailConfig) -> anyhow::Result<Self> {
        let transport = match &config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                let builder = if *use_tls {
                    lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(host)?
                } else {
                    lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(host)
                }
                .port(*port)
                .credentials(lettre::transport::smtp::authentication::Credentials::new(username.clone(), password.clone()));
                EmailTransport::Smtp(builder.build())
            }
            EmailTransportConfig::File { path } => {
                std::fs::create_dir_all(path)?;
                EmailTransport::File(lettre::AsyncFileTransport::<lettre::Tokio1Executor>::new(path))
            }
        };

        Ok(Self {
            transport,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    #[tracing::instrument(skip_all, fields(topic = %event.topic, event_id = %event.id))]
    async fn notify(&self, event: &DomainEvent) -> anyhow::Result<()> {
        use lettre::AsyncTransport;

        let Some(address) = extract_address(&event.payload) else {
            return Ok(());
        };
        let Some((subject, body_template)) = template_for(&event.topic) else {
            return Ok(());
        };

        let body = body_template.replace("{payload}", &event.payload.to_string());

        let from: lettre::message::Mailbox = format!("{} <{}>", self.from_name, self.from_email).parse()?;
        let to: lettre::message::Mailbox = address.parse()?;
        let message = lettre::Message::builder().from(from).to(to).subject(subject).body(body)?;

        match &self.transport {
            EmailTransport::Smtp(transport) => {
                transport.send(message).await?;
            }
            EmailTransport::File(transport) => {
                transport.send(message).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_matching_address_key() {
        let payload = serde_json::json!({"recipient": "a@example.com", "email": "b@example.com"});
        assert_eq!(extract_address(&payload), Some("a@example.com"));
    }

    #[test]
    fn returns_none_when_no_known_key_present() {
        let payload = serde_json::json!({"orderId": "o-1"});
        assert_eq!(extract_address(&payload), None);
    }

    #[test]
    fn unknown_topic_has_no_template() {
        assert!(template_for("inventory.adjusted").is_none());
        assert!(template_for("order.paid").is_some());
    }

    #[tokio::test]
    async fn file_transport_notifier_skips_events_without_address_or_template() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = EmailNotifier::new(&crate::config::EmailConfig {
            transport: EmailTransportConfig::File {
                path: dir.path().to_string_lossy().to_string(),
            },
            from_email: "noreply@example.com".to_string(),
            from_name: "Example".to_string(),
        })
        .unwrap();

        let event = DomainEvent {
            id: uuid::Uuid::new_v4(),
            topic: "order.paid".to_string(),
            aggregate_id: "agg-1".to_string(),
            payload: serde_json::json!({"orderId": "o-1"}),
            occurred_at: chrono::Utc::now(),
        };

        notifier.notify(&event).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn file_transport_notifier_writes_email_for_matching_topic_and_address() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = EmailNotifier::new(&crate::config::EmailConfig {
            transport: EmailTransportConfig::File {
                path: dir.path().to_string_lossy().to_string(),
            },
            from_email: "noreply@example.com".to_string(),
            from_name: "Example".to_string(),
        })
        .unwrap();

        let event = DomainEvent {
            id: uuid::Uuid::new_v4(),
            topic: "order.paid".to_string(),
            aggregate_id: "agg-1".to_string(),
            payload: serde_json::json!({"orderId": "o-1", "email": "buyer@example.com"}),
            occurred_at: chrono::Utc::now(),
        };

        notifier.notify(&event).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
