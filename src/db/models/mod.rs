//! Database record models matching table schemas.
//!
//! Each model struct corresponds directly to a row in one of the tables
//! created by `migrations/0001_init.sql`. Models derive `sqlx::FromRow` and
//! are kept separate from the API-facing DTOs in [`crate::api::models`] so
//! storage representation and wire representation can evolve independently.

pub mod dlq_entry;
pub mod domain_event;
pub mod webhook_delivery;
pub mod webhook_endpoint;

pub use dlq_entry::DlqEntry;
pub use domain_event::DomainEvent;
pub use webhook_delivery::{DeliveryStatus, WebhookDelivery};
pub use webhook_endpoint::WebhookEndpoint;
