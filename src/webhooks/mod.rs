//! Event & Webhook Delivery Pipeline.
//!
//! - [`bus`]: persists a [`crate::db::models::DomainEvent`] and fans it out
//!   to the [`scheduler`] and every registered [`notifiers::Notifier`].
//! - [`scheduler`]: turns one event into N `webhook_delivery` rows, one per
//!   subscribed endpoint, and enqueues a claim task for each.
//! - [`executor`]: the state machine that drives one delivery row through
//!   a single attempt — sign, send through [`crate::resilience`], record
//!   the outcome.
//! - [`signing`]: outbound envelope construction and HMAC-SHA256 signing.
//! - [`notifiers`]: in-process observers invoked by the bus after persist.

pub mod bus;
pub mod executor;
pub mod notifiers;
pub mod scheduler;
pub mod signing;

pub use bus::{EventBus, EventPayload};
pub use executor::{DeliveryExecutor, ExecutorConfig, ExecutorOutcome};
pub use notifiers::Notifier;
pub use scheduler::{DeliveryScheduler, SchedulerConfig, WEBHOOK_DELIVERY_KIND};
