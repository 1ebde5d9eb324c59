//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` (usually borrowed from an
//! open transaction) and exposes strongly-typed methods for one table.
//! Callers are expected to open a transaction, construct the repository,
//! do their work, and commit:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let mut events = Events::new(&mut tx);
//! let event = events.create(topic, aggregate_id, payload).await?;
//! tx.commit().await?;
//! ```

pub mod deliveries;
pub mod dlq;
pub mod endpoints;
pub mod events;

pub use deliveries::Deliveries;
pub use dlq::DlqEntries;
pub use endpoints::Endpoints;
pub use events::Events;
