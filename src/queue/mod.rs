//! Durable delayed-work queue over a Redis sorted set: enqueue with dedup
//! and delay, claim with visibility timeout, ack, requeue-expired, and a
//! DLQ sink. One ready set and one in-flight set per `kind`.
//!
//! This is deliberately a different queue from the Postgres
//! `dlq_entries` table in [`crate::db`] — that table is a denormalized,
//! operator-facing record of failed webhook deliveries specifically. This
//! module's DLQ is a generic, per-kind Redis sink for any task that
//! exhausts its retries, webhook deliveries included.

pub mod store;
pub mod worker;

pub use store::{DlqTaskEntry, NackOutcome, QueueError, QueueStats, RedisQueueStore, Task};
pub use worker::{JobHandler, JobOutcome, Worker, WorkerConfig};
