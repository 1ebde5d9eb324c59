//! HTTP request handlers for the admin surface.
//!
//! - [`webhooks`]: delivery listing and replay
//! - [`queue`]: DLQ listing/replay and queue depth stats

pub mod queue;
pub mod webhooks;
