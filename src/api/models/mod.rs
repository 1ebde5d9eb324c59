//! API request and response data models.
//!
//! These are the wire-facing DTOs for the admin surface, kept distinct from
//! the database models in [`crate::db::models`] so storage representation
//! and wire representation can evolve independently.

pub mod pagination;
pub mod queue;
pub mod webhooks;
