//! API layer for HTTP request handling and data models.
//!
//! This module contains the admin REST surface, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for the admin endpoints
//! - **[`models`]**: Request/response data structures for the admin endpoints
//!
//! # API Structure
//!
//! - **Deliveries** (`/admin/webhook-deliveries*`): listing and replaying
//!   individual delivery attempts
//! - **Queue** (`/admin/queue/*`): dead-letter-queue listing/replay and
//!   queue depth stats
//!
//! `/metrics` (Prometheus scrape format) is wired in [`crate::build_router`]
//! directly rather than through a handler module, since it has no request
//! body or query parameters to model.

pub mod handlers;
pub mod models;
