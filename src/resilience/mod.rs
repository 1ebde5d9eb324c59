//! Resilience envelope: circuit breaker, backoff, and a retrying HTTP
//! client wrapper with a replayable request body.
//!
//! This is the only cross-cutting dependency of the delivery executor on
//! the outside world; everything else in [`crate::webhooks`] talks to it
//! through [`http_client::ResilientHttpClient`].

pub mod backoff;
pub mod circuit_breaker;
pub mod http_client;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use http_client::{HttpOutcome, HttpSendError, ReplayableRequest, ResilientHttpClient, ResilientHttpConfig};
