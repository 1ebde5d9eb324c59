//! HTTP client wrapper: bounded retries, per-call timeout, circuit breaker
//! gating, and a replayable request body.
//!
//! The request body is buffered once by the caller (as [`bytes::Bytes`]) and
//! resent unchanged on every retry — `reqwest::Body` is a consumed value per
//! request, so each attempt gets a fresh clone of the same bytes rather than
//! trying to rewind a stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::resilience::backoff;
use crate::resilience::circuit_breaker::CircuitBreaker;

#[derive(Debug, Clone)]
pub struct ResilientHttpConfig {
    pub max_attempts: u32,
    pub per_call_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_jitter: f64,
}

impl Default for ResilientHttpConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_call_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_jitter: 0.1,
        }
    }
}

/// One buffered, replayable POST request.
pub struct ReplayableRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Outcome of a completed attempt, after retries are exhausted (or a
/// success was returned early).
#[derive(Debug)]
pub struct HttpOutcome {
    pub status: Option<u16>,
    pub body: Option<String>,
}

#[derive(Debug, Error)]
pub enum HttpSendError {
    #[error("circuit open")]
    BreakerOpen,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Wraps a raw `reqwest::Client` with retry, timeout, and breaker gating.
///
/// Retry policy: transport errors and status >= 500 are
/// retried up to `max_attempts` times. A 4xx response is NOT retried and
/// does NOT trip the breaker — it is handed back to the caller as a
/// completed (non-2xx) outcome so the delivery executor can fail the
/// delivery without flapping the circuit.
pub struct ResilientHttpClient {
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    config: ResilientHttpConfig,
    fallback: Option<Arc<dyn Fn(&HttpSendError) -> Option<HttpOutcome> + Send + Sync>>,
}

impl ResilientHttpClient {
    pub fn new(client: reqwest::Client, breaker: Arc<CircuitBreaker>, config: ResilientHttpConfig) -> Self {
        Self {
            client,
            breaker,
            config,
            fallback: None,
        }
    }

    /// Install a fallback invoked with the last error once the breaker is
    /// open or every attempt has been exhausted; it may synthesize a
    /// response instead of surfacing the error. No delivery in this crate
    /// configures one today — the hook exists because the breaker and the
    /// client are reused outside the webhook executor too.
    pub fn with_fallback(mut self, fallback: Arc<dyn Fn(&HttpSendError) -> Option<HttpOutcome> + Send + Sync>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// POST `request`, retrying transient failures. Returns `Ok` with the
    /// last response outcome (which may be a non-2xx status — that is not
    /// an `Err` from this layer) or `Err` if the breaker is open or every
    /// attempt exhausted with a transport error — unless a fallback is
    /// configured, in which case it is given the chance to synthesize an
    /// `Ok` outcome from that terminal error first.
    pub async fn post(&self, request: &ReplayableRequest) -> Result<HttpOutcome, HttpSendError> {
        if self.breaker.allow().is_err() {
            return self.terminal(HttpSendError::BreakerOpen);
        }

        let mut last_transport_err: Option<String> = None;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                let delay = backoff::compute(self.config.backoff_base, attempt - 1, self.config.backoff_jitter);
                tokio::time::sleep(delay).await;
                if self.breaker.allow().is_err() {
                    return self.terminal(HttpSendError::BreakerOpen);
                }
            }

            let mut builder = self.client.post(&request.url).timeout(self.config.per_call_timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            builder = builder.body(request.body.clone());

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.ok();

                    if status.as_u16() >= 500 {
                        self.breaker.record(false);
                        last_transport_err = Some(format!("status={}", status.as_u16()));
                        if attempt < self.config.max_attempts {
                            continue;
                        }
                        return Ok(HttpOutcome {
                            status: Some(status.as_u16()),
                            body,
                        });
                    }

                    // 2xx and 4xx both end the retry loop here. 2xx counts
                    // as a breaker success; 4xx is a terminal non-retriable
                    // outcome attributable to the caller's payload, not the
                    // endpoint's health, so it is left out of the ratio
                    // entirely rather than recorded as either success or
                    // failure.
                    if status.is_success() {
                        self.breaker.record(true);
                    }
                    return Ok(HttpOutcome {
                        status: Some(status.as_u16()),
                        body,
                    });
                }
                Err(err) => {
                    self.breaker.record(false);
                    last_transport_err = Some(err.to_string());
                    if attempt < self.config.max_attempts {
                        continue;
                    }
                }
            }
        }

        self.terminal(HttpSendError::Transport(
            last_transport_err.unwrap_or_else(|| "no attempts made".to_string()),
        ))
    }

    /// Gives a configured fallback the chance to synthesize an outcome from
    /// a terminal error (breaker open, or every attempt exhausted) before
    /// surfacing the error itself.
    fn terminal(&self, err: HttpSendError) -> Result<HttpOutcome, HttpSendError> {
        match &self.fallback {
            Some(fallback) => match fallback(&err) {
                Some(outcome) => Ok(outcome),
                None => Err(err),
            },
            None => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(breaker: Arc<CircuitBreaker>) -> ResilientHttpClient {
        ResilientHttpClient::new(
            reqwest::Client::new(),
            breaker,
            ResilientHttpConfig {
                max_attempts: 3,
                per_call_timeout: Duration::from_secs(5),
                backoff_base: Duration::from_millis(1),
                backoff_jitter: 0.0,
            },
        )
    }

    fn open_breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                min_requests: 100,
                failure_ratio: 0.99,
                open_for: Duration::from_secs(30),
            },
        ))
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(open_breaker())
            .post(&ReplayableRequest {
                url: format!("{}/hook", server.uri()),
                headers: vec![],
                body: Bytes::from_static(b"{}"),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, Some(200));
    }

    #[tokio::test]
    async fn retries_on_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(open_breaker())
            .post(&ReplayableRequest {
                url: format!("{}/hook", server.uri()),
                headers: vec![],
                body: Bytes::from_static(b"{}"),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, Some(200));
    }

    #[tokio::test]
    async fn does_not_retry_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(open_breaker())
            .post(&ReplayableRequest {
                url: format!("{}/hook", server.uri()),
                headers: vec![],
                body: Bytes::from_static(b"{}"),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, Some(404));
    }

    #[tokio::test]
    async fn breaker_open_short_circuits_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                min_requests: 1,
                failure_ratio: 0.1,
                open_for: Duration::from_secs(30),
            },
        ));
        breaker.allow().unwrap();
        breaker.record(false);
        assert!(matches!(breaker.state(), crate::resilience::circuit_breaker::BreakerState::Open));

        let result = client(breaker)
            .post(&ReplayableRequest {
                url: format!("{}/hook", server.uri()),
                headers: vec![],
                body: Bytes::from_static(b"{}"),
            })
            .await;

        assert!(matches!(result, Err(HttpSendError::BreakerOpen)));
    }

    #[tokio::test]
    async fn fallback_synthesizes_an_outcome_when_breaker_is_open() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                min_requests: 1,
                failure_ratio: 0.1,
                open_for: Duration::from_secs(30),
            },
        ));
        breaker.allow().unwrap();
        breaker.record(false);

        let client = client(breaker).with_fallback(Arc::new(|err| match err {
            HttpSendError::BreakerOpen => Some(HttpOutcome {
                status: None,
                body: Some("fallback".to_string()),
            }),
            HttpSendError::Transport(_) => None,
        }));

        let outcome = client
            .post(&ReplayableRequest {
                url: format!("{}/hook", server.uri()),
                headers: vec![],
                body: Bytes::from_static(b"{}"),
            })
            .await
            .unwrap();

        assert_eq!(outcome.body.as_deref(), Some("fallback"));
    }

    #[tokio::test]
    async fn fallback_declining_still_surfaces_the_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                min_requests: 1,
                failure_ratio: 0.1,
                open_for: Duration::from_secs(30),
            },
        ));
        breaker.allow().unwrap();
        breaker.record(false);

        let client = client(breaker).with_fallback(Arc::new(|_| None));

        let result = client
            .post(&ReplayableRequest {
                url: format!("{}/hook", server.uri()),
                headers: vec![],
                body: Bytes::from_static(b"{}"),
            })
            .await;

        assert!(matches!(result, Err(HttpSendError::BreakerOpen)));
    }
}
