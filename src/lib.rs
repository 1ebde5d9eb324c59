//! Event bus and webhook delivery pipeline.
//!
//! A domain event is persisted once, then fanned out to every active
//! [`webhook_endpoints`][WebhookEndpoint] subscriber as an independent
//! delivery attempt: `bus -> scheduler -> task queue -> worker -> executor`.
//! Delivery is idempotent (one row per `(endpoint, event)`), retried with
//! backoff, protected by a process-local circuit breaker, and falls through
//! to a dead-letter sink an operator can inspect and replay via the admin
//! HTTP surface in [`api`].
//!
//! # Modules
//!
//! - [`config`]: YAML + env configuration, loaded via `figment`
//! - [`errors`]: crate-wide `Error` and its `{error:{code,message}}` HTTP envelope
//! - [`db`]: Postgres repositories and row models
//! - [`queue`]: Redis-backed delayed task queue and its worker loop
//! - [`lock`]: Redis distributed lock
//! - [`replay_guard`]: short-TTL duplicate-delivery suppression
//! - [`resilience`]: circuit breaker, backoff, retrying HTTP client
//! - [`webhooks`]: event bus, scheduler, delivery executor, signing, notifiers
//! - [`api`]: the admin HTTP surface over deliveries and the queue
//! - [`telemetry`]: tracing subscriber setup
//!
//! [WebhookEndpoint]: db::models::WebhookEndpoint

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod lock;
pub mod queue;
pub mod replay_guard;
pub mod resilience;
pub mod telemetry;
pub mod webhooks;

pub use config::Config;

use lock::DistributedLock;
use queue::{JobHandler, JobOutcome, RedisQueueStore, Worker, WorkerConfig};
use replay_guard::ReplayGuard;
use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use resilience::http_client::{ResilientHttpClient, ResilientHttpConfig};
use webhooks::notifiers::{EmailNotifier, Notifier};
use webhooks::{DeliveryExecutor, DeliveryScheduler, EventBus, ExecutorConfig, SchedulerConfig, WEBHOOK_DELIVERY_KIND};

/// Shared application state handed to every admin HTTP handler.
///
/// `scheduler` is exposed (rather than just `bus`) because admin replay
/// re-enqueues a claim task directly without re-emitting a domain event.
#[derive(Clone, bon::Builder)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<RedisQueueStore>,
    pub replay_guard: Arc<ReplayGuard>,
    pub scheduler: Arc<DeliveryScheduler>,
    pub config: Arc<Config>,
    pub metrics: PrometheusHandle,
}

/// Embedded migrations, run at startup by [`Application::new`].
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

fn create_cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}

async fn render_metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    state.metrics.render()
}

/// Builds the admin router: delivery listing/replay, queue/DLQ endpoints,
/// and a Prometheus `/metrics` scrape endpoint, wrapped in request tracing
/// and a permissive CORS layer.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/admin/webhook-deliveries", get(api::handlers::webhooks::list_deliveries))
        .route("/admin/webhook-deliveries/{id}/replay", post(api::handlers::webhooks::replay_delivery))
        .route("/admin/queue/dlq", get(api::handlers::queue::list_dlq))
        .route("/admin/queue/dlq/replay", post(api::handlers::queue::replay_dlq))
        .route("/admin/queue/stats", get(api::handlers::queue::queue_stats))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer())
        .with_state(state)
}

/// A `JobHandler` adapting [`DeliveryExecutor::attempt`] to the generic
/// queue worker: the task payload carries only `delivery_id`, everything
/// else about the delivery lives in Postgres.
struct DeliveryJobHandler {
    executor: Arc<DeliveryExecutor>,
}

#[async_trait::async_trait]
impl JobHandler for DeliveryJobHandler {
    async fn handle(&self, task: &queue::Task, cancel: CancellationToken) -> anyhow::Result<JobOutcome> {
        let delivery_id: uuid::Uuid = task
            .payload
            .get("delivery_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("task {} payload missing delivery_id", task.id))?
            .parse()?;

        match self.executor.attempt(delivery_id, &cancel).await? {
            webhooks::ExecutorOutcome::Ack => Ok(JobOutcome::Ack),
            webhooks::ExecutorOutcome::Nack => Ok(JobOutcome::Nack),
        }
    }
}

/// Background tasks that run for the lifetime of the process: the task
/// queue worker loop today. Held so [`Application::serve`] can race the
/// HTTP server's graceful shutdown against an unexpected background-task
/// failure.
struct BackgroundServices {
    worker: tokio::task::JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Owns every long-lived dependency wired up at startup: the database pool,
/// Redis-backed queue/lock/replay-guard, the resilience envelope, the event
/// bus, and the background worker loop.
pub struct Application {
    state: AppState,
    bus: Arc<EventBus>,
    background: BackgroundServices,
    bind_address: String,
}

impl Application {
    /// Runs migrations, wires every dependency, and spawns the background
    /// worker loop. Returns once everything is ready to `serve`.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let metrics = PrometheusBuilder::new().install_recorder()?;

        let db = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?;

        migrator().run(&db).await?;

        let redis_client = redis::Client::open(config.redis.url.clone())?;
        let redis_conn = redis_client.get_connection_manager().await?;

        let queue = Arc::new(RedisQueueStore::new(redis_conn.clone(), config.queue.redis_prefix.clone()));
        let replay_guard = Arc::new(ReplayGuard::new(redis_conn.clone()));
        let lock = Arc::new(DistributedLock::new(redis_conn.clone(), config.lock.retry_backoff.into()));

        let scheduler_config = SchedulerConfig {
            default_max_attempts: config.webhook.default_max_attempts,
            idempotency_ttl: config.idempotency_ttl.into(),
        };
        let scheduler = Arc::new(DeliveryScheduler::new(db.clone(), Arc::clone(&queue), scheduler_config.clone()));

        let breaker = Arc::new(CircuitBreaker::new(
            "webhook",
            CircuitBreakerConfig {
                min_requests: config.circuit.webhook_min_req,
                failure_ratio: config.circuit.webhook_failure_rate,
                open_for: config.circuit.webhook_open_for.into(),
            },
        ));
        let http_client = Arc::new(ResilientHttpClient::new(
            build_reqwest_client(&config)?,
            breaker,
            ResilientHttpConfig {
                max_attempts: config.retry.max_attempts,
                per_call_timeout: Duration::from_millis(config.webhook.request_timeout_ms),
                backoff_base: config.retry.base.into(),
                backoff_jitter: config.retry.jitter_percent,
            },
        ));

        let executor = Arc::new(DeliveryExecutor::new(
            db.clone(),
            Arc::clone(&lock),
            Arc::clone(&replay_guard),
            http_client,
            ExecutorConfig {
                replay_ttl: config.webhook.replay_ttl.into(),
                replay_guard_prefix: config.queue.redis_prefix.clone(),
                lock_ttl: config.lock.ttl.into(),
                backoff_base: config.queue.backoff_base.into(),
                backoff_jitter: config.queue.backoff_jitter,
            },
        ));

        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(EmailNotifier::new(&config.email)?)];
        let bus = Arc::new(EventBus::new(
            db.clone(),
            DeliveryScheduler::new(db.clone(), Arc::clone(&queue), scheduler_config),
            notifiers,
        ));

        let shutdown = CancellationToken::new();
        let worker = Worker::new(
            Arc::clone(&queue),
            WorkerConfig {
                kind: WEBHOOK_DELIVERY_KIND.to_string(),
                concurrency: config.queue.concurrency_webhook,
                visibility_timeout: config.queue.visibility_timeout.into(),
                soft_deadline: config.worker.job_soft_deadline.into(),
                backoff_base: config.queue.backoff_base.into(),
                backoff_jitter: config.queue.backoff_jitter,
                heartbeat_interval: config.worker.heartbeat_interval.into(),
                requeue_sweep_interval: Duration::from_secs(1),
            },
        );
        let handler: Arc<dyn JobHandler> = Arc::new(DeliveryJobHandler { executor });
        let worker_shutdown = shutdown.clone();
        let worker_handle = tokio::spawn(async move { Arc::new(worker).run(handler, worker_shutdown).await });

        let bind_address = config.bind_address();
        let state = AppState::builder()
            .db(db)
            .queue(queue)
            .replay_guard(replay_guard)
            .scheduler(scheduler)
            .config(Arc::new(config))
            .metrics(metrics)
            .build();

        Ok(Self {
            state,
            bus,
            background: BackgroundServices {
                worker: worker_handle,
                shutdown,
            },
            bind_address,
        })
    }

    /// The event bus for this process. Callers outside the admin HTTP
    /// surface (the surrounding commerce backend, typically) use this to
    /// emit domain events that this pipeline then schedules and delivers.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Serves the admin HTTP surface until `shutdown` resolves, then signals
    /// the background worker to stop and waits for it to drain.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = build_router(self.state);
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        tracing::info!(address = %self.bind_address, "listening");

        let worker_shutdown = self.background.shutdown.clone();
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            shutdown.await;
            worker_shutdown.cancel();
        });

        let worker = self.background.worker;
        let background_shutdown = self.background.shutdown;
        tokio::select! {
            result = serve => result.map_err(anyhow::Error::from)?,
            result = worker => {
                background_shutdown.cancel();
                result?;
                anyhow::bail!("background worker exited unexpectedly");
            }
        }

        Ok(())
    }
}

fn build_reqwest_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_millis(config.webhook.request_timeout_ms));
    if config.webhook.allow_insecure_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_builder_requires_every_field() {
        // Compile-time check only: `AppState::builder()` must accept exactly
        // the fields this module constructs in `Application::new`. No
        // runtime assertion is meaningful without a live Postgres/Redis.
        fn _assert_builder_shape(
            db: PgPool,
            queue: Arc<RedisQueueStore>,
            replay_guard: Arc<ReplayGuard>,
            scheduler: Arc<DeliveryScheduler>,
            config: Arc<Config>,
            metrics: PrometheusHandle,
        ) -> AppState {
            AppState::builder()
                .db(db)
                .queue(queue)
                .replay_guard(replay_guard)
                .scheduler(scheduler)
                .config(config)
                .metrics(metrics)
                .build()
        }
    }
}
