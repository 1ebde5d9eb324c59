//! Generic concurrency driver over [`crate::queue::store::RedisQueueStore`]:
//! `concurrency` claim loops bounded by a semaphore, a requeue-expired
//! ticker, and a depth/DLQ-size heartbeat. One [`Worker`] instance drives
//! one task `kind`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::queue::store::{QueueError, RedisQueueStore, Task};

/// What a [`JobHandler`] reports back about one claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Ack,
    Nack,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handles one claimed task under `cancel`, which fires at the job's
    /// soft deadline. A handler that ignores cancellation and overruns the
    /// visibility timeout is redelivered via the requeue-expired sweep, not
    /// double-counted as a breaker/handler failure.
    async fn handle(&self, task: &Task, cancel: CancellationToken) -> anyhow::Result<JobOutcome>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub kind: String,
    pub concurrency: usize,
    pub visibility_timeout: Duration,
    /// Strictly less than `visibility_timeout`; defaults to
    /// `visibility_timeout * 0.75` so handlers have a margin to yield
    /// before redelivery.
    pub soft_deadline: Duration,
    pub backoff_base: Duration,
    pub backoff_jitter: f64,
    pub heartbeat_interval: Duration,
    pub requeue_sweep_interval: Duration,
}

impl WorkerConfig {
    pub fn new(kind: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            kind: kind.into(),
            concurrency: 4,
            visibility_timeout,
            soft_deadline: Duration::from_secs_f64(visibility_timeout.as_secs_f64() * 0.75),
            backoff_base: Duration::from_secs(1),
            backoff_jitter: 0.1,
            heartbeat_interval: Duration::from_secs(10),
            requeue_sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Drives claim/handle/ack-or-nack loops for one task kind, plus the
/// requeue-expired ticker and depth/DLQ heartbeat, until `shutdown` fires.
pub struct Worker {
    store: Arc<RedisQueueStore>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(store: Arc<RedisQueueStore>, config: WorkerConfig) -> Self {
        Self { store, config }
    }

    /// Runs until `shutdown` is cancelled. On shutdown, claim loops stop
    /// pulling new work (in-flight jobs are bounded by their own soft
    /// deadline) and one final requeue-expired pass runs before returning.
    pub async fn run(self: Arc<Self>, handler: Arc<dyn JobHandler>, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..self.config.concurrency {
            let this = Arc::clone(&self);
            let handler = Arc::clone(&handler);
            let semaphore = Arc::clone(&semaphore);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { this.claim_loop(handler, semaphore, shutdown).await });
        }

        {
            let this = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { this.sweep_loop(shutdown).await });
        }

        {
            let this = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { this.heartbeat_loop(shutdown).await });
        }

        while tasks.join_next().await.is_some() {}

        if let Err(err) = self.store.requeue_expired(&self.config.kind).await {
            tracing::warn!(kind = %self.config.kind, error = %err, "final requeue-expired sweep failed");
        }
    }

    async fn claim_loop(&self, handler: Arc<dyn JobHandler>, semaphore: Arc<Semaphore>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.expect("semaphore never closed"),
                _ = shutdown.cancelled() => return,
            };

            let claimed = tokio::select! {
                claimed = self.store.claim(&self.config.kind, self.config.visibility_timeout) => claimed,
                _ = shutdown.cancelled() => {
                    drop(permit);
                    return;
                }
            };

            let task = match claimed {
                Ok(Some(task)) => task,
                Ok(None) => {
                    drop(permit);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(kind = %self.config.kind, error = %err, "claim failed");
                    drop(permit);
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            let store = Arc::clone(&self.store);
            let backoff_base = self.config.backoff_base;
            let backoff_jitter = self.config.backoff_jitter;
            let soft_deadline = self.config.soft_deadline;

            tokio::spawn(async move {
                let _permit = permit;
                let job_cancel = CancellationToken::new();
                let deadline_cancel = job_cancel.clone();
                let deadline_guard = tokio::spawn(async move {
                    tokio::time::sleep(soft_deadline).await;
                    deadline_cancel.cancel();
                });

                let outcome = handler.handle(&task, job_cancel.clone()).await;
                deadline_guard.abort();

                match outcome {
                    Ok(JobOutcome::Ack) => {
                        if let Err(err) = store.ack(&task).await {
                            tracing::warn!(task_id = %task.id, error = %err, "ack failed");
                        }
                    }
                    Ok(JobOutcome::Nack) | Err(_) => {
                        let reason = outcome.err().map(|e| e.to_string()).unwrap_or_else(|| "handler returned nack".to_string());
                        if let Err(err) = store.nack(task.clone(), &reason, backoff_base, backoff_jitter).await {
                            tracing::warn!(task_id = %task.id, error = %err, "nack failed");
                        }
                    }
                }
            });
        }
    }

    async fn sweep_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.requeue_sweep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.store.requeue_expired(&self.config.kind).await {
                        Ok(n) if n > 0 => tracing::debug!(kind = %self.config.kind, requeued = n, "requeued expired in-flight tasks"),
                        Ok(_) => {}
                        Err(err) => tracing::warn!(kind = %self.config.kind, error = %err, "requeue-expired sweep failed"),
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn heartbeat_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.store.stats(&self.config.kind, self.config.visibility_timeout).await {
                        tracing::warn!(kind = %self.config.kind, error = %err, "heartbeat stats failed");
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    }
}

impl From<QueueError> for anyhow::Error {
    fn from(err: QueueError) -> Self {
        anyhow::Error::new(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_soft_deadline_is_three_quarters_of_visibility_timeout() {
        let config = WorkerConfig::new("webhook-delivery", Duration::from_secs(100));
        assert_eq!(config.soft_deadline, Duration::from_secs(75));
        assert!(config.soft_deadline < config.visibility_timeout);
    }
}
