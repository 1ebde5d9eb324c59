//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `config.yaml` but can be given via
//! `-f`/`--config` or the `TOKO_CONFIG` environment variable.
//!
//! ## Loading priority
//!
//! 1. YAML config file (default `config.yaml`).
//! 2. Environment variables prefixed `TOKO_`, later overriding the file.
//!    Nested fields use a double underscore, e.g. `TOKO_QUEUE__REDIS_PREFIX`.
//! 3. `DATABASE_URL` / `REDIS_URL`, if set, override `database.url` /
//!    `redis.url` respectively — the common container/orchestrator
//!    convention, checked in addition to the `TOKO_`-prefixed form.

use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file.
    #[arg(short = 'f', long, env = "TOKO_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Admin HTTP bind host.
    pub host: String,
    /// Admin HTTP bind port.
    pub port: u16,
    /// `development` or `production`. Gates `webhook.allow_insecure_tls`.
    pub environment: Environment,
    /// Log `EnvFilter` directive, e.g. `info` or `toko_webhooks=debug,info`.
    pub log: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub webhook: WebhookConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub circuit: CircuitConfig,
    pub retry: RetryConfig,
    pub lock: LockConfig,
    pub idempotency_ttl: HumanDuration,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub default_max_attempts: i32,
    pub backoff_base_sec: u64,
    pub request_timeout_ms: u64,
    pub replay_ttl: HumanDuration,
    /// Allows `http://` endpoints outside loopback. Refused at load time
    /// when `environment = production`.
    pub allow_insecure_tls: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub redis_prefix: String,
    pub visibility_timeout: HumanDuration,
    pub concurrency_webhook: usize,
    pub backoff_base: HumanDuration,
    pub backoff_jitter: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub heartbeat_interval: HumanDuration,
    pub job_soft_deadline: HumanDuration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub webhook_min_req: u32,
    pub webhook_failure_rate: f64,
    pub webhook_open_for: HumanDuration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base: HumanDuration,
    pub jitter_percent: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl: HumanDuration,
    pub retry_backoff: HumanDuration,
}

/// Email configuration for webhook-adjacent notifications.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailConfig {
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
        use_tls: bool,
    },
    File {
        path: String,
    },
}

/// Thin wrapper so config fields can be written in YAML/env as `"30s"`,
/// `"5m"` etc via `humantime_serde`, while exposing a plain [`Duration`].
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(transparent)]
pub struct HumanDuration(#[serde(with = "humantime_serde")] pub Duration);

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: Environment::Development,
            log: "info".to_string(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            webhook: WebhookConfig::default(),
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
            circuit: CircuitConfig::default(),
            retry: RetryConfig::default(),
            lock: LockConfig::default(),
            idempotency_ttl: HumanDuration(Duration::from_secs(600)),
            email: EmailConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/toko_webhooks".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 8,
            backoff_base_sec: 2,
            request_timeout_ms: 10_000,
            replay_ttl: HumanDuration(Duration::from_secs(300)),
            allow_insecure_tls: false,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_prefix: "toko".to_string(),
            visibility_timeout: HumanDuration(Duration::from_secs(60)),
            concurrency_webhook: 8,
            backoff_base: HumanDuration(Duration::from_secs(1)),
            backoff_jitter: 0.1,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HumanDuration(Duration::from_secs(10)),
            job_soft_deadline: HumanDuration(Duration::from_secs(45)),
        }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            webhook_min_req: 10,
            webhook_failure_rate: 0.5,
            webhook_open_for: HumanDuration(Duration::from_secs(30)),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base: HumanDuration(Duration::from_secs(2)),
            jitter_percent: 0.2,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: HumanDuration(Duration::from_secs(30)),
            retry_backoff: HumanDuration(Duration::from_millis(100)),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::default(),
            from_email: "noreply@example.com".to_string(),
            from_name: "Webhooks".to_string(),
        }
    }
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        Self::File { path: "./emails".to_string() }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new().merge(Yaml::file(&args.config)).merge(Env::prefixed("TOKO_").split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Enforces `visibility_timeout ≥ lock_ttl ≥ soft_deadline` (see §5) and
    /// refuses insecure-TLS webhooks in production.
    pub fn validate(&self) -> Result<(), Error> {
        let visibility_timeout: Duration = self.queue.visibility_timeout.into();
        let lock_ttl: Duration = self.lock.ttl.into();
        let soft_deadline: Duration = self.worker.job_soft_deadline.into();

        if !(visibility_timeout >= lock_ttl && lock_ttl >= soft_deadline) {
            return Err(Error::InvalidConfig {
                message: format!(
                    "visibility_timeout ({visibility_timeout:?}) must be >= lock.ttl ({lock_ttl:?}) \
                     which must be >= worker.job_soft_deadline ({soft_deadline:?})"
                ),
            });
        }

        if self.webhook.allow_insecure_tls && self.environment == Environment::Production {
            return Err(Error::InvalidConfig {
                message: "webhook.allow_insecure_tls cannot be set when environment = production".to_string(),
            });
        }

        if self.webhook.default_max_attempts < 1 {
            return Err(Error::InvalidConfig {
                message: "webhook.default_max_attempts must be >= 1".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.queue.backoff_jitter) {
            return Err(Error::InvalidConfig {
                message: "queue.backoff_jitter must be in [0, 1]".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_satisfy_timeout_ordering() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_visibility_timeout_shorter_than_lock_ttl() {
        let mut config = Config::default();
        config.queue.visibility_timeout = HumanDuration(Duration::from_secs(1));
        config.lock.ttl = HumanDuration(Duration::from_secs(30));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_insecure_tls_in_production() {
        let mut config = Config::default();
        config.environment = Environment::Production;
        config.webhook.allow_insecure_tls = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_nested_fields_with_double_underscore() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "host: 0.0.0.0\nport: 8080\n")?;
            jail.set_env("TOKO_QUEUE__REDIS_PREFIX", "custom-prefix");
            jail.set_env("TOKO_QUEUE__CONCURRENCY_WEBHOOK", "16");

            let args = Args {
                config: "test.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).unwrap();

            assert_eq!(config.queue.redis_prefix, "custom-prefix");
            assert_eq!(config.queue.concurrency_webhook, 16);
            Ok(())
        });
    }
}
