//! Tracing initialization: console `fmt` output gated by an `EnvFilter`
//! directive. Distributed tracing export is explicitly out of scope for
//! this crate (see module overview); there is no OTLP layer here.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `directive` is an `EnvFilter`
/// string (e.g. `"info"` or `"toko_webhooks=debug,info"`); `RUST_LOG`, if
/// set, takes priority over it.
pub fn init_telemetry(directive: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive.to_string()));

    tracing_subscriber::fmt().with_env_filter(env_filter).try_init().map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
