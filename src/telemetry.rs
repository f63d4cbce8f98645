use crate::config::LogFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the process-wide `tracing` subscriber: an `EnvFilter`
/// seeded from `log_level` (overridable via `RUST_LOG`) plus a text or
/// JSON formatting layer. Shipping these events to a collector is outside
/// this crate's scope; this only wires up structured emission.
///
/// # Errors
/// Returns an error if `log_level` is not a valid filter directive.
pub fn init_telemetry(log_level: &str, format: LogFormat) -> anyhow::Result<()> {
    let directive = if log_level == "silent" { "off" } else { log_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let registry = tracing_subscriber::Registry::default().with(filter);

    match format {
        LogFormat::Text => {
            registry.with(tracing_subscriber::fmt::layer()).try_init()?;
        }
        LogFormat::Json => {
            registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
        }
    }

    Ok(())
}

/// Initializes a minimal subscriber for tests, silencing noisy crates
/// while keeping warnings and above visible.
pub fn init_test_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
