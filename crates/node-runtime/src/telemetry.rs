//! Logging setup.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Preferred log level variable.
pub const ENV_LOG_LEVEL: &str = "RA_LOG_LEVEL";

/// Default filter when no variable is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Filter directive from `RA_LOG_LEVEL`, then `RUST_LOG`, then `info`.
pub fn log_directive(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(ENV_LOG_LEVEL)
        .or_else(|| lookup("RUST_LOG"))
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned())
}

/// Install the global subscriber.
pub fn init_tracing() -> anyhow::Result<()> {
    let directive = log_directive(|key| std::env::var(key).ok());
    let filter =
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
