use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

pub use tracing_subscriber::util::TryInitError;

/// Filter directive for a configured level, scoped to this crate.
pub fn filter_directive(level: &str) -> String {
    format!("sensorweb_harvester={}", level.trim().to_ascii_lowercase())
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .try_init()
    }
}
