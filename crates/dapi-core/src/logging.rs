//! Subscriber setup for applications embedding the client.
//!
//! Library code only emits `tracing` events; nothing here runs unless the embedding
//! application asks for it.

use tracing_subscriber::{
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Builds the filter: `RUST_LOG` when set and valid, otherwise `warn` globally and the
/// configured level for this crate.
#[must_use]
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    let fallback = format!("warn,dapi_core={}", config.level);
    match std::env::var("RUST_LOG") {
        Ok(directives) if directives == "debug" || directives == "trace" => {
            EnvFilter::new(format!("warn,dapi_core={directives},tests={directives}"))
        }
        Ok(_) => EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(fallback)),
        Err(_) => EnvFilter::new(fallback),
    }
}

/// Installs a global subscriber writing `json` or `pretty` output.
///
/// # Errors
///
/// Returns [`TryInitError`] when a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    if config.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        // "pretty" and any other format default to pretty logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).try_init()
    }
}
