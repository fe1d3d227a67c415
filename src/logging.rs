//! Structured logging init, driven by `LOG_LEVEL`/`LOG_FORMAT` (§4.1).
//!
//! Builds a `tracing_subscriber::fmt()` subscriber with an env-driven
//! filter, switching to JSON output when `LOG_FORMAT=json`.

use crate::config::Config;

pub fn init(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
