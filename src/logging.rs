// Laminate layer builder.

//! Structured logging setup for the `laminate` binary.

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber. Respects `RUST_LOG` if set,
/// otherwise falls back to `default_level`. JSON output is for callers
/// (e.g. CI, other tooling) that want to parse our logs; humans get plain
/// text.
pub fn init(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
