//! Tracing initialisation for embedders and binaries.

use crate::config::LogConfig;

/// Initialise tracing to stderr.
///
/// `RUST_LOG` overrides the configured verbosity. Safe to call once per
/// process; subsequent calls are ignored.
pub fn init(config: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.verbosity.clone()));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}
