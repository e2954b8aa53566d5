//! Logging setup for the binary.

use tracing_subscriber::{prelude::*, EnvFilter};

/// Installs a stderr `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `default_level` when set. Calling this
/// twice is harmless; the second call leaves the first subscriber in place.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let logger = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    // Stdout carries the preview and summary, so logs go to stderr.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(logger)
        .try_init();
}
