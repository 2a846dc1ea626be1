use std::env;
use tracing_subscriber::{fmt, EnvFilter};

/// Logs go to stderr only; the scan stores are the sole on-disk artifacts.
/// `RUST_LOG` wins, then `TRACING_LEVEL`, then "info".
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(env::var("TRACING_LEVEL").unwrap_or_else(|_| "info".to_string()))
    });
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
