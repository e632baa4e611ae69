//! Development logging setup.
//!
//! Tracing here is dev diagnostics only, driven by `RUST_LOG` and written to
//! stderr. Engine results are carried in envelopes, never through the log
//! stream.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber for development logging.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset. Output: stderr, compact
/// format.
///
/// # Example
/// ```bash
/// RUST_LOG=cog_engine=debug cargo test
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
