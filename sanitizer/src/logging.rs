//! Operator diagnostics via `tracing`.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not consumed by the image pipeline.
//!
//! - **Metadata sink (`io/metadata`)**: the `state`/`error` keys the capture
//!   orchestrator polls. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn,sanitizer=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` for this crate and `warn` elsewhere.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=sanitizer=debug sanitizer sanitize
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
