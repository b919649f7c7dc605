//! Tracing setup for the `ledger-steps` binary.
//!
//! Step progress (queries, installs, block dumps) is logged at `info`; call
//! details and CLI failures at `debug`. Output goes to stderr so stdout stays
//! free for command results.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `info` for this crate and `warn` elsewhere.
///
/// # Example
/// ```bash
/// RUST_LOG=ledger_steps=debug ledger-steps run features/query.feature
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,ledger_steps=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
