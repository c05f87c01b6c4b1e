//! Tracing configuration for rotlog
//!
//! Diagnostics always go to stderr: stdout is left alone and stdin is the
//! data being logged. ANSI colors are only used when stderr is a terminal.

use std::io::IsTerminal;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Initialize tracing.
///
/// Respects RUST_LOG env var, otherwise uses the provided default filter.
pub fn init_tracing(default_filter: &str) {
    // Create environment filter (RUST_LOG or provided default)
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::debug!(
        "tracing initialized, logging to stderr with filter '{}'",
        default_filter,
    );
}
