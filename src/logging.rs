//! Tracing subscriber setup.
//!
//! Operator messages (progress, warnings, per-record failures) go through
//! `tracing` to **stderr**, so stdout carries only command results and stays
//! parseable for scripts.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the CLI
//! verbosity (`info`, or `debug` with `--verbose`).

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("commit_harness={0},chx={0},warn", default_level)));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
