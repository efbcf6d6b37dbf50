//! Minimal structured logging init for embedders of this crate.

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Initialize a process-wide `tracing` subscriber.
///
/// `verbose` raises the default level to `debug`; `quiet` drops it to `error`.
/// Explicit `RUST_LOG` always wins when neither flag is set.
pub fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
