//! Diagnostics setup using tracing
//!
//! Everything goes to stderr; stdout belongs to the multiplexer.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used without `--debug` or `RUST_LOG`; keeps per-command byte echo visible
const DEFAULT_FILTER: &str = "warn,concur::raw=info";

/// Install the global subscriber
pub fn init(debug: bool) -> anyhow::Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
