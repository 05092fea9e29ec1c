//! Tracing setup for the scheduler process.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// Target for fairness samples, shared by the monitor and the simulation so
/// operators can filter them apart from the rest of the process log, e.g.
/// `RUST_LOG=warn,metrics=info`.
pub const METRICS_TARGET: &str = "metrics.fairness";

/// Installs the global subscriber: INFO by default, `RUST_LOG` overrides,
/// human-readable output on stderr.
pub fn init() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(fmt_layer).init();
}
