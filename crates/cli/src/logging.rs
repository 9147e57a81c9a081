use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the stderr log subscriber. `RUST_LOG` overrides the default
/// level; `log` records from the library crates are forwarded.
pub fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
