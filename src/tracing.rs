use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// `default_filter` applies when `RUST_LOG` is not set. `LOG_COMPACT=1` drops
/// file/line annotations for terminal use.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let verbose = !crate::util::env::env_flag("LOG_COMPACT", false);

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_line_number(verbose)
        .with_file(verbose)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
