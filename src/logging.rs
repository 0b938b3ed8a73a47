use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` writing to stderr, filtered by
/// `CLB_LOG` first, then `RUST_LOG`, then `info`.
///
/// stdout is left for the JSON report.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("CLB_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
