use tracing_subscriber::EnvFilter;

/// stdout carries the bridge protocol, so logs only ever go to stderr.
pub fn init(log_level: &str) {
    // RUST_LOG wins over --log-level; dependencies stay at warn otherwise.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,sqlite_worker={log_level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}
