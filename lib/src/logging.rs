use tracing_subscriber::EnvFilter;

fn filter_for(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

/// Server-side tracing: stdout, env-filter overridable via `RUST_LOG`.
pub fn init_server_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(verbose))
        .init();
}

/// CLI/runner tracing: stderr so command output stays clean on stdout.
pub fn init_client_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
