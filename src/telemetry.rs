use tracing_subscriber::{filter::EnvFilter, fmt};

/// Environment variable that overrides the configured log filter.
pub const LOG_ENV: &str = "NODE_CONSOLE_LOG";

/// Picks the filter directive.
/// Order: NODE_CONSOLE_LOG env -> `--verbose` -> config `log_level`.
pub fn filter_directive(env_value: Option<String>, verbose: bool, configured: &str) -> String {
    match env_value {
        Some(s) if !s.trim().is_empty() => s,
        _ if verbose => "debug".to_string(),
        _ => configured.to_string(),
    }
}

/// Initialize global logging to stderr; stdout belongs to the dashboard.
pub fn init_telemetry(verbose: bool, configured: &str) {
    let directive = filter_directive(std::env::var(LOG_ENV).ok(), verbose, configured);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();

    tracing::debug!(filter = %directive, "telemetry initialized");
}
