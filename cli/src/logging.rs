use tracing_subscriber::EnvFilter;

/// Environment variable enabling verbose local logging.
pub const DEBUG_VAR: &str = "TM_DEBUG";

/// Initialize the tracing subscriber.
///
/// Logs go to stderr only; stdout is reserved for command output. The
/// default filter is `warn`, raised to `debug` by `TM_DEBUG`, and
/// `RUST_LOG` overrides both.
pub fn init() {
    let default = if std::env::var(DEBUG_VAR).map(|v| v == "1" || v == "true").unwrap_or(false) {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();
}
