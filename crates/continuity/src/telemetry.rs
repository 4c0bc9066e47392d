//! Tracing setup for hosts that run the memory engine standalone and have no
//! subscriber of their own.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

/// Memory internals log at info; dependency noise stays at warn.
const DEFAULT_DIRECTIVE: &str = "warn,continuity=info";

/// Install the process-wide subscriber. Filter precedence: `RUST_LOG`, then
/// the `logFilter` config key, then the crate default. A no-op when the host
/// already installed a subscriber — its choice wins.
pub fn init_tracing(config: &Config) {
    let directive = resolve_directive(std::env::var("RUST_LOG").ok(), config);

    let subscriber = fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_target(false)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn resolve_directive(env_filter: Option<String>, config: &Config) -> String {
    env_filter
        .filter(|f| !f.trim().is_empty())
        .or_else(|| config.log_filter.clone())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}
