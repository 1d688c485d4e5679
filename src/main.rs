//! alertwatch server
//!
//! Run with: cargo run
//!
//! See [`alertwatch::config`] for the environment variables. `RUST_LOG`
//! overrides the default log filter.

use alertwatch::api::run_server;
use alertwatch::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    alertwatch::logging::init(config.tz);

    tracing::info!("alertwatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Store: {:?} ({})", config.store, config.db_path);
    tracing::info!("  Reference offset: {}", config.tz);
    tracing::info!("  Alert timeout: {:?}", config.alert_timeout);
    tracing::info!("  Sweep interval: {:?}", config.check_interval);
    tracing::info!(
        "  Retention: daily at {}, grace {:?}",
        config.retention.run_at,
        config.retention.grace
    );
    match config.webhook.url.as_deref() {
        Some(url) => tracing::info!("  Notify endpoint: {}", url),
        None => tracing::info!("  Notify endpoint: (not configured)"),
    }

    run_server(config).await
}
