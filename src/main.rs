//! Conductor - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the agent query API.

use conductor::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conductor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        base_url = %config.base_url,
        model = %config.default_model,
        max_turns = config.max_turns,
        timeout_secs = config.request_timeout.as_secs(),
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        rate_limit = config.rate_limit.max_requests,
        rate_window_secs = config.rate_limit.window.as_secs(),
        memory = config.memory_enabled,
        "Conductor configured"
    );
    info!(host = %config.host, port = config.port, "Starting agent query API");

    api::serve(config).await?;

    Ok(())
}
