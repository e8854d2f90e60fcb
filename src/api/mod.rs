//! HTTP API: agent queries (JSON or server-sent events) and health.
//!
//! ## Endpoints
//!
//! - `POST /api/agent-query` - Run a query through the orchestrator or one built-in agent
//! - `GET /api/health` - Liveness and version

mod events;
mod rate_limit;
mod routes;
pub mod types;

pub use events::{ChannelSink, ClientEvent};
pub use rate_limit::{FixedWindowLimiter, RateLimitDecision, RateLimiter};
pub use routes::{routes, AppState};

use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agents::BuiltinAgents;
use crate::config::Config;
use crate::llm::{LlmClient, OpenAiClient};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};

/// Build the application state from configuration.
pub fn build_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
        config.api_key.clone(),
        config.base_url.clone(),
    ));
    let agents = if config.memory_enabled {
        BuiltinAgents::with_memory(llm, &config.default_model)?
    } else {
        BuiltinAgents::new(llm, &config.default_model)?
    };
    let orchestrator = Orchestrator::new(
        agents,
        OrchestratorSettings {
            heartbeat_interval: config.heartbeat_interval,
            timeout: config.request_timeout,
            max_turns: config.max_turns,
        },
    );

    Ok(Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        rate_limiter: Arc::new(FixedWindowLimiter::new(config.rate_limit)),
        config,
    }))
}

/// Start the HTTP server and serve until it fails.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = build_state(config)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Server ready to accept connections");

    axum::serve(listener, app).await?;
    Ok(())
}
