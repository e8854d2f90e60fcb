//! HTTP handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{ChannelSink, ClientEvent};
use super::rate_limit::RateLimiter;
use super::types::{AgentQueryRequest, AgentQueryResponse, ErrorResponse, HealthResponse, QueryTarget};
use crate::agent::ExecutionContext;
use crate::agents::{AgentKind, TriageResult};
use crate::config::Config;
use crate::orchestrator::Orchestrator;

/// Shared state for all handlers.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/agent-query", post(agent_query))
}

// ─────────────────────────────────────────────────────────────────────────────
// GET /api/health
// ─────────────────────────────────────────────────────────────────────────────

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// POST /api/agent-query
// ─────────────────────────────────────────────────────────────────────────────

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Caller identity for rate limiting: first `x-forwarded-for` hop.
fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

pub async fn agent_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<AgentQueryRequest>, JsonRejection>,
) -> Response {
    let identity = client_identity(&headers);
    let decision = state.rate_limiter.check(&identity);
    if !decision.allowed {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "Rate limit exceeded. Try again in {} seconds.",
                decision.retry_after_seconds
            ),
        );
    }

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected agent query body");
            return error_response(StatusCode::BAD_REQUEST, "Missing or invalid query parameter");
        }
    };
    let Some(query) = request.valid_query().map(str::to_string) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid query parameter");
    };

    let target = request.target();
    tracing::info!(
        identity = %identity,
        target = ?target,
        stream = request.stream,
        "Agent query received"
    );

    if request.stream {
        return stream_response(&state, query, target, &request).into_response();
    }

    let started = Instant::now();
    let mut response = match target {
        QueryTarget::Orchestrated => {
            let result = state
                .orchestrator
                .handle_query(&query, request.run_config())
                .await;
            AgentQueryResponse {
                success: result.success,
                content: None,
                report: result.report,
                error: result.error,
                metadata: result.metadata,
            }
        }
        QueryTarget::Agent(kind) => run_agent(&state, kind, &query).await,
    };
    response.metadata = with_processing_time(response.metadata, started);

    Json(response).into_response()
}

async fn run_agent(state: &AppState, kind: AgentKind, query: &str) -> AgentQueryResponse {
    let agent = state.orchestrator.agents().get(kind);
    let mut context = ExecutionContext::new().with_max_turns(state.config.max_turns);
    if kind == AgentKind::Delegation {
        context = context.with_original_query(query);
    }
    let response = agent.handle_task(query, context).await;

    if kind == AgentKind::Triage && response.success {
        return match TriageResult::parse(&response.content) {
            Ok(triage) => {
                let mut metadata = response.metadata;
                if let Some(map) = metadata.as_object_mut() {
                    map.insert("taskType".to_string(), json!(triage.task_type.as_str()));
                }
                AgentQueryResponse {
                    success: true,
                    content: Some(response.content),
                    report: None,
                    error: None,
                    metadata,
                }
            }
            Err(e) => AgentQueryResponse {
                success: false,
                content: None,
                report: None,
                error: Some("Failed to parse triage response".to_string()),
                metadata: json!({ "parsingError": e.to_string() }),
            },
        };
    }

    AgentQueryResponse {
        success: response.success,
        content: Some(response.content),
        report: None,
        error: response.error,
        metadata: response.metadata,
    }
}

fn with_processing_time(metadata: Value, started: Instant) -> Value {
    let elapsed = json!(started.elapsed().as_millis() as u64);
    match metadata {
        Value::Object(mut map) => {
            map.insert("processingTime".to_string(), elapsed);
            Value::Object(map)
        }
        Value::Null => json!({ "processingTime": elapsed }),
        other => json!({ "processingTime": elapsed, "value": other }),
    }
}

// ─── Streaming ───────────────────────────────────────────────────────────────

struct StreamDropGuard {
    stream_id: Uuid,
    cancel: CancellationToken,
}

impl Drop for StreamDropGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        tracing::info!(stream_id = %self.stream_id, "Agent query SSE stream closed");
    }
}

/// Run the query on a background task and relay its events as SSE. The run
/// is cancelled when the client goes away.
fn stream_response(
    state: &AppState,
    query: String,
    target: QueryTarget,
    request: &AgentQueryRequest,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientEvent>();
    let cancel = CancellationToken::new();
    let stream_id = Uuid::new_v4();
    tracing::info!(stream_id = %stream_id, "Agent query SSE stream opened");

    let orchestrator = state.orchestrator.clone();
    let run_config = request.run_config();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let sink = ChannelSink::new(tx);
        let run = async {
            match target {
                QueryTarget::Orchestrated => {
                    orchestrator.stream_query(&query, &sink, run_config).await
                }
                QueryTarget::Agent(kind) => orchestrator.stream_agent(kind, &query, &sink).await,
            }
        };
        tokio::select! {
            _ = run_cancel.cancelled() => {
                tracing::info!(stream_id = %stream_id, "Client disconnected; run cancelled");
            }
            _ = run => {}
        }
    });

    let drop_guard = StreamDropGuard { stream_id, cancel };

    let stream = async_stream::stream! {
        let _guard = drop_guard;
        while let Some(ev) = rx.recv().await {
            match &ev {
                ClientEvent::Token { .. } | ClientEvent::Heartbeat { .. } => {
                    tracing::trace!(stream_id = %stream_id, event = %ev.event_name(), "Agent query SSE event");
                }
                _ => {
                    tracing::debug!(stream_id = %stream_id, event = %ev.event_name(), "Agent query SSE event");
                }
            }
            let terminal = ev.is_terminal();
            match Event::default().event(ev.event_name()).json_data(&ev) {
                Ok(sse) => yield Ok(sse),
                Err(e) => {
                    tracing::error!(
                        stream_id = %stream_id,
                        event = %ev.event_name(),
                        error = %e,
                        "Failed to serialize SSE event; dropping"
                    );
                }
            }
            if terminal {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};

    use crate::agents::BuiltinAgents;
    use crate::api::rate_limit::FixedWindowLimiter;
    use crate::config::RateLimitConfig;
    use crate::llm::scripted::ScriptedLlm;
    use crate::orchestrator::OrchestratorSettings;

    fn state(llm: ScriptedLlm, max_requests: u32) -> Arc<AppState> {
        let mut config = Config::new("test-key", "gpt-4o");
        config.rate_limit = RateLimitConfig {
            window: std::time::Duration::from_secs(60),
            max_requests,
        };
        let agents = BuiltinAgents::new(Arc::new(llm), "gpt-4o").unwrap();
        Arc::new(AppState {
            orchestrator: Arc::new(Orchestrator::new(agents, OrchestratorSettings::default())),
            rate_limiter: Arc::new(FixedWindowLimiter::new(config.rate_limit)),
            config,
        })
    }

    fn request(body: Value) -> Result<Json<AgentQueryRequest>, JsonRejection> {
        Ok(Json(serde_json::from_value(body).unwrap()))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(body: Body) -> String {
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_version() {
        let Json(health) = health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn blank_query_is_bad_request() {
        let state = state(ScriptedLlm::new(), 10);
        let response = agent_query(State(state), HeaderMap::new(), request(json!({ "query": " " }))).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            "Missing or invalid query parameter"
        );
    }

    #[tokio::test]
    async fn rate_limited_caller_gets_429() {
        let state = state(ScriptedLlm::new(), 1);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());

        let first = agent_query(State(state.clone()), headers.clone(), request(json!({ "query": "" }))).await;
        assert_eq!(first.status(), StatusCode::BAD_REQUEST);

        let second = agent_query(State(state), headers, request(json!({ "query": "hi" }))).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(second).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Rate limit exceeded. Try again in"));
    }

    #[tokio::test]
    async fn single_agent_query_adds_processing_time() {
        let state = state(ScriptedLlm::new().with_text("A short report."), 10);
        let response = agent_query(
            State(state),
            HeaderMap::new(),
            request(json!({ "query": "write it up", "agentType": "report" })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["content"], "A short report.");
        assert!(body["metadata"]["processingTime"].is_u64());
    }

    #[tokio::test]
    async fn triage_query_that_is_not_json_fails_cleanly() {
        let state = state(ScriptedLlm::new().with_text("no idea"), 10);
        let response = agent_query(
            State(state),
            HeaderMap::new(),
            request(json!({ "query": "classify", "agentType": "triage" })),
        )
        .await;

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Failed to parse triage response");
        assert!(body["metadata"]["parsingError"].is_string());
    }

    #[tokio::test]
    async fn orchestrated_query_returns_report() {
        let llm = ScriptedLlm::new()
            .with_text(r#"{"taskType":"report","reasoning":"material supplied"}"#)
            .with_text("Final report [1]");
        let state = state(llm, 10);
        let response = agent_query(
            State(state),
            HeaderMap::new(),
            request(json!({ "query": "summarize", "workflowName": "api-test" })),
        )
        .await;

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["report"], "Final report [1]");
        assert_eq!(body["metadata"]["taskType"], "report");
        assert_eq!(body["metadata"]["workflowName"], "api-test");
        assert!(body["metadata"]["processingTime"].is_u64());
    }

    #[tokio::test]
    async fn streamed_triage_emits_named_events_and_ends() {
        let llm = ScriptedLlm::new()
            .with_text(r#"{"taskType":"direct","reasoning":"simple question"}"#);
        let state = state(llm, 10);
        let response = agent_query(
            State(state),
            HeaderMap::new(),
            request(json!({ "query": "hello", "agentType": "triage", "stream": true })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response.into_body()).await;
        let names: Vec<_> = text
            .lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect();
        assert_eq!(names, vec!["start", "triage", "token", "complete"]);
        assert!(text.contains("simple question"));
    }

    #[test]
    fn identity_falls_back_to_unknown() {
        assert_eq!(client_identity(&HeaderMap::new()), "unknown");
    }
}
