//! Per-agent HTTP runtime server (C8).
//!
//! Router shape follows `gateway::daemon::start_gateway`: a small set of
//! routes built from handler functions in the teacher's `gateway::routes`
//! style, merged and bound via `axum::serve`. Endpoints are shaped to be
//! drop-in compatible with a prevalent local-LLM runtime's `/api/generate`,
//! `/api/chat`, `/api/tags` surface per SPEC_FULL.md §6.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm::{LLMProvider, Message};
use crate::mcp::McpMultiplexer;

use super::loop_::{AgentLoop, LoopConfig};
use super::session::SessionStore;

const SESSION_HEADER: &str = "x-session-id";

pub struct AgentRuntimeState {
    pub agent_name: String,
    pub provider: Arc<dyn LLMProvider>,
    pub mcp: Arc<McpMultiplexer>,
    pub sessions: Arc<SessionStore>,
    pub loop_config: LoopConfig,
}

impl Clone for AgentRuntimeState {
    fn clone(&self) -> Self {
        Self {
            agent_name: self.agent_name.clone(),
            provider: self.provider.clone(),
            mcp: self.mcp.clone(),
            sessions: self.sessions.clone(),
            loop_config: self.loop_config.clone(),
        }
    }
}

pub fn router(state: Arc<AgentRuntimeState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tags", get(tags))
        .route("/api/generate", post(generate))
        .route("/api/chat", post(chat))
        .route("/api/sessions/stats", get(sessions_stats))
        .route("/api/sessions/cleanup", post(sessions_cleanup))
        .with_state(state)
}

async fn health(State(state): State<Arc<AgentRuntimeState>>) -> impl IntoResponse {
    match state.provider.warmup().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "agent": state.agent_name }))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unreachable", "agent": state.agent_name })),
        ),
    }
}

async fn tags(State(state): State<Arc<AgentRuntimeState>>) -> impl IntoResponse {
    Json(json!({
        "models": [{ "name": state.agent_name, "model": state.agent_name }]
    }))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    #[allow(dead_code)]
    model: Option<String>,
    prompt: String,
    #[serde(default)]
    stream: bool,
}

/// Distinguishes the two drop-in-compatible endpoints, which echo the same
/// completion under different field names: `response` for `/api/generate`,
/// `message` for `/api/chat`.
#[derive(Clone, Copy)]
enum EndpointKind {
    Generate,
    Chat,
}

async fn generate(State(state): State<Arc<AgentRuntimeState>>, Json(req): Json<GenerateRequest>) -> Response {
    let history = vec![Message::user(req.prompt)];
    run_and_respond(state, history, req.stream, None, EndpointKind::Generate).await
}

#[derive(Debug, Deserialize)]
struct ChatMessageDto {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    #[allow(dead_code)]
    model: Option<String>,
    messages: Vec<ChatMessageDto>,
    #[serde(default)]
    stream: bool,
}

async fn chat(
    State(state): State<Arc<AgentRuntimeState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    let incoming_session = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
    let session_id = state.sessions.get_or_create(incoming_session);

    for m in &req.messages {
        let message = match m.role.as_str() {
            "system" => Message::system(m.content.clone()),
            "assistant" => Message::assistant(m.content.clone()),
            "tool" => Message::tool(m.content.clone()),
            _ => Message::user(m.content.clone()),
        };
        state.sessions.append(&session_id, message);
    }

    let history = state.sessions.history(&session_id);
    run_and_respond(state, history, req.stream, Some(session_id), EndpointKind::Chat).await
}

async fn run_and_respond(
    state: Arc<AgentRuntimeState>,
    history: Vec<Message>,
    stream: bool,
    session_id: Option<String>,
    kind: EndpointKind,
) -> Response {
    let agent_loop = AgentLoop::new(state.provider.clone(), state.mcp.clone(), state.loop_config.clone());
    let outcome = match agent_loop.run(&state.agent_name, &history).await {
        Ok(outcome) => outcome,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "detail": e.to_string() })),
            )
                .into_response();
        }
    };

    if let Some(session_id) = &session_id {
        for message in outcome.appended {
            state.sessions.append(session_id, message);
        }
    }

    let mut headers = HeaderMap::new();
    if let Some(session_id) = &session_id {
        if let Ok(value) = HeaderValue::from_str(session_id) {
            headers.insert(SESSION_HEADER, value);
        }
    }

    if !stream {
        let body = Json(match kind {
            EndpointKind::Generate => json!({
                "model": state.agent_name,
                "response": outcome.final_content,
                "done": true,
            }),
            EndpointKind::Chat => json!({
                "model": state.agent_name,
                "message": { "role": "assistant", "content": outcome.final_content },
                "done": true,
            }),
        });
        return (headers, body).into_response();
    }

    let frame = match kind {
        EndpointKind::Generate => json!({
            "model": state.agent_name,
            "response": outcome.final_content,
            "done": true,
        }),
        EndpointKind::Chat => json!({
            "model": state.agent_name,
            "message": { "role": "assistant", "content": outcome.final_content },
            "done": true,
        }),
    };
    let mut ndjson = serde_json::to_string(&frame).unwrap_or_default();
    ndjson.push('\n');
    headers.insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    (headers, ndjson).into_response()
}

#[derive(Debug, Serialize)]
struct SessionsStats {
    active_sessions: usize,
    idle_timeout_seconds: u64,
}

async fn sessions_stats(State(state): State<Arc<AgentRuntimeState>>) -> impl IntoResponse {
    Json(SessionsStats {
        active_sessions: state.sessions.active_count(),
        idle_timeout_seconds: state.sessions.idle_timeout().as_secs(),
    })
}

async fn sessions_cleanup(State(state): State<Arc<AgentRuntimeState>>) -> impl IntoResponse {
    let evicted = state.sessions.sweep();
    Json(json!({ "evicted": evicted }))
}

/// Background periodic sweep, independent of request traffic, matching
/// §4.8's "sweep runs ... periodically from C12" requirement.
pub fn spawn_periodic_sweep(sessions: Arc<SessionStore>, tick: Duration) -> tokio::task::JoinHandle<()> {
    SessionStore::spawn_sweeper(sessions, tick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmError, StreamResponse};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct EchoProvider;

    #[async_trait]
    impl LLMProvider for EchoProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "ok".to_string(),
                model: "test".to_string(),
                usage: None,
                finish_reason: Some("stop".to_string()),
            })
        }
        async fn stream(&self, _request: CompletionRequest) -> Result<StreamResponse, LlmError> {
            unimplemented!()
        }
        fn context_limit(&self) -> usize {
            4096
        }
        fn supports_tools(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            "echo"
        }
    }

    fn test_state() -> Arc<AgentRuntimeState> {
        Arc::new(AgentRuntimeState {
            agent_name: "echo".to_string(),
            provider: Arc::new(EchoProvider),
            mcp: Arc::new(McpMultiplexer::new()),
            sessions: Arc::new(SessionStore::new(Duration::from_secs(1800))),
            loop_config: LoopConfig::default(),
        })
    }

    #[tokio::test]
    async fn generate_non_streaming_echoes_under_response_field() {
        let app = router(test_state());
        let request = Request::post("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"model":"echo","prompt":"hi","stream":false}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["response"], "ok");
        assert_eq!(parsed["done"], true);
        assert!(parsed.get("message").is_none());
    }

    #[tokio::test]
    async fn chat_non_streaming_echoes_under_message_field() {
        let app = router(test_state());
        let request = Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"model":"echo","messages":[{"role":"user","content":"hi"}],"stream":false}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["message"]["content"], "ok");
        assert_eq!(parsed["done"], true);
        assert!(parsed.get("response").is_none());
    }
}
