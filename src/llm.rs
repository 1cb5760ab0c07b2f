//! LLM provider abstraction (C8 dependency).
//!
//! `LLMProvider`, `Message`/`MessageRole`, and the completion request/response
//! types are carried from `ai::provider`/`ai::types` essentially unchanged;
//! `HttpLlmProvider` is the one concrete implementation, speaking the
//! `{model, messages, stream}` contract SPEC_FULL.md §6 requires against any
//! Ollama-compatible `/api/chat` endpoint.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm returned malformed response: {0}")]
    Malformed(String),
    #[error("llm unreachable")]
    Unreachable,
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Tool, content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self { model: model.into(), messages, temperature: None, max_tokens: None, top_p: None, stream: None }
    }
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub is_final: bool,
    pub finish_reason: Option<String>,
}

pub type StreamResponse = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A tool-call directive embedded in an assistant reply: a top-level JSON
/// object `{"tool_call": {"name": ..., "arguments": {...}}}` appearing
/// anywhere in the message content.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDirective {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Scan an assistant reply for an embedded tool-call directive. Returns
/// `None` when the content carries no such object, which is the common case
/// (a plain final answer).
pub fn extract_tool_call(content: &str) -> Option<ToolCallDirective> {
    #[derive(Deserialize)]
    struct Envelope {
        tool_call: ToolCallDirective,
    }
    let start = content.find("{\"tool_call\"")?;
    let candidate = &content[start..];
    serde_json::from_str::<Envelope>(candidate)
        .ok()
        .map(|e| e.tool_call)
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
    async fn stream(&self, request: CompletionRequest) -> Result<StreamResponse>;
    fn context_limit(&self) -> usize;
    fn supports_tools(&self) -> bool;
    fn provider_name(&self) -> &str;
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    #[serde(default)]
    message: Option<ChatApiMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatApiMessage {
    content: String,
}

/// Speaks the `{model, messages, stream}` → `{message: {content}, done}`
/// contract against any Ollama-compatible `/api/chat` endpoint, per
/// SPEC_FULL.md §6's "LLM interface (consumed)" contract.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    context_limit: usize,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            context_limit: 8192,
        }
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LLMProvider for HttpLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = request.with_stream(false);
        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|_| LlmError::Unreachable)?;
        if !resp.status().is_success() {
            return Err(LlmError::Transport(format!("status {}", resp.status())));
        }
        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let content = parsed
            .message
            .map(|m| m.content)
            .or(parsed.response)
            .ok_or_else(|| LlmError::Malformed("missing message/response field".to_string()))?;
        let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
            (Some(p), Some(c)) => Some(TokenUsage { prompt_tokens: p, completion_tokens: c, total_tokens: p + c }),
            _ => None,
        };
        Ok(CompletionResponse {
            content,
            model: self.model.clone(),
            usage,
            finish_reason: Some(if parsed.done { "stop".to_string() } else { "incomplete".to_string() }),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResponse> {
        let body = request.with_stream(true);
        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|_| LlmError::Unreachable)?;
        if !resp.status().is_success() {
            return Err(LlmError::Transport(format!("status {}", resp.status())));
        }

        let byte_stream = resp.bytes_stream();
        let chunk_stream = byte_stream.flat_map(|chunk| {
            let lines: Vec<Result<StreamChunk>> = match chunk {
                Ok(bytes) => String::from_utf8_lossy(&bytes)
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|line| {
                        serde_json::from_str::<ChatApiResponse>(line)
                            .map_err(|e| LlmError::Malformed(e.to_string()))
                            .map(|parsed| StreamChunk {
                                delta: parsed.message.map(|m| m.content).or(parsed.response).unwrap_or_default(),
                                is_final: parsed.done,
                                finish_reason: if parsed.done { Some("stop".to_string()) } else { None },
                            })
                    })
                    .collect(),
                Err(e) => vec![Err(LlmError::Transport(e.to_string()))],
            };
            futures::stream::iter(lines)
        });
        Ok(Box::pin(chunk_stream))
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "http"
    }

    async fn warmup(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url.trim_end_matches('/')))
            .send()
            .await
            .map_err(|_| LlmError::Unreachable)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::Unreachable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::system("s").role, MessageRole::System);
        assert_eq!(Message::user("u").role, MessageRole::User);
        assert_eq!(Message::assistant("a").role, MessageRole::Assistant);
        assert_eq!(Message::tool("t").role, MessageRole::Tool);
    }

    #[test]
    fn completion_request_builder_sets_fields() {
        let req = CompletionRequest::new("agent-a", vec![Message::user("hi")])
            .with_temperature(0.2)
            .with_max_tokens(128)
            .with_stream(true);
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(128));
        assert_eq!(req.stream, Some(true));
    }

    #[test]
    fn extracts_embedded_tool_call() {
        let content = r#"Let me check that. {"tool_call": {"name": "echo", "arguments": {"text": "hello"}}}"#;
        let call = extract_tool_call(content).unwrap();
        assert_eq!(call.name, "echo");
        assert_eq!(call.arguments["text"], "hello");
    }

    #[test]
    fn plain_reply_has_no_tool_call() {
        assert!(extract_tool_call("just a normal final answer").is_none());
    }

    #[tokio::test]
    async fn complete_against_mock_server_returns_content() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"content": "hello there"},
                "done": true,
                "prompt_eval_count": 3,
                "eval_count": 2
            })))
            .mount(&server)
            .await;

        let provider = HttpLlmProvider::new(server.uri(), "agent-a", Duration::from_secs(5));
        let resp = provider
            .complete(CompletionRequest::new("agent-a", vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(resp.content, "hello there");
        assert_eq!(resp.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn complete_against_unreachable_server_is_unreachable_error() {
        let provider = HttpLlmProvider::new("http://127.0.0.1:1", "agent-a", Duration::from_millis(200));
        let err = provider
            .complete(CompletionRequest::new("agent-a", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unreachable));
    }
}
