//! Bounded tool-calling reasoning loop (C8).
//!
//! Generalizes the shape of the teacher's `agent::loop_::AgentLoop` (build
//! context → `LLMProvider::complete` → detect tool calls → execute → repeat)
//! with an explicit iteration cap and a `tokio::time::timeout` wall-clock cap
//! in place of the teacher's own bounds, and MCP tool execution (C7) in place
//! of the teacher's local `ToolRegistry`.

use std::sync::Arc;
use std::time::Duration;

use crate::llm::{extract_tool_call, CompletionRequest, LLMProvider, LlmError, Message};
use crate::mcp::McpMultiplexer;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: usize,
    pub wall_clock_cap: Duration,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            wall_clock_cap: Duration::from_secs(60),
            temperature: None,
            max_tokens: None,
        }
    }
}

pub struct AgentLoop {
    provider: Arc<dyn LLMProvider>,
    mcp: Arc<McpMultiplexer>,
    config: LoopConfig,
}

/// Outcome of a completed reasoning loop: the final reply plus every message
/// appended to the conversation along the way (assistant turns and tool
/// results), so the caller can persist them into the session.
pub struct LoopOutcome {
    pub final_content: String,
    pub appended: Vec<Message>,
    pub exhausted: bool,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn LLMProvider>, mcp: Arc<McpMultiplexer>, config: LoopConfig) -> Self {
        Self { provider, mcp, config }
    }

    pub async fn run(&self, model: &str, history: &[Message]) -> Result<LoopOutcome, LlmError> {
        let deadline = tokio::time::sleep(self.config.wall_clock_cap);
        tokio::pin!(deadline);

        let mut conversation = history.to_vec();
        let mut appended = Vec::new();

        for iteration in 0..self.config.max_iterations {
            let request = self.build_request(model, &conversation);

            let response = tokio::select! {
                biased;
                _ = &mut deadline => {
                    return Ok(self.exhausted_outcome(appended));
                }
                result = self.provider.complete(request) => result?,
            };

            let assistant_message = Message::assistant(response.content.clone());
            conversation.push(assistant_message.clone());
            appended.push(assistant_message);

            let Some(call) = extract_tool_call(&response.content) else {
                return Ok(LoopOutcome {
                    final_content: response.content,
                    appended,
                    exhausted: false,
                });
            };

            let tool_message = self.execute_tool(&call.name, call.arguments).await;
            conversation.push(tool_message.clone());
            appended.push(tool_message);

            if iteration + 1 == self.config.max_iterations {
                return Ok(self.exhausted_outcome(appended));
            }
        }

        Ok(self.exhausted_outcome(appended))
    }

    fn build_request(&self, model: &str, conversation: &[Message]) -> CompletionRequest {
        let mut request = CompletionRequest::new(model, conversation.to_vec());
        request.temperature = self.config.temperature;
        request.max_tokens = self.config.max_tokens;
        request
    }

    async fn execute_tool(&self, name: &str, arguments: serde_json::Value) -> Message {
        let Some((server, _descriptor)) = self.mcp.find(name).await else {
            return Message::tool(format!("{{\"error\":\"no binding exposes tool '{name}'\"}}"));
        };
        match self.mcp.call(&server, name, arguments).await {
            Ok(result) => Message::tool(result.to_string()),
            Err(e) => Message::tool(format!("{{\"error\":{:?}}}", e.to_string())),
        }
    }

    fn exhausted_outcome(&self, appended: Vec<Message>) -> LoopOutcome {
        LoopOutcome {
            final_content: "loop_exhausted".to_string(),
            appended,
            exhausted: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PlainReplyProvider;

    #[async_trait]
    impl LLMProvider for PlainReplyProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<crate::llm::CompletionResponse, LlmError> {
            Ok(crate::llm::CompletionResponse {
                content: "final answer, no tools needed".to_string(),
                model: "test".to_string(),
                usage: None,
                finish_reason: Some("stop".to_string()),
            })
        }
        async fn stream(&self, _request: CompletionRequest) -> Result<crate::llm::StreamResponse, LlmError> {
            unimplemented!()
        }
        fn context_limit(&self) -> usize {
            4096
        }
        fn supports_tools(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            "plain"
        }
    }

    struct AlwaysToolCallProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for AlwaysToolCallProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<crate::llm::CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(crate::llm::CompletionResponse {
                content: r#"{"tool_call": {"name": "echo", "arguments": {"text": "hi"}}}"#.to_string(),
                model: "test".to_string(),
                usage: None,
                finish_reason: None,
            })
        }
        async fn stream(&self, _request: CompletionRequest) -> Result<crate::llm::StreamResponse, LlmError> {
            unimplemented!()
        }
        fn context_limit(&self) -> usize {
            4096
        }
        fn supports_tools(&self) -> bool {
            true
        }
        fn provider_name(&self) -> &str {
            "loopy"
        }
    }

    #[tokio::test]
    async fn plain_reply_returns_immediately_without_tool_calls() {
        let provider: Arc<dyn LLMProvider> = Arc::new(PlainReplyProvider);
        let mcp = Arc::new(McpMultiplexer::new());
        let agent_loop = AgentLoop::new(provider, mcp, LoopConfig::default());
        let outcome = agent_loop.run("test", &[Message::user("hi")]).await.unwrap();
        assert!(!outcome.exhausted);
        assert_eq!(outcome.final_content, "final answer, no tools needed");
        assert_eq!(outcome.appended.len(), 1);
    }

    #[tokio::test]
    async fn repeated_tool_calls_exhaust_the_iteration_cap() {
        let provider: Arc<dyn LLMProvider> = Arc::new(AlwaysToolCallProvider { calls: AtomicUsize::new(0) });
        let mcp = Arc::new(McpMultiplexer::new());
        let config = LoopConfig { max_iterations: 3, ..Default::default() };
        let agent_loop = AgentLoop::new(provider, mcp, config);
        let outcome = agent_loop.run("test", &[Message::user("hi")]).await.unwrap();
        assert!(outcome.exhausted);
        assert_eq!(outcome.final_content, "loop_exhausted");
        // 3 iterations each append an assistant turn + a tool-error turn (no binding registered).
        assert_eq!(outcome.appended.len(), 6);
    }
}
