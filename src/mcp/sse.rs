//! Server-Sent-Events MCP transport: a persistent GET carries JSON-RPC
//! responses as SSE events; outbound requests are POSTed to a companion URL
//! supplied during the handshake. New transport, built against the same
//! `JsonRpcRequest`/`JsonRpcResponse` codec as stdio/HTTP, demultiplexed by
//! request id the way §4.7's concurrency contract requires.

use std::collections::HashMap;
use std::sync::Arc;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use super::protocol::{IdCounter, JsonRpcRequest, JsonRpcResponse, McpError};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct SseTransport {
    client: reqwest::Client,
    post_url: String,
    ids: IdCounter,
    pending: PendingMap,
}

impl SseTransport {
    /// Connect the persistent GET stream in the background; `post_url` is the
    /// companion endpoint outbound requests are sent to.
    pub async fn connect(stream_url: impl Into<String>, post_url: impl Into<String>) -> Result<Self, McpError> {
        let client = reqwest::Client::new();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let resp = client
            .get(stream_url.into())
            .send()
            .await
            .map_err(|e| McpError::Io(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(McpError::Io(format!("sse connect status {}", resp.status())));
        }

        let mut events = resp.bytes_stream().eventsource();
        let pending_bg = pending.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Ok(event) = event else { break };
                let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&event.data) else {
                    continue;
                };
                let id = parsed.id.as_u64();
                if let Some(id) = id {
                    if let Some(sender) = pending_bg.lock().await.remove(&id) {
                        let _ = sender.send(parsed);
                    }
                }
            }
        });

        Ok(Self {
            client,
            post_url: post_url.into(),
            ids: IdCounter::default(),
            pending,
        })
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        let id = self.ids.next();
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let resp = self
            .client
            .post(&self.post_url)
            .json(&req)
            .send()
            .await
            .map_err(|e| McpError::Io(e.to_string()))?;
        if !resp.status().is_success() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::Io(format!("sse post status {}", resp.status())));
        }

        match tokio::time::timeout(std::time::Duration::from_secs(30), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout)
            }
        }
    }
}
