//! Stdio MCP transport: essentially `modules::mcp_client::McpProcess`
//! unchanged in shape — newline-delimited JSON over `ChildStdin`/
//! `BufReader<ChildStdout>`, one `next_id` counter per process.

use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::protocol::{IdCounter, JsonRpcRequest, JsonRpcResponse, McpError};

pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    ids: IdCounter,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| McpError::Io(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| McpError::Io("no stdin".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Io("no stdout".to_string()))?;
        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            ids: IdCounter::default(),
        })
    }

    /// Single-writer: a call holds both stdin and stdout locks for its
    /// duration so no two calls interleave a request/response pair on the
    /// shared pipe.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        let id = self.ids.next();
        let req = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&req)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(|e| McpError::Io(e.to_string()))?;
        stdin.flush().await.map_err(|e| McpError::Io(e.to_string()))?;
        drop(stdin);

        let mut stdout = self.stdout.lock().await;
        let mut resp_line = String::new();
        stdout
            .read_line(&mut resp_line)
            .await
            .map_err(|e| McpError::Io(e.to_string()))?;
        if resp_line.is_empty() {
            return Err(McpError::ConnectionClosed);
        }
        Ok(serde_json::from_str(&resp_line)?)
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notif = serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let mut line = serde_json::to_string(&notif)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(|e| McpError::Io(e.to_string()))
    }

    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }
}
