//! MCP client multiplexer (C7): stdio/HTTP/SSE transports behind one
//! cross-server tool registry.

pub mod http;
pub mod protocol;
pub mod registry;
pub mod sse;
pub mod stdio;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpError, ToolDescriptor};
pub use registry::{McpBinding, McpMultiplexer};
