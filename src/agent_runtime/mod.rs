//! Per-agent HTTP runtime (C8): session memory, the bounded tool-calling
//! reasoning loop, and the axum server exposing it.

pub mod loop_;
pub mod server;
pub mod session;

pub use loop_::{AgentLoop, LoopConfig, LoopOutcome};
pub use server::{router, AgentRuntimeState};
pub use session::SessionStore;
