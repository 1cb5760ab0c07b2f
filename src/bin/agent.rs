//! Per-agent HTTP runtime host (C8), spawned as a subprocess by the
//! supervisor for any bundle that doesn't declare its own `entry_point`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use agentctl::agent_runtime::session::SessionStore;
use agentctl::agent_runtime::{router, server, AgentRuntimeState, LoopConfig};
use agentctl::config::manifest;
use agentctl::llm::HttpLlmProvider;
use agentctl::mcp::McpMultiplexer;

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(1800);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_LLM_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_CONTEXT_LIMIT: usize = 8192;

#[derive(Parser, Debug)]
#[command(name = "agentctl-agent", about = "Per-agent HTTP runtime host")]
struct Args {
    /// Path to the bundle's manifest file (or its containing directory).
    #[arg(long)]
    manifest: PathBuf,
    #[arg(long)]
    port: u16,
}

fn manifest_dir(path: &std::path::Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
    }
}

#[tokio::main]
async fn main() {
    agentctl::logging::init();
    let args = Args::parse();
    let dir = manifest_dir(&args.manifest);

    let bundle = match manifest::load_from_dir(&dir) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("failed to load manifest from {dir:?}: {e}");
            std::process::exit(1);
        }
    };

    let base_url = bundle.llm.base_url.clone().unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string());
    let model = bundle.llm.model.clone().unwrap_or_else(|| bundle.agent.name.clone());
    let provider = Arc::new(
        HttpLlmProvider::new(base_url, model, Duration::from_secs(bundle.llm.request_timeout))
            .with_context_limit(DEFAULT_CONTEXT_LIMIT),
    );

    let mcp = Arc::new(McpMultiplexer::new());
    for (name, err) in mcp.connect_from_manifest(&bundle).await {
        tracing::warn!(server = %name, error = %err, "mcp server connection failed at startup");
    }

    let sessions = Arc::new(SessionStore::new(DEFAULT_SESSION_TIMEOUT));
    server::spawn_periodic_sweep(sessions.clone(), DEFAULT_SWEEP_INTERVAL);

    let mut loop_config = LoopConfig::default();
    loop_config.temperature = Some(bundle.llm.temperature);
    loop_config.max_tokens = Some(bundle.llm.max_tokens);

    let state = Arc::new(AgentRuntimeState {
        agent_name: bundle.agent.name.clone(),
        provider,
        mcp,
        sessions,
        loop_config,
    });

    let app = router(state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(agent = %bundle.agent.name, %addr, "agent runtime listening");
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("agent runtime server error: {e}");
        std::process::exit(1);
    }
}
