//! Controller entry point (C0): deployment pipeline, supervisor, and the
//! management API (C5) bound on a single host:port.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use agentctl::config::{self, ControllerConfig};
use agentctl::shutdown::{self, DEFAULT_WATCHDOG_TIMEOUT, EXIT_CONFIG_ERROR, EXIT_FATAL_STARTUP, EXIT_OK};
use agentctl::{api, metrics, Controller};

#[derive(Parser, Debug)]
#[command(name = "agentctl", version, about = "Multi-tenant AI-agent deployment controller")]
struct Args {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    api_port: Option<u16>,
    #[arg(long)]
    base_port: Option<u16>,
    #[arg(long)]
    max_agents: Option<u16>,
    #[arg(long = "agents-dir")]
    agents_directory: Option<PathBuf>,
    #[arg(long)]
    auth_credential: Option<String>,
    /// Path to a config.toml file; defaults to $AGENTCTL_CONFIG or
    /// ~/.agentctl/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_and_merge(args: &Args) -> Result<ControllerConfig, config::ConfigError> {
    let mut cfg = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::load_default_config()?,
    };
    if let Some(v) = &args.host {
        cfg.host = v.clone();
    }
    if let Some(v) = args.api_port {
        cfg.api_port = v;
    }
    if let Some(v) = args.base_port {
        cfg.base_port = v;
    }
    if let Some(v) = args.max_agents {
        cfg.max_agents = v;
    }
    if let Some(v) = &args.agents_directory {
        cfg.agents_directory = v.clone();
    }
    if let Some(v) = &args.auth_credential {
        cfg.auth_credential = v.clone();
    }
    Ok(cfg)
}

/// Resolve the sibling `agentctl-agent` binary next to this executable —
/// the default entry point for bundles that declare no `entry_point` of
/// their own.
fn agent_binary_path() -> PathBuf {
    let name = if cfg!(windows) { "agentctl-agent.exe" } else { "agentctl-agent" };
    match std::env::current_exe() {
        Ok(mut path) => {
            path.set_file_name(name);
            path
        }
        Err(_) => PathBuf::from(name),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    agentctl::logging::init();

    let args = Args::parse();
    let config = match load_and_merge(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR as u8);
        }
    };

    let controller = match Controller::new(config, agent_binary_path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to initialize controller: {e}");
            return ExitCode::from(EXIT_FATAL_STARTUP as u8);
        }
    };

    if controller.config.metrics_enabled {
        metrics::install();
    }

    let app = api::router(controller.api_state(), controller.auth_state());
    let addr = format!("{}:{}", controller.config.host, controller.config.api_port);
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            return ExitCode::from(EXIT_FATAL_STARTUP as u8);
        }
    };

    tracing::info!(%addr, "management API listening");

    let supervisor = controller.supervisor.clone();
    let bus = controller.bus.clone();

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let signal = shutdown::wait_for_shutdown_signal().await;
            tracing::info!(signal, "shutdown signal received, draining instances");
        })
        .await;

    if let Err(e) = result {
        eprintln!("management API server error: {e}");
    }

    let clean = shutdown::graceful_shutdown(supervisor, bus, DEFAULT_WATCHDOG_TIMEOUT).await;
    if clean {
        ExitCode::from(EXIT_OK as u8)
    } else {
        ExitCode::from(EXIT_FATAL_STARTUP as u8)
    }
}
