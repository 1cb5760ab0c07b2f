//! Management API handlers (C5), directly generalizing `gateway::routes`'
//! `State<GatewayState>` + `Json` in / `impl IntoResponse` out handler shape.

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::bus::ControllerEvent;
use crate::provision::ProvisionStatus;
use crate::storage::AgentRecord;
use crate::supervisor::instance::RuntimeInstance;

use super::error::ApiError;
use super::state::{ApiState, VERSION};

pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": VERSION,
        "auth_enabled": !state.config.auth_credential.is_empty(),
        "metrics_enabled": state.config.metrics_enabled,
    }))
}

#[derive(Debug, Serialize)]
struct AgentSummary {
    name: String,
    hash: String,
    version: String,
    capabilities: Vec<String>,
    instance: Option<RuntimeInstance>,
}

fn summarize(record: AgentRecord, state: &ApiState) -> AgentSummary {
    let instance = state.supervisor.status(&record.name);
    AgentSummary {
        name: record.name,
        hash: record.hash,
        version: record.version,
        capabilities: record.capabilities,
        instance,
    }
}

pub async fn list_agents(State(state): State<ApiState>) -> impl IntoResponse {
    let summaries: Vec<AgentSummary> = state.index.list().into_iter().map(|r| summarize(r, &state)).collect();
    Json(json!({ "agents": summaries }))
}

pub async fn check_agent(State(state): State<ApiState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.index.lookup_by_name(&name) {
        Some(record) => Json(json!({ "exists": true, "hash": record.hash })),
        None => Json(json!({ "exists": false, "hash": serde_json::Value::Null })),
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    status: &'static str,
    name: String,
    hash: String,
}

pub async fn upload(State(state): State<ApiState>, mut multipart: Multipart) -> Result<impl IntoResponse, ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut requested_name: Option<String> = None;
    let mut force = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                file_bytes = Some(data.to_vec());
            }
            "name" => {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                requested_name = Some(text);
            }
            "force" => {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                force = text == "true" || text == "1";
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| ApiError::BadRequest("missing `file` field".to_string()))?;

    let _guard = if let Some(name) = &requested_name {
        Some(state.upload_lock(name).lock_owned().await)
    } else {
        None
    };

    let outcome = state
        .provisioner
        .provision(&state.index, &bytes, requested_name.as_deref(), force)
        .await?;

    let status = match outcome.status {
        ProvisionStatus::Deployed => {
            state.bus.publish(ControllerEvent::AgentDeployed {
                name: outcome.record.name.clone(),
                hash: outcome.record.hash.clone(),
            });
            "deployed"
        }
        ProvisionStatus::Cached => {
            state.bus.publish(ControllerEvent::AgentExists {
                name: outcome.record.name.clone(),
                hash: outcome.record.hash.clone(),
            });
            "exists"
        }
    };

    Ok(Json(UploadResponse {
        status,
        name: outcome.record.name,
        hash: outcome.record.hash,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AgentNameBody {
    pub agent_name: String,
}

fn lookup_record(state: &ApiState, name: &str) -> Result<AgentRecord, ApiError> {
    state.index.lookup_by_name(name).ok_or_else(|| ApiError::NotFound(name.to_string()))
}

pub async fn start_agent(
    State(state): State<ApiState>,
    Json(body): Json<AgentNameBody>,
) -> Result<impl IntoResponse, ApiError> {
    let record = lookup_record(&state, &body.agent_name)?;
    let instance = state.supervisor.start(&record, state.config.restart_on_failure).await?;
    Ok(Json(instance))
}

pub async fn stop_agent(
    State(state): State<ApiState>,
    Json(body): Json<AgentNameBody>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = state.supervisor.stop(&body.agent_name).await?;
    Ok(Json(instance))
}

pub async fn restart_agent(
    State(state): State<ApiState>,
    Json(body): Json<AgentNameBody>,
) -> Result<impl IntoResponse, ApiError> {
    let record = lookup_record(&state, &body.agent_name)?;
    let instance = state.supervisor.restart(&record, state.config.restart_on_failure).await?;
    Ok(Json(instance))
}

pub async fn status(State(state): State<ApiState>, Path(name): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state
        .supervisor
        .status(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(name))
}

#[derive(Debug, Serialize)]
struct DiagnosticsResponse {
    agent_name: String,
    exit_code: Option<i32>,
    classification: Option<String>,
    remediation: Option<String>,
    stdout_tail: String,
    stderr_tail: String,
}

pub async fn diagnostics(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = state.supervisor.status(&name).ok_or_else(|| ApiError::NotFound(name.clone()))?;
    let diag = instance.last_diagnostic;
    Ok(Json(DiagnosticsResponse {
        agent_name: name,
        exit_code: diag.as_ref().and_then(|d| d.exit_code),
        classification: diag.as_ref().map(|d| format!("{:?}", d.classification)),
        remediation: diag.as_ref().map(|d| d.remediation.clone()),
        stdout_tail: diag.as_ref().map(|d| d.stdout_tail.clone()).unwrap_or_default(),
        stderr_tail: diag.as_ref().map(|d| d.stderr_tail.clone()).unwrap_or_default(),
    }))
}
