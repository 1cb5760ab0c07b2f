//! Management API error mapping (C5).
//!
//! Every handler error funnels through `ApiError::into_response`, producing
//! `{detail: string}` with an appropriate status code per §4.5's "Response
//! shape" contract. The verbose diagnostic (stdout/stderr tails,
//! classification) stays reachable via `/agents/{name}/diagnostics` rather
//! than leaking into this envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::provision::ProvisionError;
use crate::storage::StorageError;
use crate::supervisor::instance::SupervisorError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("agent {0} not found")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Provision(ProvisionError::MissingManifest)
            | ApiError::Provision(ProvisionError::InvalidManifest(_))
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(StorageError::NotFound(_))
            | ApiError::Supervisor(SupervisorError::NotFound(_))
            | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(StorageError::DuplicateHash)
            | ApiError::Supervisor(SupervisorError::AlreadyRunning(_)) => StatusCode::CONFLICT,
            ApiError::Supervisor(SupervisorError::NoAvailablePort) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
