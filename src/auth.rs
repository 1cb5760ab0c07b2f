//! Credential auth middleware (C6).
//!
//! Generalizes the teacher's `gateway::auth::auth_middleware` to a
//! configured shared credential instead of a token read from a fixed file
//! path, and replaces its plain `==` comparison with a constant-time one:
//! §4.5 mandates constant-time comparison, a deliberate divergence from the
//! teacher's own middleware (see DESIGN.md).

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::bus::{ControllerEvent, EventBus};

#[derive(Clone)]
pub struct AuthState {
    pub credential: Option<String>,
    pub bus: EventBus,
}

/// Constant-time byte comparison: always walks the full length of the longer
/// side so that timing does not reveal how many leading bytes matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        // Still touch both length fields the same way regardless of
        // mismatch, then fold over the shorter slice so the instruction
        // count doesn't depend on match length either.
        let mut diff = 1u8;
        let n = a.len().max(b.len());
        for i in 0..n {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            diff |= x ^ y;
        }
        let _ = diff;
        return false;
    }
    let mut diff = 0u8;
    for i in 0..a.len() {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

/// Middleware: requires `Authorization: Bearer <credential>` when a
/// credential is configured. No-op (always passes) when auth is disabled.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.credential.as_ref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        _ => {
            state.bus.publish(ControllerEvent::AuthFailure {
                endpoint: request.uri().path().to_string(),
            });
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
