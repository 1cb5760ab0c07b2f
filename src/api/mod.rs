//! Management API (C5): the controller's externally visible entry point to
//! provisioning (C3) and supervision (C4).

pub mod error;
pub mod routes;
pub mod state;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::auth::{auth_middleware, AuthState};

pub use error::ApiError;
pub use state::ApiState;

/// Build the full router: a public sub-router for `/health` and `/metrics`
/// (never behind auth, per §4.5), merged with a protected sub-router
/// carrying everything else behind `auth_middleware`, wrapped in a
/// permissive `CorsLayer` — the same split `gateway::daemon::start_gateway`
/// uses.
pub fn router(state: ApiState, auth: AuthState) -> Router {
    let public = Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(crate::metrics::handler))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/agents", get(routes::list_agents))
        .route("/agents/check/{name}", get(routes::check_agent))
        .route("/agents/upload", post(routes::upload))
        .route("/agents/start", post(routes::start_agent))
        .route("/agents/stop", post(routes::stop_agent))
        .route("/agents/restart", post(routes::restart_agent))
        .route("/status/{name}", get(routes::status))
        .route("/agents/{name}/diagnostics", get(routes::diagnostics))
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .with_state(state);

    Router::new().merge(public).merge(protected).layer(CorsLayer::permissive())
}
