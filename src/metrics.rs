//! Prometheus-style metrics exposition (C11), feature-gated behind
//! `metrics`. Compiled out, `/metrics` answers 501 per §4.11.
//!
//! Counter/gauge/histogram names follow SPEC_FULL.md's §4.11 table exactly
//! so operators scraping `/metrics` see the documented series regardless of
//! which component actually recorded them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once at startup. No-op when the
/// `metrics` feature is compiled out.
pub fn install() {
    #[cfg(feature = "metrics")]
    {
        if HANDLE.get().is_none() {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder");
            let _ = HANDLE.set(handle);
        }
    }
}

pub async fn handler() -> Response {
    #[cfg(feature = "metrics")]
    {
        match HANDLE.get() {
            Some(handle) => (StatusCode::OK, handle.render()).into_response(),
            None => (StatusCode::NOT_IMPLEMENTED, "metrics recorder not installed").into_response(),
        }
    }
    #[cfg(not(feature = "metrics"))]
    {
        (StatusCode::NOT_IMPLEMENTED, "metrics feature not compiled in").into_response()
    }
}

pub fn record_agent_deployed() {
    #[cfg(feature = "metrics")]
    metrics::counter!("agent_deployments_total").increment(1);
}

pub fn record_instance_started() {
    #[cfg(feature = "metrics")]
    metrics::counter!("agent_starts_total").increment(1);
}

pub fn record_instance_stopped() {
    #[cfg(feature = "metrics")]
    metrics::counter!("agent_stops_total").increment(1);
}

pub fn record_instance_restarted() {
    #[cfg(feature = "metrics")]
    metrics::counter!("agent_restarts_total").increment(1);
}

pub fn record_agents_total(count: usize) {
    #[cfg(feature = "metrics")]
    metrics::gauge!("agents_total").set(count as f64);
}

pub fn record_api_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "metrics")]
    {
        let method = method.to_string();
        let path = path.to_string();
        let status = status.to_string();
        metrics::counter!("api_requests_total", "method" => method.clone(), "path" => path.clone(), "status" => status)
            .increment(1);
        metrics::histogram!("api_request_duration_seconds", "method" => method, "path" => path)
            .record(duration_secs);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

pub fn record_auth_attempt(success: bool) {
    #[cfg(feature = "metrics")]
    {
        let outcome = if success { "success" } else { "failure" };
        metrics::counter!("auth_attempts_total", "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = success;
    }
}

pub fn record_allocated_ports(count: usize) {
    #[cfg(feature = "metrics")]
    metrics::gauge!("allocated_ports_total").set(count as f64);
}

pub fn record_checksum_cache_hit() {
    #[cfg(feature = "metrics")]
    metrics::counter!("checksum_cache_hits_total").increment(1);
}

pub fn record_checksum_cache_miss() {
    #[cfg(feature = "metrics")]
    metrics::counter!("checksum_cache_misses_total").increment(1);
}

pub fn record_deployment_duration(duration_secs: f64) {
    #[cfg(feature = "metrics")]
    metrics::histogram!("deployment_duration_seconds").record(duration_secs);
    #[cfg(not(feature = "metrics"))]
    {
        let _ = duration_secs;
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handler_returns_ok_after_install() {
        install();
        let response = handler().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[cfg(all(test, not(feature = "metrics")))]
mod tests_disabled {
    use super::*;

    #[tokio::test]
    async fn handler_returns_not_implemented_when_feature_off() {
        let response = handler().await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
