use axum::{http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Tools reported under the `tool` label.
const TOOLS: &[&str] = &["domain", "dns", "whois", "health", "ip", "ssl", "ssl_labs", "ticket", "kb", "triage"];

pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);

            // Initialize metrics with zero values
            for tool in TOOLS {
                counter!("toolkit_requests_total", "tool" => *tool).absolute(0);
            }
            counter!("toolkit_cache_hits_total", "tool" => "whois").absolute(0);
            counter!("toolkit_cache_misses_total", "tool" => "whois").absolute(0);
            counter!("toolkit_errors_total", "error_type" => "unknown").absolute(0);
            counter!("toolkit_ai_model_fallbacks_total").absolute(0);
            gauge!("toolkit_uptime_seconds").set(0.0);
            histogram!("toolkit_request_duration_seconds", "tool" => "whois").record(0.0);
        }
        Err(e) => {
            tracing::warn!("Failed to install metrics recorder: {}", e);
        }
    }
}

pub fn increment_requests(tool: &'static str) {
    counter!("toolkit_requests_total", "tool" => tool).increment(1);
}

/// Count a lookup as a cache hit or miss.
pub fn record_cache(tool: &'static str, hit: bool) {
    if hit {
        counter!("toolkit_cache_hits_total", "tool" => tool).increment(1);
    } else {
        counter!("toolkit_cache_misses_total", "tool" => tool).increment(1);
    }
}

pub fn increment_errors(error_type: &'static str) {
    counter!("toolkit_errors_total", "error_type" => error_type).increment(1);
}

pub fn record_model_fallbacks(fallbacks: usize) {
    if fallbacks > 0 {
        counter!("toolkit_ai_model_fallbacks_total").increment(fallbacks as u64);
    }
}

pub fn record_query_time(tool: &'static str, duration_ms: u64) {
    let duration_seconds = duration_ms as f64 / 1000.0;
    histogram!("toolkit_request_duration_seconds", "tool" => tool).record(duration_seconds);
}

pub fn set_uptime(seconds: u64) {
    gauge!("toolkit_uptime_seconds").set(seconds as f64);
}

pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized".to_string()),
    }
}
