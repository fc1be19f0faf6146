//! Prometheus metrics
//!
//! Recorded through the `metrics` facade; without an installed recorder every call
//! is a no-op.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use parley_core::{Capability, EndReason, Role};
use parley_pipeline::SessionEvent;

use crate::state::AppState;
use crate::ServerError;

/// Install the Prometheus recorder
///
/// Must be called once at startup before recording any metrics.
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Internal(format!("metrics recorder: {}", e)))?;

    register_default_metrics();
    Ok(handle)
}

fn register_default_metrics() {
    gauge!("parley_sessions_active").set(0.0);
    counter!("parley_sessions_started_total").absolute(0);
    counter!("parley_sessions_rejected_total").absolute(0);
    counter!("parley_interruptions_total").absolute(0);

    for capability in [
        Capability::Transcriber,
        Capability::ResponseAgent,
        Capability::SpeechSynthesizer,
    ] {
        counter!("parley_capability_failures_total", "capability" => capability.as_str())
            .absolute(0);
    }
}

pub fn record_session_started(active: usize) {
    counter!("parley_sessions_started_total").increment(1);
    record_active_sessions(active);
}

pub fn record_session_rejected() {
    counter!("parley_sessions_rejected_total").increment(1);
}

pub fn record_session_ended(reason: EndReason, active: usize) {
    counter!("parley_sessions_ended_total", "reason" => reason.as_str()).increment(1);
    record_active_sessions(active);
}

pub fn record_active_sessions(count: usize) {
    gauge!("parley_sessions_active").set(count as f64);
}

pub fn record_turn(role: Role) {
    counter!("parley_turns_total", "role" => role.as_str()).increment(1);
}

pub fn record_interruption() {
    counter!("parley_interruptions_total").increment(1);
}

pub fn record_capability_failure(capability: Capability) {
    counter!("parley_capability_failures_total", "capability" => capability.as_str())
        .increment(1);
}

pub fn record_first_chunk_latency(latency: Duration) {
    histogram!("parley_agent_first_chunk_seconds").record(latency.as_secs_f64());
}

/// Fold one session event into the metrics
pub fn record_event(event: &SessionEvent) {
    match event {
        SessionEvent::TurnRecorded { role, .. } => record_turn(*role),
        SessionEvent::Interrupted { .. } => record_interruption(),
        SessionEvent::CapabilityFailed { capability, .. } => record_capability_failure(*capability),
        SessionEvent::FirstChunk { latency, .. } => record_first_chunk_latency(*latency),
        _ => {},
    }
}

/// Metrics endpoint handler
///
/// Returns Prometheus-formatted metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_sessions(state.router.active_sessions());

    match state.metrics.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics disabled".to_string(),
        ),
    }
}
