//! Application State
//!
//! Shared state across all handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use parley_config::Settings;
use parley_core::{ResponseAgent, Transcriber};
use parley_llm::ChatAgent;
use parley_pipeline::{
    DeepgramTranscriber, RouterConfig, SessionConfig, SessionRouter, SynthesizerBackend,
};

use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// One session per live websocket
    pub router: Arc<SessionRouter>,
    /// Absent when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        router: Arc<SessionRouter>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            router,
            metrics,
        }
    }

    /// Build the hosted capabilities named in `settings` and the router sharing them
    pub fn from_settings(
        settings: Settings,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ServerError> {
        let transcriber: Arc<dyn Transcriber> =
            Arc::new(DeepgramTranscriber::new(settings.transcriber.clone())?);
        let agent: Arc<dyn ResponseAgent> = Arc::new(ChatAgent::from_config(&settings.agent)?);
        let synthesizer = SynthesizerBackend::from_config(&settings.synthesizer);

        tracing::info!(
            transcriber = transcriber.model_name(),
            agent = agent.name(),
            synthesizer = synthesizer.name(),
            "Capabilities configured"
        );

        let router = SessionRouter::new(
            router_config(&settings),
            agent,
            synthesizer,
            transcriber,
        );
        Ok(Self::new(settings, Arc::new(router), metrics))
    }
}

pub fn router_config(settings: &Settings) -> RouterConfig {
    RouterConfig {
        session: SessionConfig::from(&settings.session),
        max_sessions: settings.server.max_sessions,
    }
}
