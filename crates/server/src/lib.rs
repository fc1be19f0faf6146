//! Parley server
//!
//! Provides the WebSocket conversation transport and the HTTP health and metrics
//! endpoints.

pub mod http;
pub mod metrics;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;

use parley_llm::LlmError;
use parley_pipeline::PipelineError;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Agent error: {0}")]
    Agent(#[from] LlmError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Pipeline(PipelineError::SessionLimit(_)) => {
                axum::http::StatusCode::SERVICE_UNAVAILABLE
            },
            ServerError::Pipeline(PipelineError::DuplicateSession(_)) => {
                axum::http::StatusCode::CONFLICT
            },
            ServerError::WebSocket(_) | ServerError::InvalidRequest(_) => {
                axum::http::StatusCode::BAD_REQUEST
            },
            ServerError::Config(_)
            | ServerError::Pipeline(_)
            | ServerError::Agent(_)
            | ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
