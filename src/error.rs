//! # Error Handling
//!
//! Error types for every boundary in the system, and how HTTP-facing errors are
//! turned into JSON responses.
//!
//! ## Error families:
//! - **AppError**: the HTTP surface (health, sessions, config, WebSocket upgrade).
//! - **StageFailure**: one pipeline stage failed for one audio unit. The session keeps
//!   running; the client receives a single `error` message.
//! - **ClientError**: everything the client side reports to its caller.
//!
//! ## Rust Concepts:
//! - **thiserror**: derives `Display` and `std::error::Error` from attributes, so each
//!   variant's message lives right next to its definition.
//! - **ResponseError trait**: actix calls `error_response` whenever a handler returns
//!   `Err(AppError)`, so handlers can use `?` freely.

use crate::providers::ProviderError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Errors returned from HTTP handlers.
///
/// ## HTTP Status Code Mapping:
/// - BadRequest → 400
/// - NotFound → 404
/// - Capacity → 503
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The server is at its concurrent session limit.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Capacity(msg) => (StatusCode::SERVICE_UNAVAILABLE, "capacity_exceeded", msg),
        }
    }
}

/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "capacity_exceeded",
///     "message": "Maximum concurrent sessions (50) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// The three stages every audio unit passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Transcribe,
    Respond,
    Synthesize,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 3] = [
        PipelineStage::Transcribe,
        PipelineStage::Respond,
        PipelineStage::Synthesize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Transcribe => "transcribe",
            PipelineStage::Respond => "respond",
            PipelineStage::Synthesize => "synthesize",
        }
    }

    /// Human-readable name used in client-facing error messages.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Transcribe => "Transcription",
            PipelineStage::Respond => "Response generation",
            PipelineStage::Synthesize => "Speech synthesis",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline stage failed while processing one audio unit.
#[derive(Debug, Error)]
#[error("{} failed: {source}", .stage.label())]
pub struct StageFailure {
    pub stage: PipelineStage,
    #[source]
    pub source: ProviderError,
}

impl StageFailure {
    pub fn new(stage: PipelineStage, source: ProviderError) -> Self {
        Self { stage, source }
    }
}

/// Errors surfaced by the client-side components.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The microphone could not be acquired.
    #[error("Microphone unavailable: {0}")]
    PermissionDenied(String),

    /// A send was attempted while the connection was not open.
    #[error("Not connected to the session server")]
    NotConnected,

    /// The connection dropped or could not be established.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A frame that was neither a valid message nor usable audio.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Capture succeeded but the recording could not be turned into an audio unit.
    #[error("Recording failed: {0}")]
    Recording(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn test_capacity_maps_to_503_json() {
        let err = AppError::Capacity("Maximum concurrent sessions (1) reached".to_string());
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "capacity_exceeded");
        assert!(value["error"]["timestamp"].is_string());
    }

    #[test]
    fn test_stage_failure_message_names_stage() {
        let failure = StageFailure::new(
            PipelineStage::Respond,
            ProviderError::Other("model overloaded".to_string()),
        );
        assert_eq!(
            failure.to_string(),
            "Response generation failed: model overloaded"
        );
    }

    #[test]
    fn test_stage_order() {
        let names: Vec<_> = PipelineStage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["transcribe", "respond", "synthesize"]);
    }
}
