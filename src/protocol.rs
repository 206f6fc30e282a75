//! # Wire Protocol
//!
//! Messages the server pushes to a client over the session WebSocket.
//!
//! ## Framing:
//! - **Client → Server**: one raw binary frame per complete audio unit. No envelope.
//! - **Server → Client**: UTF-8 JSON text frames shaped as `{"type": "...", ...}`.
//!
//! ## Per-unit ordering:
//! For every audio unit the server emits exactly one `transcription`, then one
//! `response`, then one `audio`. If a pipeline stage fails, the remaining messages
//! for that unit are replaced by a single `error`.
//!
//! ## Rust Concepts:
//! - **Internally tagged enums**: `#[serde(tag = "type")]` puts the variant name into a
//!   `type` field next to the variant's own fields, which is exactly the JSON shape
//!   browsers and other clients expect.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A structured server → client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    /// What the Transcriber heard.
    Transcription { text: String },

    /// What the Responder answered.
    Response { text: String },

    /// Synthesized speech, base64 encoded.
    Audio { audio: String },

    /// A pipeline stage or protocol failure for one audio unit.
    Error { message: String },

    /// Informational notices (ready, idle timeout, ...).
    #[serde(alias = "ready")]
    Status { message: String },
}

impl WireMessage {
    pub fn transcription(text: impl Into<String>) -> Self {
        WireMessage::Transcription { text: text.into() }
    }

    pub fn response(text: impl Into<String>) -> Self {
        WireMessage::Response { text: text.into() }
    }

    /// Wrap raw synthesized audio bytes, encoding them as base64.
    pub fn audio(bytes: &[u8]) -> Self {
        WireMessage::Audio {
            audio: BASE64.encode(bytes),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WireMessage::Error {
            message: message.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        WireMessage::Status {
            message: message.into(),
        }
    }

    /// The value of the `type` field for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Transcription { .. } => "transcription",
            WireMessage::Response { .. } => "response",
            WireMessage::Audio { .. } => "audio",
            WireMessage::Error { .. } => "error",
            WireMessage::Status { .. } => "status",
        }
    }

    /// Decode the payload of an `audio` message back into raw bytes.
    ///
    /// Returns `None` for every other variant.
    pub fn decode_audio(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        match self {
            WireMessage::Audio { audio } => Some(BASE64.decode(audio)),
            _ => None,
        }
    }

    /// Serialize to the JSON text frame sent on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
