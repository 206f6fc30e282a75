//! # voice-session
//!
//! A real-time voice session service and its client.
//!
//! A user's recording travels to the server as one binary WebSocket frame, runs through
//! Transcribe → Respond → Synthesize, and comes back as ordered JSON messages over the
//! same long-lived connection.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **error**: Error types and HTTP error responses
//! - **protocol**: Server → client wire messages
//! - **providers**: Transcriber / Responder / Synthesizer traits and HTTP implementations
//! - **session**: Per-connection history, the pipeline orchestrator and the registry
//! - **websocket**: The per-connection actor behind `/ws/{agent}`
//! - **agents**: Named agent profiles
//! - **health**, **handlers**, **app**: The HTTP surface
//! - **audio**: Format detection, recording buffers, PCM/WAV helpers
//! - **client**: Connection manager, recording controller and client state machine

pub mod agents;
pub mod app;
pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod protocol;
pub mod providers;
pub mod session;
pub mod state;
pub mod websocket;
