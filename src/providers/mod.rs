//! # Capability Providers
//!
//! The three leaf computations behind every audio unit:
//! - **Transcriber**: audio bytes → text
//! - **Responder**: text + prior history → reply text
//! - **Synthesizer**: reply text → audio bytes
//!
//! Each is a trait object so the orchestrator never knows whether it is talking to a
//! hosted API, a local model, or a test double. [`ProviderSet`] bundles one of each and
//! answers the health query used by `/api/v1/health/providers`.
//!
//! ## Rust Concepts:
//! - **async-trait**: trait methods that return futures, usable behind `Arc<dyn Trait>`
//! - **Send + Sync bounds**: providers are shared by every session task at once

pub mod openai;

use crate::agents::AgentProfile;
use crate::error::PipelineStage;
use crate::session::history::Turn;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use openai::build_provider_set;

/// Why a provider call failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    Payload(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: &[u8]) -> Result<String, ProviderError>;

    /// Cheap reachability check.
    async fn check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[async_trait]
pub trait Responder: Send + Sync {
    fn name(&self) -> &str;

    /// `history` holds the turns *before* `text`, oldest first.
    async fn respond(
        &self,
        agent: &AgentProfile,
        history: &[Turn],
        text: &str,
    ) -> Result<String, ProviderError>;

    async fn check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, ProviderError>;

    async fn check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Reachability of one stage's provider.
#[derive(Debug, Clone, Serialize)]
pub struct StageHealth {
    pub stage: PipelineStage,
    pub provider: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageHealth {
    fn from_check(stage: PipelineStage, provider: &str, result: Result<(), ProviderError>) -> Self {
        Self {
            stage,
            provider: provider.to_string(),
            reachable: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

/// One provider per pipeline stage, shared by all sessions.
#[derive(Clone)]
pub struct ProviderSet {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl ProviderSet {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            transcriber,
            responder,
            synthesizer,
        }
    }

    /// Check all three providers concurrently, each bounded by `timeout`.
    pub async fn health(&self, timeout: Duration) -> Vec<StageHealth> {
        let (stt, llm, tts) = tokio::join!(
            with_timeout(timeout, self.transcriber.check()),
            with_timeout(timeout, self.responder.check()),
            with_timeout(timeout, self.synthesizer.check()),
        );

        vec![
            StageHealth::from_check(PipelineStage::Transcribe, self.transcriber.name(), stt),
            StageHealth::from_check(PipelineStage::Respond, self.responder.name(), llm),
            StageHealth::from_check(PipelineStage::Synthesize, self.synthesizer.name(), tts),
        ]
    }
}

/// Run a provider call, turning an elapsed deadline into [`ProviderError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("transcriber", &self.transcriber.name())
            .field("responder", &self.responder.name())
            .field("synthesizer", &self.synthesizer.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted providers shared by unit tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Returns queued results in order, then repeats `fallback`.
    pub struct ScriptedTranscriber {
        pub script: Mutex<VecDeque<Result<String, String>>>,
        pub fallback: String,
        pub delay: Duration,
    }

    impl ScriptedTranscriber {
        pub fn always(text: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: text.to_string(),
                delay: Duration::ZERO,
            }
        }

        pub fn with_script(script: Vec<Result<&str, &str>>, fallback: &str) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                fallback: fallback.to_string(),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        fn name(&self) -> &str {
            "scripted-stt"
        }

        async fn transcribe(&self, _audio: &[u8]) -> Result<String, ProviderError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().pop_front();
            match next {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(ProviderError::Other(message)),
                None => Ok(self.fallback.clone()),
            }
        }
    }

    /// Echoes `"reply to <text>"` and records the history it was given.
    #[derive(Default)]
    pub struct EchoResponder {
        pub fail: bool,
        pub seen_histories: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait]
    impl Responder for EchoResponder {
        fn name(&self) -> &str {
            "echo-llm"
        }

        async fn respond(
            &self,
            _agent: &AgentProfile,
            history: &[Turn],
            text: &str,
        ) -> Result<String, ProviderError> {
            self.seen_histories.lock().push(history.to_vec());
            if self.fail {
                return Err(ProviderError::Other("responder offline".to_string()));
            }
            Ok(format!("reply to {}", text))
        }

        async fn check(&self) -> Result<(), ProviderError> {
            if self.fail {
                Err(ProviderError::Other("responder offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Returns `len` bytes of audio, or fails when `fail` is set.
    pub struct FixedSynthesizer {
        pub len: usize,
        pub fail: bool,
    }

    #[async_trait]
    impl Synthesizer for FixedSynthesizer {
        fn name(&self) -> &str {
            "fixed-tts"
        }

        async fn synthesize(
            &self,
            _text: &str,
            _voice: Option<&str>,
        ) -> Result<Vec<u8>, ProviderError> {
            if self.fail {
                return Err(ProviderError::Other("synthesizer offline".to_string()));
            }
            Ok(vec![7u8; self.len])
        }
    }
}
