//! OpenAI-compatible HTTP providers.
//!
//! Talks to any server exposing the OpenAI audio and chat endpoints (Groq by default):
//! - `POST /audio/transcriptions` (multipart upload) for the Transcriber
//! - `POST /chat/completions` for the Responder
//! - `POST /audio/speech` for the Synthesizer
//! - `GET /models` as the reachability check for all three

use super::{ProviderError, ProviderSet, Responder, Synthesizer, Transcriber};
use crate::agents::AgentProfile;
use crate::audio::AudioFormat;
use crate::config::ProvidersConfig;
use crate::session::history::Turn;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shared HTTP client, base URL and credential.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }

    /// Turn non-2xx responses into [`ProviderError::Status`] with the body attached.
    async fn ensure_success(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body: truncate(&body, 512),
        })
    }

    async fn check_reachable(&self) -> Result<(), ProviderError> {
        let response = self.authorize(self.http.get(self.url("models"))).send().await?;
        Self::ensure_success(response).await.map(|_| ())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

pub struct OpenAiTranscriber {
    client: OpenAiClient,
    model: String,
    language: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn name(&self) -> &str {
        &self.model
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<String, ProviderError> {
        let format = AudioFormat::detect(audio);
        // Browsers record webm/opus; assume that when the header is unrecognised.
        let format = if format == AudioFormat::Unknown {
            AudioFormat::Webm
        } else {
            format
        };

        let part = Part::bytes(audio.to_vec())
            .file_name(format!("audio.{}", format.extension()))
            .mime_str(format.mime_type())?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if !self.language.is_empty() {
            form = form.text("language", self.language.clone());
        }

        let request = self
            .client
            .authorize(self.client.http.post(self.client.url("audio/transcriptions")))
            .multipart(form);
        let response = OpenAiClient::ensure_success(request.send().await?).await?;
        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        debug!(model = %self.model, chars = body.text.len(), "Transcription received");
        Ok(body.text.trim().to_string())
    }

    async fn check(&self) -> Result<(), ProviderError> {
        self.client.check_reachable().await
    }
}

pub struct OpenAiResponder {
    client: OpenAiClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiResponder {
    /// System prompt, then prior turns oldest first, then the new user text.
    fn build_messages<'a>(
        agent: &'a AgentProfile,
        history: &'a [Turn],
        text: &'a str,
    ) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &agent.system_prompt,
        });
        messages.extend(history.iter().map(|turn| ChatMessage {
            role: turn.role.as_str(),
            content: &turn.text,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: text,
        });
        messages
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn respond(
        &self,
        agent: &AgentProfile,
        history: &[Turn],
        text: &str,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::build_messages(agent, history, text),
            temperature: agent.temperature.unwrap_or(self.temperature),
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .authorize(self.client.http.post(self.client.url("chat/completions")))
            .json(&request)
            .send()
            .await?;
        let body: ChatResponse = OpenAiClient::ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ProviderError::Payload("completion contained no text".to_string()))
    }

    async fn check(&self) -> Result<(), ProviderError> {
        self.client.check_reachable().await
    }
}

pub struct OpenAiSynthesizer {
    client: OpenAiClient,
    model: String,
    voice: String,
    format: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, ProviderError> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: voice.unwrap_or(&self.voice),
            response_format: &self.format,
        };

        let response = self
            .client
            .authorize(self.client.http.post(self.client.url("audio/speech")))
            .json(&request)
            .send()
            .await?;
        let bytes = OpenAiClient::ensure_success(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Payload("speech response was empty".to_string()));
        }
        Ok(bytes.to_vec())
    }

    async fn check(&self) -> Result<(), ProviderError> {
        self.client.check_reachable().await
    }
}

/// Build the full provider set from configuration.
pub fn build_provider_set(config: &ProvidersConfig, timeout: Duration) -> Result<ProviderSet, ProviderError> {
    let client = OpenAiClient::new(&config.base_url, &config.api_key, timeout)?;

    let transcriber = OpenAiTranscriber {
        client: client.clone(),
        model: config.transcription_model.clone(),
        language: config.language.clone(),
    };
    let responder = OpenAiResponder {
        client: client.clone(),
        model: config.response_model.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };
    let synthesizer = OpenAiSynthesizer {
        client,
        model: config.speech_model.clone(),
        voice: config.speech_voice.clone(),
        format: config.speech_format.clone(),
    };

    Ok(ProviderSet::new(
        Arc::new(transcriber),
        Arc::new(responder),
        Arc::new(synthesizer),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentProfile {
        AgentProfile {
            name: "default".to_string(),
            system_prompt: "Be brief.".to_string(),
            temperature: None,
            voice: None,
            empty_input_reply: "?".to_string(),
        }
    }

    #[test]
    fn test_messages_put_history_between_system_and_user() {
        let agent = agent();
        let history = vec![Turn::user("hi"), Turn::assistant("hello!")];
        let messages = OpenAiResponder::build_messages(&agent, &history, "how are you?");

        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(messages[3].content, "how are you?");
    }

    #[test]
    fn test_url_joins_cleanly() {
        let client =
            OpenAiClient::new("https://api.groq.com/openai/v1/", "", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("/chat/completions"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_truncate_long_bodies() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[tokio::test]
    async fn test_unreachable_provider_fails_check() {
        let client =
            OpenAiClient::new("http://127.0.0.1:9", "", Duration::from_millis(500)).unwrap();
        assert!(client.check_reachable().await.is_err());
    }
}
