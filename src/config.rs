//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, GROQ_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_SESSION__HISTORY_CAPACITY, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// Both the server (`serve`) and the headless client (`talk`) read from the same
/// structure, so one `config.toml` can describe a whole deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub providers: ProvidersConfig,
    pub agents: AgentsConfig,
    pub client: ClientConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Per-connection session limits and timers.
///
/// ## Fields:
/// - `history_capacity`: How many (role, text) turns each session remembers
/// - `idle_timeout_secs`: Close the session after this long without an audio unit
/// - `heartbeat_interval_secs` / `client_timeout_secs`: WebSocket ping cadence and
///   how long a silent peer is tolerated
/// - `max_concurrent_sessions`: Upgrade requests beyond this are refused with 503
/// - `max_unit_bytes`: Largest accepted audio unit
/// - `stage_timeout_secs`: Upper bound for a single provider call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub history_capacity: usize,
    pub idle_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub max_concurrent_sessions: usize,
    pub max_unit_bytes: usize,
    pub stage_timeout_secs: u64,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Settings for the OpenAI-compatible speech and language providers.
///
/// The defaults point at Groq's endpoint; any server exposing
/// `/audio/transcriptions`, `/chat/completions` and `/audio/speech` works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub base_url: String,
    /// Empty means "no Authorization header".
    pub api_key: String,
    pub transcription_model: String,
    pub language: String,
    pub response_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub speech_model: String,
    pub speech_voice: String,
    pub speech_format: String,
}

/// Where agent profiles live and what an unknown agent falls back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    pub profiles_dir: PathBuf,
    pub default_system_prompt: String,
}

/// Settings for the headless `talk` client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base WebSocket URL; the agent name is appended as the last path segment.
    pub endpoint: String,
    pub agent: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    /// How long `speaking` / `withholding` last before returning to `idle`.
    pub return_to_idle_ms: u64,
    pub max_recording_bytes: usize,
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn return_to_idle(&self) -> Duration {
        Duration::from_millis(self.return_to_idle_ms)
    }

    /// Full session URL for an agent, e.g. `ws://127.0.0.1:8000/ws/default`.
    pub fn session_url(&self, agent: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), agent)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            session: SessionConfig {
                history_capacity: 20,
                idle_timeout_secs: 3600,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
                max_concurrent_sessions: 50,
                max_unit_bytes: 10 * 1024 * 1024,
                stage_timeout_secs: 120,
            },
            providers: ProvidersConfig {
                base_url: "https://api.groq.com/openai/v1".to_string(),
                api_key: String::new(),
                transcription_model: "whisper-large-v3-turbo".to_string(),
                language: "en".to_string(),
                response_model: "llama-3.1-8b-instant".to_string(),
                temperature: 0.7,
                max_tokens: 512,
                speech_model: "playai-tts".to_string(),
                speech_voice: "Fritz-PlayAI".to_string(),
                speech_format: "wav".to_string(),
            },
            agents: AgentsConfig {
                profiles_dir: PathBuf::from("agents"),
                default_system_prompt: "You are a helpful AI assistant.".to_string(),
            },
            client: ClientConfig {
                endpoint: "ws://127.0.0.1:8000/ws".to_string(),
                agent: "default".to_string(),
                max_reconnect_attempts: 5,
                reconnect_delay_ms: 3000,
                return_to_idle_ms: 3000,
                max_recording_bytes: 10 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_SESSION__HISTORY_CAPACITY=40`: Override history size
    /// - `APP_PROVIDERS__RESPONSE_MODEL=llama-3.3-70b-versatile`: Override the LLM
    /// - `HOST`, `PORT`: Special cases for deployment platforms
    /// - `GROQ_API_KEY`: Provider credential without the APP_ prefix
    ///
    /// Nested keys use a double underscore because field names contain single ones.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GROQ_API_KEY") {
            settings = settings.set_override("providers.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        let session = &self.session;
        if session.history_capacity == 0 {
            return Err(anyhow::anyhow!("History capacity must be greater than 0"));
        }
        if session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }
        if session.max_unit_bytes == 0 {
            return Err(anyhow::anyhow!("Max audio unit size must be greater than 0"));
        }
        if session.stage_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Stage timeout must be greater than 0"));
        }
        if session.heartbeat_interval_secs == 0
            || session.heartbeat_interval_secs >= session.client_timeout_secs
        {
            return Err(anyhow::anyhow!(
                "Heartbeat interval must be positive and shorter than the client timeout"
            ));
        }

        if !(0.0..=2.0).contains(&self.providers.temperature) {
            return Err(anyhow::anyhow!("Temperature must be between 0.0 and 2.0"));
        }
        if !self.providers.base_url.starts_with("http://")
            && !self.providers.base_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!("Provider base_url must be an http(s) URL"));
        }

        if !self.client.endpoint.starts_with("ws://") && !self.client.endpoint.starts_with("wss://")
        {
            return Err(anyhow::anyhow!("Client endpoint must be a ws(s) URL"));
        }
        if self.client.max_recording_bytes == 0 {
            return Err(anyhow::anyhow!("Max recording size must be greater than 0"));
        }

        Ok(())
    }

    /// Copy of the configuration that is safe to show over HTTP.
    pub fn redacted(&self) -> AppConfig {
        let mut copy = self.clone();
        if !copy.providers.api_key.is_empty() {
            copy.providers.api_key = "***".to_string();
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.session.history_capacity, 20);
        assert_eq!(config.client.max_reconnect_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.heartbeat_interval_secs = config.session.client_timeout_secs;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.endpoint = "http://localhost:8000/ws".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_url_appends_agent() {
        let mut client = AppConfig::default().client;
        assert_eq!(client.session_url("tutor"), "ws://127.0.0.1:8000/ws/tutor");

        client.endpoint = "wss://voice.example.com/ws/".to_string();
        assert_eq!(client.session_url("default"), "wss://voice.example.com/ws/default");
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = AppConfig::default();
        config.providers.api_key = "gsk_secret".to_string();
        assert_eq!(config.redacted().providers.api_key, "***");
        assert_eq!(config.providers.api_key, "gsk_secret");
    }

    #[test]
    fn test_defaults_round_trip_through_config_crate() {
        let loaded: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(loaded.session.max_unit_bytes, 10 * 1024 * 1024);
        assert_eq!(loaded.agents.profiles_dir, PathBuf::from("agents"));
    }
}
