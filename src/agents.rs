//! # Agent Profiles
//!
//! Each WebSocket path `/ws/{agent}` selects a named persona. A profile is a small TOML
//! file at `<profiles_dir>/<agent>.toml`:
//!
//! ```toml
//! system_prompt = "You are a patient language tutor."
//! temperature = 0.5
//! voice = "Celeste-PlayAI"
//! empty_input_reply = "Sorry, I missed that."
//! ```
//!
//! Every field is optional. Missing fields, a missing file, or a file that fails to
//! parse all fall back to the defaults from configuration, so connecting to an unknown
//! agent still yields a usable session.

use crate::config::AgentsConfig;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Reply spoken when the Transcriber returns only whitespace.
pub const DEFAULT_EMPTY_INPUT_REPLY: &str = "I didn't hear anything. Could you please repeat?";

const MAX_AGENT_NAME_LEN: usize = 64;

/// Resolved persona and model parameters for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentProfile {
    pub name: String,
    pub system_prompt: String,
    /// Overrides the provider-wide temperature when set.
    pub temperature: Option<f32>,
    /// Overrides the provider-wide speech voice when set.
    pub voice: Option<String>,
    pub empty_input_reply: String,
}

/// On-disk shape of a profile; everything optional.
#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    system_prompt: Option<String>,
    temperature: Option<f32>,
    voice: Option<String>,
    empty_input_reply: Option<String>,
}

/// Loads agent profiles from the configured directory.
#[derive(Debug, Clone)]
pub struct AgentCatalog {
    profiles_dir: PathBuf,
    default_system_prompt: String,
}

impl AgentCatalog {
    pub fn new(config: &AgentsConfig) -> Self {
        Self {
            profiles_dir: config.profiles_dir.clone(),
            default_system_prompt: config.default_system_prompt.clone(),
        }
    }

    /// Agent names are used as file names, so only `[A-Za-z0-9_-]` is accepted.
    pub fn validate_name(name: &str) -> Result<(), AppError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_AGENT_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        if valid {
            Ok(())
        } else {
            Err(AppError::BadRequest(format!("Invalid agent name '{}'", name)))
        }
    }

    /// The profile used when no file exists for an agent.
    pub fn default_profile(&self, name: &str) -> AgentProfile {
        AgentProfile {
            name: name.to_string(),
            system_prompt: self.default_system_prompt.clone(),
            temperature: None,
            voice: None,
            empty_input_reply: DEFAULT_EMPTY_INPUT_REPLY.to_string(),
        }
    }

    /// Resolve the profile for `name`.
    ///
    /// Only an invalid name is an error; unreadable or malformed files are logged and
    /// replaced by the default profile.
    pub fn load(&self, name: &str) -> Result<AgentProfile, AppError> {
        Self::validate_name(name)?;

        let path = self.profiles_dir.join(format!("{}.toml", name));
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(agent = name, path = %path.display(), "No profile file, using defaults");
                return Ok(self.default_profile(name));
            }
            Err(err) => {
                warn!(agent = name, path = %path.display(), "Failed to read profile: {}", err);
                return Ok(self.default_profile(name));
            }
        };

        let file: ProfileFile = match toml::from_str(&contents) {
            Ok(file) => file,
            Err(err) => {
                warn!(agent = name, path = %path.display(), "Invalid profile, using defaults: {}", err);
                return Ok(self.default_profile(name));
            }
        };

        let defaults = self.default_profile(name);
        Ok(AgentProfile {
            name: name.to_string(),
            system_prompt: file.system_prompt.unwrap_or(defaults.system_prompt),
            temperature: file.temperature,
            voice: file.voice,
            empty_input_reply: file
                .empty_input_reply
                .unwrap_or(defaults.empty_input_reply),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(dir: &std::path::Path) -> AgentCatalog {
        AgentCatalog::new(&AgentsConfig {
            profiles_dir: dir.to_path_buf(),
            default_system_prompt: "You are a helpful AI assistant.".to_string(),
        })
    }

    #[test]
    fn test_missing_profile_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let profile = catalog(dir.path()).load("nobody").unwrap();
        assert_eq!(profile.name, "nobody");
        assert_eq!(profile.system_prompt, "You are a helpful AI assistant.");
        assert_eq!(profile.empty_input_reply, DEFAULT_EMPTY_INPUT_REPLY);
        assert!(profile.temperature.is_none());
    }

    #[test]
    fn test_profile_file_overrides_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tutor.toml"),
            "system_prompt = \"You teach Spanish.\"\ntemperature = 0.3\n",
        )
        .unwrap();

        let profile = catalog(dir.path()).load("tutor").unwrap();
        assert_eq!(profile.system_prompt, "You teach Spanish.");
        assert_eq!(profile.temperature, Some(0.3));
        assert!(profile.voice.is_none());
        assert_eq!(profile.empty_input_reply, DEFAULT_EMPTY_INPUT_REPLY);
    }

    #[test]
    fn test_malformed_profile_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.toml"), "system_prompt = [").unwrap();

        let profile = catalog(dir.path()).load("broken").unwrap();
        assert_eq!(profile.system_prompt, "You are a helpful AI assistant.");
    }

    #[test]
    fn test_rejects_path_like_names() {
        assert!(AgentCatalog::validate_name("../etc/passwd").is_err());
        assert!(AgentCatalog::validate_name("").is_err());
        assert!(AgentCatalog::validate_name(&"a".repeat(65)).is_err());
        assert!(AgentCatalog::validate_name("study-buddy_2").is_ok());
    }
}
