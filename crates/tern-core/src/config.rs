use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::TernError;

/// Top-level Tern configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// HTTP server settings, including the batch trigger secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for the scheduled `/daily` trigger. Empty means the
    /// trigger is disabled — every call is rejected.
    #[serde(default)]
    pub cron_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cron_token: String::new(),
        }
    }
}

/// Slack Web API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: String,
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: String::new(),
        }
    }
}

/// Ledger store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            db_path: default_db_path(),
        }
    }
}

/// Message handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Text shown while a reply is pending, later replaced in place.
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
    /// Optional JSON file of seed messages for new conversations.
    #[serde(default)]
    pub initial_context_path: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            placeholder_text: default_placeholder_text(),
            initial_context_path: None,
        }
    }
}

// --- Default value functions ---

fn default_port() -> u16 {
    3000
}
fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_store_backend() -> String {
    "sqlite".to_string()
}
fn default_db_path() -> String {
    "~/.tern/ledger.db".to_string()
}
fn default_placeholder_text() -> String {
    ":hourglass_flowing_sand: _Thinking..._".to_string()
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, TernError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!("Config file not found at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| TernError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| TernError::Config(format!("failed to parse config: {}", e)))?;

    Ok(config)
}
