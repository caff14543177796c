//! Google Gemini chat provider.
//!
//! Calls the Gemini `generateContent` endpoint. Auth via URL query param.
//! Sessions are stateful: every `send` replays the accumulated turns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tern_core::config::LlmConfig;
use tern_core::error::TernError;
use tern_core::message::{ChatTurn, Message, Role};
use tern_core::traits::{ChatModel, ChatSession};
use tracing::{debug, warn};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini chat model.
pub struct GeminiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiChat {
    /// Create from config values.
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

/// Reduce ledger history to the turns the chat API accepts.
///
/// System-role and empty-content entries are dropped — the API has no
/// system role and rejects empty parts.
fn convert_history(messages: &[Message]) -> Vec<ChatTurn> {
    messages
        .iter()
        .filter(|m| m.role != Role::System && !m.content.is_empty())
        .map(|m| ChatTurn {
            role: m.role,
            content: m.content.clone(),
        })
        .collect()
}

fn to_contents(turns: &[ChatTurn]) -> Vec<GeminiContent> {
    turns
        .iter()
        .map(|turn| {
            let role = if turn.role == Role::Assistant {
                "model"
            } else {
                "user"
            };
            GeminiContent {
                role: role.to_string(),
                parts: vec![GeminiPart {
                    text: turn.content.clone(),
                }],
            }
        })
        .collect()
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn start_chat(&self, history: &[Message]) -> Result<Box<dyn ChatSession>, TernError> {
        Ok(Box::new(GeminiSession {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            turns: convert_history(history),
        }))
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            warn!("gemini: no API key configured");
            return false;
        }
        let url = format!("{GEMINI_BASE_URL}/models?key={}", self.api_key);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("gemini not available: {e}");
                false
            }
        }
    }
}

/// One chat session: accumulated turns plus the connection details.
pub struct GeminiSession {
    client: reqwest::Client,
    api_key: String,
    model: String,
    turns: Vec<ChatTurn>,
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send(&mut self, text: &str) -> Result<String, TernError> {
        self.turns.push(ChatTurn {
            role: Role::User,
            content: text.to_string(),
        });

        let body = GeminiRequest {
            contents: to_contents(&self.turns),
        };

        let url = format!(
            "{GEMINI_BASE_URL}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        debug!("gemini: POST models/{}:generateContent", self.model);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TernError::Llm(format!("gemini request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(TernError::Llm(format!("gemini returned {status}: {text}")));
        }

        let parsed: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| TernError::Llm(format!("gemini: failed to parse response: {e}")))?;

        let reply = parsed
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| TernError::Llm("gemini returned no candidates".to_string()))?;

        self.turns.push(ChatTurn {
            role: Role::Assistant,
            content: reply.clone(),
        });

        Ok(reply)
    }

    fn history(&self) -> &[ChatTurn] {
        &self.turns
    }
}
