use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix joining a Slack channel id to its conversation id.
pub const CONVERSATION_PREFIX: &str = "slack-";

/// Derive the stable conversation id for a channel.
pub fn conversation_id_for(channel: &str) -> String {
    format!("{CONVERSATION_PREFIX}{channel}")
}

/// Recover the channel a conversation id was derived from.
pub fn channel_of(conversation_id: &str) -> &str {
    conversation_id
        .strip_prefix(CONVERSATION_PREFIX)
        .unwrap_or(conversation_id)
}

/// Who authored a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry in a conversation ledger. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Upstream correlation key (e.g. Slack `client_msg_id`), used to
    /// suppress re-application of an already-seen message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// A user message carrying its upstream correlation id.
    pub fn user(content: &str, user_id: Option<String>, message_id: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            message_id,
            user_id,
            timestamp: Some(Utc::now()),
        }
    }

    /// A locally generated assistant message. No correlation id needed.
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            message_id: None,
            user_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// A system message recording an automated event.
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
            message_id: None,
            user_id: None,
            timestamp: Some(Utc::now()),
        }
    }
}

/// The unit of ledger state: one conversation and its ordered message log.
///
/// `messages` order is append order — callers never reorder it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Only active conversations receive daily check-ins.
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_github_check: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token; bumped by every ledger write.
    /// Maintained by the repository, never interpreted by callers.
    #[serde(default)]
    pub revision: u64,
}

impl Conversation {
    /// A fresh conversation with the given seed messages and current timestamps.
    pub fn new(conversation_id: &str, messages: Vec<Message>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.to_string(),
            created_at: now,
            updated_at: now,
            active: false,
            messages,
            last_github_check: None,
            revision: 0,
        }
    }
}

/// An inbound Slack message event, reduced to the fields the pipeline needs.
///
/// Field names match the Slack Events API payload so the event body
/// deserializes directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub channel: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Upstream correlation id; absent for synthesized events.
    #[serde(default)]
    pub client_msg_id: Option<String>,
    /// Set when the message is part of a thread; replies stay in it.
    #[serde(default)]
    pub thread_ts: Option<String>,
}

/// Handle to a delivered transport message (the Slack `ts`), used to
/// update it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle(pub String);

/// A single turn of chat-model history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}
