use crate::error::{LedgerError, TernError};
use crate::message::{ChatTurn, Conversation, Message, MessageHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of appending a message to a conversation ledger.
///
/// Duplicate delivery is expected under at-least-once semantics, so it is
/// a variant callers must handle, not an error.
#[derive(Debug, Clone)]
pub enum AddOutcome {
    /// The message was appended; carries the full post-append ordered log.
    Appended(Vec<Message>),
    /// A message with the same non-empty `message_id` was already recorded.
    /// Nothing was written.
    Duplicate,
}

/// Conversation ledger contract — the invariants live behind this trait.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Idempotent create-if-absent. Returns `Ok(true)` whether the record
    /// was just created or already existed. The existence check and the
    /// creation are a single atomic store operation.
    async fn initialize(
        &self,
        conversation_id: &str,
        initial_messages: Option<Vec<Message>>,
    ) -> Result<bool, LedgerError>;

    /// Append one message. Fails with `NotFound` for unknown conversations;
    /// returns `Duplicate` (no write) when the message carries a non-empty
    /// `message_id` already present in the log. The read, dedup check, and
    /// write are one atomic unit per conversation.
    async fn add_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<AddOutcome, LedgerError>;

    /// The current ordered message log. Fails with `NotFound` if absent.
    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, LedgerError>;

    /// Every conversation record. Callers must not rely on result size.
    async fn find_many(&self) -> Result<Vec<Conversation>, LedgerError>;

    /// Record the time of the last GitHub check. Fails with `NotFound` if
    /// absent.
    async fn update_last_github_check(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;
}

/// Outbound messaging transport — post a message, update it in place.
///
/// No retry or backoff is assumed; callers handle failures.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post `text` to `channel`, optionally inside an existing thread.
    /// Returns a handle for later in-place updates.
    async fn post(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<MessageHandle, TernError>;

    /// Replace the text of a previously posted message.
    async fn update(
        &self,
        channel: &str,
        handle: &MessageHandle,
        text: &str,
    ) -> Result<(), TernError>;
}

/// A live chat session holding accumulated history.
#[async_trait]
pub trait ChatSession: Send {
    /// Send one prompt and return the model's reply. Both are appended to
    /// the session history.
    async fn send(&mut self, text: &str) -> Result<String, TernError>;

    /// The session history, oldest first.
    fn history(&self) -> &[ChatTurn];
}

/// Chat model — the brain. Starts sessions seeded from ledger history.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Human-readable model/provider name.
    fn name(&self) -> &str;

    /// Start a session seeded with conversation history. Implementations
    /// drop system-role and empty-content entries, which chat APIs reject.
    async fn start_chat(&self, history: &[Message]) -> Result<Box<dyn ChatSession>, TernError>;

    /// Check that the model backend is reachable and ready.
    async fn is_available(&self) -> bool;
}
