//! Message handling pipeline — one inbound Slack event in, one reply out.
//!
//! Flow: dedup-checked append → visible placeholder → LLM round trip →
//! placeholder updated in place with the reply.

use std::sync::Arc;
use tern_core::config::ChatConfig;
use tern_core::error::TernError;
use tern_core::message::{conversation_id_for, Message, MessageEvent, MessageHandle};
use tern_core::traits::{AddOutcome, ChatModel, ConversationRepository, Transport};
use tracing::{debug, info, warn};

/// A handling failure carrying enough context to visibly report it: the
/// placeholder (if one is already showing) and the thread it lives in.
#[derive(Debug)]
pub struct HandleMessageError {
    pub source: TernError,
    pub placeholder: Option<MessageHandle>,
    pub thread_ts: Option<String>,
}

impl std::fmt::Display for HandleMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "message handling failed: {}", self.source)
    }
}

impl std::error::Error for HandleMessageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Terminal state of one handled event.
#[derive(Debug)]
pub enum Handled {
    /// Upstream redelivery of an already-recorded message; no side effects.
    Duplicate,
    /// Full round trip: reply generated, recorded, and delivered.
    Responded { reply: String },
}

/// Handles interactions between Slack events and the chat model, recording
/// both sides of the exchange in the conversation ledger.
pub struct ChatService {
    repo: Arc<dyn ConversationRepository>,
    chat_model: Arc<dyn ChatModel>,
    transport: Arc<dyn Transport>,
    placeholder_text: String,
    initial_context: Vec<Message>,
}

impl ChatService {
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        chat_model: Arc<dyn ChatModel>,
        transport: Arc<dyn Transport>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            repo,
            chat_model,
            transport,
            placeholder_text: config.placeholder_text.clone(),
            initial_context: load_initial_context(config),
        }
    }

    /// Process one inbound message event to a terminal state.
    pub async fn handle_event(&self, event: &MessageEvent) -> Result<Handled, HandleMessageError> {
        let conversation_id = conversation_id_for(&event.channel);
        let thread_ts = event.thread_ts.clone();

        // Store-level initialize is idempotent, so calling it on every
        // event is safe across restarts and concurrent first contacts.
        self.repo
            .initialize(&conversation_id, Some(self.initial_context.clone()))
            .await
            .map_err(|e| HandleMessageError {
                source: e.into(),
                placeholder: None,
                thread_ts: thread_ts.clone(),
            })?;

        let user_message = Message::user(
            &event.text,
            Some(event.user.clone().unwrap_or_else(|| "unknown".to_string())),
            event.client_msg_id.clone(),
        );

        let messages = match self
            .repo
            .add_message(&conversation_id, user_message)
            .await
            .map_err(|e| HandleMessageError {
                source: e.into(),
                placeholder: None,
                thread_ts: thread_ts.clone(),
            })? {
            AddOutcome::Appended(messages) => messages,
            AddOutcome::Duplicate => {
                // Expected under at-least-once event delivery.
                debug!(
                    "duplicate event for {conversation_id} ({:?}), nothing to do",
                    event.client_msg_id
                );
                return Ok(Handled::Duplicate);
            }
        };

        let placeholder = self
            .transport
            .post(&event.channel, &self.placeholder_text, thread_ts.as_deref())
            .await
            .map_err(|e| HandleMessageError {
                source: e,
                placeholder: None,
                thread_ts: thread_ts.clone(),
            })?;

        match self.respond(&conversation_id, event, &messages, &placeholder).await {
            Ok(reply) => Ok(Handled::Responded { reply }),
            Err(source) => Err(HandleMessageError {
                source,
                placeholder: Some(placeholder),
                thread_ts,
            }),
        }
    }

    /// LLM round trip and delivery. The placeholder is already visible, so
    /// any failure here is reported with its handle attached.
    async fn respond(
        &self,
        conversation_id: &str,
        event: &MessageEvent,
        messages: &[Message],
        placeholder: &MessageHandle,
    ) -> Result<String, TernError> {
        let mut session = self.chat_model.start_chat(messages).await?;
        let reply = session.send(&event.text).await?;
        info!("llm reply for {conversation_id}: {} chars", reply.len());

        // Locally generated, so no correlation id; the dedup-safe append
        // path is still used.
        self.repo
            .add_message(conversation_id, Message::assistant(&reply))
            .await?;

        self.transport
            .update(&event.channel, placeholder, &reply)
            .await?;

        Ok(reply)
    }
}

/// Load the optional seed messages for new conversations.
fn load_initial_context(config: &ChatConfig) -> Vec<Message> {
    let Some(path) = config.initial_context_path.as_deref() else {
        return Vec::new();
    };

    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => {
                info!("loaded {} initial context messages from {path}", messages.len());
                messages
            }
            Err(e) => {
                warn!("ignoring malformed initial context at {path}: {e}");
                Vec::new()
            }
        },
        Err(e) => {
            warn!("initial context file {path} not readable: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockChatModel, MockTransport};
    use std::sync::Arc;
    use tern_core::message::Role;
    use tern_ledger::{LedgerRepository, SqliteStore};

    async fn test_repo() -> Arc<LedgerRepository> {
        let store = SqliteStore::in_memory().await.unwrap();
        Arc::new(LedgerRepository::new(Arc::new(store)))
    }

    fn event(text: &str, msg_id: &str) -> MessageEvent {
        MessageEvent {
            channel: "C12345".into(),
            text: text.into(),
            user: Some("U1".into()),
            client_msg_id: Some(msg_id.into()),
            thread_ts: None,
        }
    }

    fn service(
        repo: Arc<LedgerRepository>,
        chat_model: Arc<MockChatModel>,
        transport: Arc<MockTransport>,
    ) -> ChatService {
        ChatService::new(repo, chat_model, transport, &ChatConfig::default())
    }

    #[tokio::test]
    async fn test_happy_path_responds_and_records_both_sides() {
        let repo = test_repo().await;
        let chat_model = Arc::new(MockChatModel::replying("here is my reply"));
        let transport = Arc::new(MockTransport::default());
        let svc = service(repo.clone(), chat_model.clone(), transport.clone());

        let handled = svc.handle_event(&event("hello", "m1")).await.unwrap();
        match handled {
            Handled::Responded { reply } => assert_eq!(reply, "here is my reply"),
            Handled::Duplicate => panic!("not a duplicate"),
        }

        // Ledger holds the user message and the assistant reply, in order.
        let messages = repo.get_messages("slack-C12345").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "here is my reply");

        // Placeholder posted, then updated in place with the reply.
        let posts = transport.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "C12345");
        let updates = transport.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].2, "here is my reply");
        assert_eq!(updates[0].1, posts[0].3, "update targets the placeholder");
    }

    #[tokio::test]
    async fn test_duplicate_event_has_no_side_effects() {
        let repo = test_repo().await;
        let chat_model = Arc::new(MockChatModel::replying("reply"));
        let transport = Arc::new(MockTransport::default());
        let svc = service(repo.clone(), chat_model.clone(), transport.clone());

        svc.handle_event(&event("hello", "m1")).await.unwrap();
        let handled = svc.handle_event(&event("hello", "m1")).await.unwrap();
        assert!(matches!(handled, Handled::Duplicate));

        // One exchange only: no second placeholder, no second LLM call.
        assert_eq!(repo.get_messages("slack-C12345").await.unwrap().len(), 2);
        assert_eq!(transport.posts().len(), 1);
        assert_eq!(chat_model.started(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_carries_placeholder_context() {
        let repo = test_repo().await;
        let chat_model = Arc::new(MockChatModel::failing("model melted"));
        let transport = Arc::new(MockTransport::default());
        let svc = service(repo, chat_model, transport.clone());

        let mut ev = event("hello", "m1");
        ev.thread_ts = Some("1712345678.000001".into());

        let err = svc.handle_event(&ev).await.unwrap_err();
        assert!(err.source.to_string().contains("model melted"));
        assert!(err.placeholder.is_some(), "placeholder was already visible");
        assert_eq!(err.thread_ts.as_deref(), Some("1712345678.000001"));

        // The placeholder was posted but never updated.
        assert_eq!(transport.posts().len(), 1);
        assert!(transport.updates().is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_post_failure_has_no_handle() {
        let repo = test_repo().await;
        let chat_model = Arc::new(MockChatModel::replying("reply"));
        let transport = Arc::new(MockTransport::failing_post());
        let svc = service(repo.clone(), chat_model.clone(), transport);

        let err = svc.handle_event(&event("hello", "m1")).await.unwrap_err();
        assert!(err.placeholder.is_none());
        // The user message was still recorded before the failure.
        assert_eq!(repo.get_messages("slack-C12345").await.unwrap().len(), 1);
        assert_eq!(chat_model.started(), 0, "LLM never contacted");
    }

    #[tokio::test]
    async fn test_replies_stay_in_thread() {
        let repo = test_repo().await;
        let chat_model = Arc::new(MockChatModel::replying("reply"));
        let transport = Arc::new(MockTransport::default());
        let svc = service(repo, chat_model, transport.clone());

        let mut ev = event("hello", "m1");
        ev.thread_ts = Some("1712345678.000001".into());
        svc.handle_event(&ev).await.unwrap();

        let posts = transport.posts();
        assert_eq!(posts[0].2.as_deref(), Some("1712345678.000001"));
    }

    #[tokio::test]
    async fn test_session_seeded_with_full_history() {
        let repo = test_repo().await;
        let chat_model = Arc::new(MockChatModel::replying("ok"));
        let transport = Arc::new(MockTransport::default());
        let svc = service(repo, chat_model.clone(), transport);

        svc.handle_event(&event("first", "m1")).await.unwrap();
        svc.handle_event(&event("second", "m2")).await.unwrap();

        // Second session saw first user message, first reply, and the
        // just-appended second user message.
        let histories = chat_model.histories();
        assert_eq!(histories[1].len(), 3);
        assert_eq!(histories[1][2].content, "second");
    }
}
