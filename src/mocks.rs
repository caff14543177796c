//! Test doubles for the collaborator contracts: transport, chat model, and
//! repository. Each records its calls so tests can assert on side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tern_core::error::{LedgerError, StoreError, TernError};
use tern_core::message::{ChatTurn, Conversation, Message, MessageHandle};
use tern_core::traits::{
    AddOutcome, ChatModel, ChatSession, ConversationRepository, Transport,
};

// --- Transport ---

/// Records posts and updates; can be told to fail either call.
#[derive(Default)]
pub struct MockTransport {
    /// (channel, text, thread_ts, handle ts)
    posts: Mutex<Vec<(String, String, Option<String>, String)>>,
    /// (channel, handle ts, text)
    updates: Mutex<Vec<(String, String, String)>>,
    counter: AtomicUsize,
    fail_post: bool,
    fail_update: bool,
}

impl MockTransport {
    pub fn failing_post() -> Self {
        Self {
            fail_post: true,
            ..Self::default()
        }
    }

    pub fn posts(&self) -> Vec<(String, String, Option<String>, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, String, String)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<MessageHandle, TernError> {
        if self.fail_post {
            return Err(TernError::Transport("mock post failure".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let ts = format!("1712345678.{n:06}");
        self.posts.lock().unwrap().push((
            channel.to_string(),
            text.to_string(),
            thread_ts.map(str::to_string),
            ts.clone(),
        ));
        Ok(MessageHandle(ts))
    }

    async fn update(
        &self,
        channel: &str,
        handle: &MessageHandle,
        text: &str,
    ) -> Result<(), TernError> {
        if self.fail_update {
            return Err(TernError::Transport("mock update failure".into()));
        }
        self.updates.lock().unwrap().push((
            channel.to_string(),
            handle.0.clone(),
            text.to_string(),
        ));
        Ok(())
    }
}

// --- Chat model ---

/// Returns a canned reply, or fails every `send`. Records the history each
/// session was started with.
pub struct MockChatModel {
    reply: String,
    fail: Option<String>,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl MockChatModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail: None,
            histories: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: String::new(),
            fail: Some(message.to_string()),
            histories: Mutex::new(Vec::new()),
        }
    }

    /// How many sessions were started.
    pub fn started(&self) -> usize {
        self.histories.lock().unwrap().len()
    }

    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_chat(&self, history: &[Message]) -> Result<Box<dyn ChatSession>, TernError> {
        self.histories.lock().unwrap().push(history.to_vec());
        Ok(Box::new(MockSession {
            reply: self.reply.clone(),
            fail: self.fail.clone(),
            turns: history
                .iter()
                .map(|m| ChatTurn {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
        }))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

struct MockSession {
    reply: String,
    fail: Option<String>,
    turns: Vec<ChatTurn>,
}

#[async_trait]
impl ChatSession for MockSession {
    async fn send(&mut self, text: &str) -> Result<String, TernError> {
        if let Some(ref message) = self.fail {
            return Err(TernError::Llm(message.clone()));
        }
        self.turns.push(ChatTurn {
            role: tern_core::message::Role::User,
            content: text.to_string(),
        });
        self.turns.push(ChatTurn {
            role: tern_core::message::Role::Assistant,
            content: self.reply.clone(),
        });
        Ok(self.reply.clone())
    }

    fn history(&self) -> &[ChatTurn] {
        &self.turns
    }
}

// --- Repository ---

/// In-memory repository stub with directly settable conversation records,
/// used where tests need full control over `active` flags and history.
#[derive(Default)]
pub struct StubRepo {
    conversations: Mutex<Vec<Conversation>>,
    fail_find_many: bool,
    fail_add_message: bool,
}

impl StubRepo {
    pub fn with(conversations: Vec<Conversation>) -> Self {
        Self {
            conversations: Mutex::new(conversations),
            ..Self::default()
        }
    }

    pub fn failing_find_many() -> Self {
        Self {
            fail_find_many: true,
            ..Self::default()
        }
    }

    pub fn failing_add_message(conversations: Vec<Conversation>) -> Self {
        Self {
            conversations: Mutex::new(conversations),
            fail_add_message: true,
            ..Self::default()
        }
    }

    pub fn messages_of(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.conversation_id == conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationRepository for StubRepo {
    async fn initialize(
        &self,
        conversation_id: &str,
        initial_messages: Option<Vec<Message>>,
    ) -> Result<bool, LedgerError> {
        let mut conversations = self.conversations.lock().unwrap();
        if !conversations
            .iter()
            .any(|c| c.conversation_id == conversation_id)
        {
            conversations.push(Conversation::new(
                conversation_id,
                initial_messages.unwrap_or_default(),
            ));
        }
        Ok(true)
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<AddOutcome, LedgerError> {
        if self.fail_add_message {
            return Err(LedgerError::Store(StoreError::Backend(
                "mock append failure".into(),
            )));
        }
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
            .ok_or_else(|| LedgerError::NotFound(conversation_id.to_string()))?;

        if let Some(id) = message.message_id.as_deref() {
            if !id.is_empty()
                && conversation
                    .messages
                    .iter()
                    .any(|m| m.message_id.as_deref() == Some(id))
            {
                return Ok(AddOutcome::Duplicate);
            }
        }
        conversation.messages.push(message);
        Ok(AddOutcome::Appended(conversation.messages.clone()))
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, LedgerError> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.conversation_id == conversation_id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| LedgerError::NotFound(conversation_id.to_string()))
    }

    async fn find_many(&self) -> Result<Vec<Conversation>, LedgerError> {
        if self.fail_find_many {
            return Err(LedgerError::Store(StoreError::Backend(
                "mock listing failure".into(),
            )));
        }
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn update_last_github_check(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
            .ok_or_else(|| LedgerError::NotFound(conversation_id.to_string()))?;
        conversation.last_github_check = Some(at);
        Ok(())
    }
}

/// An active conversation with the given history, for batch tests.
pub fn active_conversation(conversation_id: &str, messages: Vec<Message>) -> Conversation {
    let mut conversation = Conversation::new(conversation_id, messages);
    conversation.active = true;
    conversation
}
