//! Conversation repository — enforces the ledger invariants over the
//! document store: one conversation per id, append-only ordered messages,
//! at-most-once append per correlation id.

use crate::store::{DocumentStore, Filter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tern_core::error::{LedgerError, StoreError};
use tern_core::message::{Conversation, Message};
use tern_core::traits::{AddOutcome, ConversationRepository};
use tracing::{debug, info};

const COLLECTION: &str = "conversations";

/// How many times an append re-reads and retries after losing the
/// optimistic-concurrency race before giving up.
const MAX_APPEND_RETRIES: usize = 5;

/// Document-store-backed implementation of [`ConversationRepository`].
///
/// Writes use a revision token: every append filters on the revision it
/// read and bumps it, so two concurrent appends can never overwrite each
/// other — the loser re-reads and retries. The conversation id doubles as
/// the document id, making `initialize` a primary-key conditional insert.
pub struct LedgerRepository {
    store: Arc<dyn DocumentStore>,
}

impl LedgerRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn key_filter(conversation_id: &str) -> Filter {
        BTreeMap::from([("conversation_id".to_string(), json!(conversation_id))])
    }

    async fn load(&self, conversation_id: &str) -> Result<Conversation, LedgerError> {
        let doc = self
            .store
            .find_one(COLLECTION, &Self::key_filter(conversation_id))
            .await?
            .ok_or_else(|| LedgerError::NotFound(conversation_id.to_string()))?;

        serde_json::from_value(doc.body)
            .map_err(|e| LedgerError::Store(StoreError::Serialization(e)))
    }
}

#[async_trait]
impl ConversationRepository for LedgerRepository {
    async fn initialize(
        &self,
        conversation_id: &str,
        initial_messages: Option<Vec<Message>>,
    ) -> Result<bool, LedgerError> {
        let conversation =
            Conversation::new(conversation_id, initial_messages.unwrap_or_default());
        let body = serde_json::to_value(&conversation).map_err(StoreError::Serialization)?;

        match self
            .store
            .insert_one(COLLECTION, body, Some(conversation_id))
            .await
        {
            Ok(_) => {
                info!("started new conversation {conversation_id}");
                Ok(true)
            }
            // Already initialized — success either way.
            Err(StoreError::AlreadyExists) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<AddOutcome, LedgerError> {
        for _ in 0..MAX_APPEND_RETRIES {
            let current = self.load(conversation_id).await?;

            if let Some(id) = message.message_id.as_deref() {
                if !id.is_empty()
                    && current
                        .messages
                        .iter()
                        .any(|m| m.message_id.as_deref() == Some(id))
                {
                    debug!("message {id} already recorded in {conversation_id}");
                    return Ok(AddOutcome::Duplicate);
                }
            }

            let mut messages = current.messages;
            messages.push(message.clone());

            let filter = BTreeMap::from([
                ("conversation_id".to_string(), json!(conversation_id)),
                ("revision".to_string(), json!(current.revision)),
            ]);
            let fields = json!({
                "messages": messages,
                "updated_at": Utc::now(),
                "revision": current.revision + 1,
            });

            if self
                .store
                .update_one(COLLECTION, &filter, fields, false)
                .await?
            {
                return Ok(AddOutcome::Appended(messages));
            }
            // Lost the race: another writer bumped the revision while we
            // held the snapshot. Re-read and retry.
        }

        Err(LedgerError::Contention(conversation_id.to_string()))
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, LedgerError> {
        Ok(self.load(conversation_id).await?.messages)
    }

    async fn find_many(&self) -> Result<Vec<Conversation>, LedgerError> {
        let docs = self
            .store
            .find_many(COLLECTION, &BTreeMap::new(), None)
            .await?;

        docs.into_iter()
            .map(|doc| {
                serde_json::from_value(doc.body)
                    .map_err(|e| LedgerError::Store(StoreError::Serialization(e)))
            })
            .collect()
    }

    async fn update_last_github_check(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let fields = json!({
            "last_github_check": at,
            "updated_at": Utc::now(),
        });

        let updated = self
            .store
            .update_one(COLLECTION, &Self::key_filter(conversation_id), fields, false)
            .await?;

        if !updated {
            return Err(LedgerError::NotFound(conversation_id.to_string()));
        }
        Ok(())
    }
}
