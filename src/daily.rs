//! Daily check-in batch — one generated prompt per active conversation.
//!
//! Only a failure to list conversations fails the whole run; everything
//! after that is contained per conversation so one bad ledger entry or a
//! flaky downstream call cannot stall the rest of the batch.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tern_core::error::{LedgerError, TernError};
use tern_core::message::{channel_of, Conversation, Message};
use tern_core::traits::{ChatModel, ConversationRepository, Transport};
use tracing::{error, info};

/// The check-in instruction sent to the chat model, on top of the
/// conversation history it was seeded with.
fn check_in_prompt(now: DateTime<Utc>) -> String {
    format!(
        "Today's date {}\n\
         Craft a brief, friendly, and low-pressure daily check-in message for the user.\n\n\
         Your message should gently invite the user to do one of the following (but not both):\n\
         1. Share a thought on their day or some recent events.\n\
         2. Reflect on anything specific that stood out to them recently in the ongoing conversation.\n\n\
         The final message should feel genuinely interested in their journey and not explicitly \
         state it's an \"automated message\". Start directly with the check-in.",
        now.format("%Y-%m-%d %H")
    )
}

/// Where a delivered check-in text came from. Lets tests tell a generated
/// prompt from the documented deliver-the-error-text fallback without
/// string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInSource {
    Generated,
    Fallback,
}

/// A check-in ready for delivery.
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub text: String,
    pub source: CheckInSource,
}

/// Outcome for a single conversation within one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationOutcome {
    /// Not active — never contacted.
    Skipped,
    /// Active but the ledger is empty; marker recorded here only, no LLM
    /// call, no delivery, no append.
    NoHistory,
    /// Check-in delivered and recorded. `fallback` marks error-text
    /// delivery after a generation failure.
    Delivered { fallback: bool },
    /// Delivery or recording failed downstream; the batch moved on.
    Failed(String),
}

/// Summary of one batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<(String, ConversationOutcome)>,
}

impl BatchSummary {
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ConversationOutcome::Delivered { .. }))
            .count()
    }

    /// Human-readable status for the trigger response.
    pub fn status_line(&self) -> String {
        format!(
            "Daily prompts generated and sent successfully ({} delivered, {} conversations seen)",
            self.delivered(),
            self.outcomes.len()
        )
    }
}

/// Generates and delivers one check-in per active conversation.
pub struct DailyService {
    repo: Arc<dyn ConversationRepository>,
    chat_model: Arc<dyn ChatModel>,
    transport: Arc<dyn Transport>,
}

impl DailyService {
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        chat_model: Arc<dyn ChatModel>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            repo,
            chat_model,
            transport,
        }
    }

    /// Run the batch to completion. Conversations are processed strictly
    /// sequentially; only the initial listing can fail the run.
    pub async fn run(&self) -> Result<BatchSummary, LedgerError> {
        info!("daily check-in trigger received");

        let conversations = self.repo.find_many().await?;
        info!("found {} conversations", conversations.len());

        let mut summary = BatchSummary::default();
        for conversation in &conversations {
            let outcome = self.process(conversation).await;
            summary
                .outcomes
                .push((conversation.conversation_id.clone(), outcome));
        }

        info!("{}", summary.status_line());
        Ok(summary)
    }

    async fn process(&self, conversation: &Conversation) -> ConversationOutcome {
        let conversation_id = &conversation.conversation_id;

        if !conversation.active {
            return ConversationOutcome::Skipped;
        }

        if conversation.messages.is_empty() {
            info!("no messages in {conversation_id}, skipping check-in");
            return ConversationOutcome::NoHistory;
        }

        info!("generating daily check-in for {conversation_id}");
        let check_in = self.generate(conversation).await;

        let channel = channel_of(conversation_id);
        if let Err(e) = self.transport.post(channel, &check_in.text, None).await {
            error!("failed to deliver check-in to {conversation_id}: {e}");
            return ConversationOutcome::Failed(e.to_string());
        }

        let record = Message::system(&format!("Daily Prompt: {}", check_in.text));
        if let Err(e) = self.repo.add_message(conversation_id, record).await {
            error!("failed to record check-in for {conversation_id}: {e}");
            return ConversationOutcome::Failed(e.to_string());
        }

        ConversationOutcome::Delivered {
            fallback: check_in.source == CheckInSource::Fallback,
        }
    }

    /// Generate the check-in text. A generation failure is deliberately
    /// converted into deliverable error text rather than aborting the
    /// conversation's iteration.
    async fn generate(&self, conversation: &Conversation) -> CheckIn {
        match self.try_generate(conversation).await {
            Ok(text) => CheckIn {
                text,
                source: CheckInSource::Generated,
            },
            Err(e) => {
                error!(
                    "check-in generation failed for {}: {e}",
                    conversation.conversation_id
                );
                CheckIn {
                    text: format!("Error generating daily prompt: {e}"),
                    source: CheckInSource::Fallback,
                }
            }
        }
    }

    async fn try_generate(&self, conversation: &Conversation) -> Result<String, TernError> {
        let mut session = self.chat_model.start_chat(&conversation.messages).await?;
        session.send(&check_in_prompt(Utc::now())).await
    }
}
