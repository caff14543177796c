//! Core types, traits, config, and error handling for Tern.

pub mod config;
pub mod error;
pub mod message;
pub mod traits;

pub use config::{shellexpand, Config};
pub use error::{LedgerError, StoreError, TernError};
pub use message::{
    channel_of, conversation_id_for, ChatTurn, Conversation, Message, MessageEvent, MessageHandle,
    Role,
};
pub use traits::{AddOutcome, ChatModel, ChatSession, ConversationRepository, Transport};
