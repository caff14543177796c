//! Conversation ledger for Tern: a thin document store over SQLite and the
//! repository enforcing conversation/message invariants on top of it.

pub mod repository;
pub mod store;

pub use repository::LedgerRepository;
pub use store::{Document, DocumentStore, Filter, SqliteStore};
