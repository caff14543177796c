use thiserror::Error;

/// Top-level error type for Tern.
#[derive(Debug, Error)]
pub enum TernError {
    /// Error from the outbound messaging transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Error from the chat model.
    #[error("llm error: {0}")]
    Llm(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Error from the conversation ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the document store backing the ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document with the same id already exists in the collection.
    /// This is the signal behind the atomic insert-if-absent primitive.
    #[error("document already exists")]
    AlreadyExists,

    /// Storage backend failure.
    #[error("store error: {0}")]
    Backend(String),

    /// A stored document could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the conversation repository.
///
/// A duplicate message is NOT an error — callers get it as an explicit
/// [`crate::traits::AddOutcome::Duplicate`] variant instead.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The operation referenced a conversation that was never initialized.
    #[error("conversation {0} not found")]
    NotFound(String),

    /// An append lost the optimistic-concurrency race too many times in a row.
    #[error("conversation {0} write contention")]
    Contention(String),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_names_conversation() {
        let err = LedgerError::NotFound("slack-C123".into());
        assert_eq!(err.to_string(), "conversation slack-C123 not found");
    }

    #[test]
    fn test_store_error_wraps_into_ledger_error() {
        let err: LedgerError = StoreError::Backend("disk full".into()).into();
        assert!(matches!(err, LedgerError::Store(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_ledger_error_wraps_into_tern_error() {
        let err: TernError = LedgerError::NotFound("c1".into()).into();
        assert!(err.to_string().contains("c1"));
    }
}
