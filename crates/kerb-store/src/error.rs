use thiserror::Error;

/// Errors produced by the store layer. All of these are recoverable; callers
/// fall back to empty/default results rather than crashing.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Appending to a conversation that was never created. Callers must
    /// `create_conversation` first; it is idempotent.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;
