/// Database row types — these map directly to SQLite rows.
/// Distinct from the kerb-types render models to keep the store layer
/// independent.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub conversation_id: String,
    pub member_a: String,
    pub member_b: String,
    /// Denormalized last-message cache for fast listing
    pub last_message: String,
    /// Epoch milliseconds of the last message (creation time if none yet)
    pub last_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub message_text: String,
    pub sender_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}
