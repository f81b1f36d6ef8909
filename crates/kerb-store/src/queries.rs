use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{ConversationRow, MessageRow};
use crate::{ChatStore, Result, StoreError};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ChatStore {
    /// Idempotent: if a conversation with this id already exists it is
    /// returned unchanged, otherwise a new row is inserted with empty
    /// last-message fields.
    pub fn create_conversation(
        &self,
        conversation_id: &str,
        member_a: &str,
        member_b: &str,
    ) -> Result<ConversationRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversations
                     (conversation_id, member_a, member_b, last_message, last_timestamp)
                 VALUES (?1, ?2, ?3, '', ?4)",
                params![conversation_id, member_a, member_b, now_ms()],
            )?;
            query_conversation(conn, conversation_id)?
                .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))
        })
    }

    /// All conversations, most-recently-active first.
    pub fn list_conversations(&self) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, member_a, member_b, last_message, last_timestamp
                 FROM conversations
                 ORDER BY last_timestamp DESC",
            )?;
            let rows = stmt
                .query_map([], row_to_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Message history for one conversation, ascending by timestamp. The
    /// sequence id breaks ties so same-millisecond appends keep call order.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, message_text, sender_id, timestamp
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id], row_to_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Insert a message and update the conversation's denormalized
    /// last-message cache in one transaction — a reader never observes one
    /// without the other.
    ///
    /// The conversation must already exist (`create_conversation` is
    /// idempotent, call it first); appending to an unknown conversation
    /// returns [`StoreError::ConversationNotFound`].
    pub fn append_message(
        &self,
        conversation_id: &str,
        text: &str,
        sender_id: &str,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let timestamp = now_ms();

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE conversation_id = ?1",
                    [conversation_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::ConversationNotFound(
                    conversation_id.to_string(),
                ));
            }

            tx.execute(
                "INSERT INTO messages (conversation_id, message_text, sender_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, text, sender_id, timestamp],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE conversations
                 SET last_message = ?1, last_timestamp = ?2
                 WHERE conversation_id = ?3",
                params![text, timestamp, conversation_id],
            )?;

            tx.commit()?;

            Ok(MessageRow {
                id,
                conversation_id: conversation_id.to_string(),
                message_text: text.to_string(),
                sender_id: sender_id.to_string(),
                timestamp,
            })
        })
    }

    /// Delete a conversation and its messages (cascade, one transaction).
    /// Returns whether the conversation existed.
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                [conversation_id],
            )?;
            let affected = tx.execute(
                "DELETE FROM conversations WHERE conversation_id = ?1",
                [conversation_id],
            )?;
            tx.commit()?;
            Ok(affected > 0)
        })
    }
}

fn query_conversation(conn: &Connection, conversation_id: &str) -> Result<Option<ConversationRow>> {
    let row = conn
        .query_row(
            "SELECT conversation_id, member_a, member_b, last_message, last_timestamp
             FROM conversations WHERE conversation_id = ?1",
            [conversation_id],
            row_to_conversation,
        )
        .optional()?;
    Ok(row)
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        conversation_id: row.get(0)?,
        member_a: row.get(1)?,
        member_b: row.get(2)?,
        last_message: row.get(3)?,
        last_timestamp: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        message_text: row.get(2)?,
        sender_id: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChatStore {
        ChatStore::open_in_memory().expect("in-memory store")
    }

    #[test]
    fn create_conversation_is_idempotent() {
        let store = store();
        let first = store.create_conversation("c1", "u1", "u2").unwrap();
        let second = store.create_conversation("c1", "ignored", "ignored").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list_conversations().unwrap().len(), 1);
        assert_eq!(second.member_a, "u1");
        assert_eq!(second.member_b, "u2");
    }

    #[test]
    fn append_then_read_scenario() {
        let store = store();
        store.create_conversation("c1", "u1", "u2").unwrap();
        store.append_message("c1", "hello", "u1").unwrap();

        let messages = store.get_messages("c1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_text, "hello");
        assert_eq!(messages[0].sender_id, "u1");

        let conversations = store.list_conversations().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].conversation_id, "c1");
        assert_eq!(conversations[0].last_message, "hello");
        assert_eq!(conversations[0].last_timestamp, messages[0].timestamp);
    }

    #[test]
    fn messages_keep_call_order() {
        let store = store();
        store.create_conversation("c1", "u1", "u2").unwrap();
        for i in 0..20 {
            store
                .append_message("c1", &format!("msg-{}", i), "u1")
                .unwrap();
        }

        let messages = store.get_messages("c1").unwrap();
        assert_eq!(messages.len(), 20);
        for (i, msg) in messages.iter().enumerate() {
            assert_eq!(msg.message_text, format!("msg-{}", i));
        }
        for pair in messages.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn last_message_cache_tracks_latest_append() {
        let store = store();
        store.create_conversation("c1", "u1", "u2").unwrap();
        store.append_message("c1", "first", "u1").unwrap();
        let last = store.append_message("c1", "second", "u2").unwrap();

        let conversations = store.list_conversations().unwrap();
        assert_eq!(conversations[0].last_message, "second");
        assert_eq!(conversations[0].last_timestamp, last.timestamp);
    }

    #[test]
    fn list_orders_most_recently_active_first() {
        let store = store();
        store.create_conversation("old", "u1", "u2").unwrap();
        store.create_conversation("new", "u1", "u3").unwrap();
        store.append_message("old", "hi", "u1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.append_message("new", "hi", "u1").unwrap();

        let ids: Vec<_> = store
            .list_conversations()
            .unwrap()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn append_to_unknown_conversation_is_an_error() {
        let store = store();
        let err = store.append_message("nope", "hello", "u1").unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(id) if id == "nope"));
    }

    #[test]
    fn get_messages_on_empty_conversation_is_empty() {
        let store = store();
        store.create_conversation("c1", "u1", "u2").unwrap();
        assert!(store.get_messages("c1").unwrap().is_empty());
        assert!(store.get_messages("never-created").unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_to_messages() {
        let store = store();
        store.create_conversation("c1", "u1", "u2").unwrap();
        store.append_message("c1", "hello", "u1").unwrap();

        assert!(store.delete_conversation("c1").unwrap());
        assert!(store.list_conversations().unwrap().is_empty());
        assert!(store.get_messages("c1").unwrap().is_empty());

        // Second delete is a no-op
        assert!(!store.delete_conversation("c1").unwrap());
    }

    #[test]
    fn reopen_preserves_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kerb.db");

        {
            let store = ChatStore::open(&path).unwrap();
            store.create_conversation("c1", "u1", "u2").unwrap();
            store.append_message("c1", "hello", "u1").unwrap();
        }

        let store = ChatStore::open(&path).unwrap();
        let messages = store.get_messages("c1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_text, "hello");
    }
}
