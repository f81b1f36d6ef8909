//! Per-open-conversation bridge between the local chat store and the
//! gateway connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::warn;

use kerb_store::ChatStore;
use kerb_types::events::ClientEvent;
use kerb_types::models::ChatMessage;

use crate::bus::{EventBus, Subscription};
use crate::connection::ConnectionHandle;
use crate::notify::Notifier;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One open conversation: local history merged with live inbound and
/// outbound messages.
///
/// Sends are optimistic — the message enters render state before any
/// acknowledgment, and there is no reconciliation if the server-side relay
/// silently fails. Delivery is at-most-once; transport failures are logged,
/// never retried.
///
/// Dropping the session deregisters its inbound handler on the same turn;
/// the shared connection is left untouched.
pub struct ChatSession {
    conversation_id: String,
    local_user: String,
    peer_user: String,
    store: Arc<ChatStore>,
    handle: ConnectionHandle,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    focused: Arc<AtomicBool>,
    revision: Arc<watch::Sender<u64>>,
    _subscription: Subscription,
}

impl ChatSession {
    /// Open a conversation with `peer_user`. Announces presence, ensures the
    /// conversation row exists, loads history (falling back to an empty seed
    /// if the store is unavailable) and subscribes to inbound messages from
    /// the counterpart.
    pub fn open(
        store: Arc<ChatStore>,
        handle: &ConnectionHandle,
        bus: &EventBus,
        conversation_id: impl Into<String>,
        peer_user: impl Into<String>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let peer_user = peer_user.into();
        let local_user = handle.user_id().to_string();

        handle.announce();

        if let Err(e) = store.create_conversation(&conversation_id, &local_user, &peer_user) {
            warn!("could not ensure conversation {}: {}", conversation_id, e);
        }

        let history: Vec<ChatMessage> = match store.get_messages(&conversation_id) {
            Ok(rows) => rows
                .into_iter()
                .map(|row| ChatMessage {
                    local_id: row.id,
                    sender_id: row.sender_id,
                    text: row.message_text,
                    timestamp: row.timestamp,
                })
                .collect(),
            Err(e) => {
                warn!(
                    "history unavailable for {}, starting empty: {}",
                    conversation_id, e
                );
                Vec::new()
            }
        };

        let messages = Arc::new(Mutex::new(history));
        let focused = Arc::new(AtomicBool::new(true));
        let (revision_tx, _) = watch::channel(0u64);
        let revision = Arc::new(revision_tx);

        let subscription = bus.on_new_message({
            let store = store.clone();
            let messages = messages.clone();
            let focused = focused.clone();
            let notifier = notifier.clone();
            let revision = revision.clone();
            let conversation_id = conversation_id.clone();
            let peer_user = peer_user.clone();

            move |inbound| {
                if inbound.sender_id != peer_user {
                    return;
                }

                // Persist on the dispatch turn so history order matches
                // arrival order. A store failure keeps the message on screen,
                // just unpersisted.
                let rendered = match store.append_message(
                    &conversation_id,
                    &inbound.text,
                    &inbound.sender_id,
                ) {
                    Ok(row) => ChatMessage {
                        local_id: row.id,
                        sender_id: row.sender_id,
                        text: row.message_text,
                        timestamp: row.timestamp,
                    },
                    Err(e) => {
                        warn!("inbound message not persisted: {}", e);
                        let now = now_ms();
                        ChatMessage {
                            local_id: now,
                            sender_id: inbound.sender_id.clone(),
                            text: inbound.text.clone(),
                            timestamp: now,
                        }
                    }
                };

                messages
                    .lock()
                    .expect("render state lock poisoned")
                    .push(rendered);
                revision.send_modify(|r| *r += 1);

                if !focused.load(Ordering::Acquire) {
                    notifier.message_received(&conversation_id, &inbound.sender_id, &inbound.text);
                }
            }
        });

        Self {
            conversation_id,
            local_user,
            peer_user,
            store,
            handle: handle.clone(),
            messages,
            focused,
            revision,
            _subscription: subscription,
        }
    }

    /// Send a message: render it immediately, persist it, forward it to the
    /// gateway. Store and transport failures are logged and swallowed.
    pub fn send(&self, text: &str) -> ChatMessage {
        let now = now_ms();
        let message = ChatMessage {
            local_id: now,
            sender_id: self.local_user.clone(),
            text: text.to_string(),
            timestamp: now,
        };

        self.messages
            .lock()
            .expect("render state lock poisoned")
            .push(message.clone());
        self.revision.send_modify(|r| *r += 1);

        if let Err(e) = self
            .store
            .append_message(&self.conversation_id, text, &self.local_user)
        {
            warn!("chat history write failed: {}", e);
        }

        if let Err(e) = self.handle.send(ClientEvent::SendMessage {
            sender_id: self.local_user.clone(),
            other_user_id: self.peer_user.clone(),
            text: text.to_string(),
        }) {
            warn!("message relay send failed: {}", e);
        }

        message
    }

    /// Snapshot of the render state, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .expect("render state lock poisoned")
            .clone()
    }

    /// Revision counter for render invalidation; bumps on every change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Whether the chat screen currently has focus. Inbound messages while
    /// unfocused trigger the notification cue.
    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::Release);
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn peer_user(&self) -> &str {
        &self.peer_user
    }
}
