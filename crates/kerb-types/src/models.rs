use serde::{Deserialize, Serialize};

/// An inbound chat message as republished on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender_id: String,
    pub text: String,
}

/// Latest known position of a tracked mechanic.
///
/// Ephemeral: held only by the relay that subscribed to it and replaced
/// wholesale on every update. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanicPosition {
    pub mechanic_id: String,
    pub lat: f64,
    pub lng: f64,
}

/// Connection state transition, published so the UI can show a non-blocking
/// indicator instead of silently going stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
}

/// A chat message as rendered by an open conversation screen.
///
/// `local_id` keys the render list. For persisted rows it is the store's
/// sequence id; for optimistic sends it is the epoch-ms timestamp, unique
/// enough at millisecond granularity for a single sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub local_id: i64,
    pub sender_id: String,
    pub text: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}
