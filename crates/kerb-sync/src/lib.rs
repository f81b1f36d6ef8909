//! Real-time synchronization layer: one WebSocket connection to the gateway,
//! a typed event bus for inbound events, per-screen live-location relays and
//! per-conversation chat sessions backed by the offline chat store.
//!
//! Everything here is best-effort and recoverable: transport failures are
//! logged and surfaced as `connectionStatus` bus events, store failures fall
//! back to empty results, and nothing in this layer is fatal to the process.

pub mod bus;
pub mod connection;
pub mod notify;
pub mod relay;
pub mod session;

mod error;

pub use bus::{EventBus, Subscription};
pub use connection::{Connection, ConnectionConfig, ConnectionHandle};
pub use error::TransportError;
pub use notify::{NoopNotifier, Notifier};
pub use relay::LocationRelay;
pub use session::ChatSession;
