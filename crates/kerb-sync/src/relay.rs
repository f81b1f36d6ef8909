//! Per-screen subscription to one mechanic's live position.

use tokio::sync::watch;
use tracing::debug;

use kerb_types::models::MechanicPosition;

use crate::bus::{EventBus, Subscription};
use crate::connection::ConnectionHandle;

/// Tracks exactly one mechanic. Each inbound position for that mechanic
/// replaces the held value wholesale — no merging, no interpolation — and
/// wakes the render layer through a watch channel. Positions for any other
/// mechanic are ignored.
///
/// Cleanup is tied to drop: when the screen closes, however it closes, the
/// bus handler is deregistered and the track registration released. Tracking
/// a different mechanic means constructing a new relay.
pub struct LocationRelay {
    mechanic_id: String,
    rx: watch::Receiver<Option<MechanicPosition>>,
    handle: ConnectionHandle,
    _subscription: Subscription,
}

impl LocationRelay {
    pub fn subscribe(
        handle: &ConnectionHandle,
        bus: &EventBus,
        mechanic_id: impl Into<String>,
    ) -> Self {
        let mechanic_id = mechanic_id.into();
        let (tx, rx) = watch::channel(None);

        let filter_id = mechanic_id.clone();
        let subscription = bus.on_mechanic_location(move |position| {
            if position.mechanic_id == filter_id {
                let _ = tx.send(Some(position.clone()));
            }
        });

        handle.track(&mechanic_id);
        debug!("relay tracking mechanic {}", mechanic_id);

        Self {
            mechanic_id,
            rx,
            handle: handle.clone(),
            _subscription: subscription,
        }
    }

    pub fn mechanic_id(&self) -> &str {
        &self.mechanic_id
    }

    /// Latest position, if any update has arrived since subscribing.
    pub fn position(&self) -> Option<MechanicPosition> {
        self.rx.borrow().clone()
    }

    /// Watch receiver for the render layer; resolves whenever the held
    /// position is replaced.
    pub fn watch(&self) -> watch::Receiver<Option<MechanicPosition>> {
        self.rx.clone()
    }
}

impl Drop for LocationRelay {
    fn drop(&mut self) {
        self.handle.untrack(&self.mechanic_id);
        debug!("relay released mechanic {}", self.mechanic_id);
    }
}
