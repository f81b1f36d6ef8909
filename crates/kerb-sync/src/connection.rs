//! Owns the single real-time connection to the gateway.
//!
//! There is no hidden singleton: the application's composition root
//! constructs exactly one [`Connection`] and hands out cloneable
//! [`ConnectionHandle`]s to the screens that need one. The driver task is the
//! only reader of the socket, so the baseline inbound handler that
//! republishes gateway events onto the bus is registered exactly once by
//! construction.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use kerb_types::events::{ClientEvent, ServerEvent};
use kerb_types::models::{ConnectionStatus, InboundMessage, MechanicPosition};

use crate::bus::EventBus;
use crate::error::TransportError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway WebSocket URL, e.g. `ws://localhost:3000/gateway`
    pub url: String,
    /// Local user identifier announced via `addUser` on every (re)connect
    pub user_id: String,
    /// Pause between redial attempts after the transport drops
    pub reconnect_delay: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

struct Shared {
    tx: mpsc::UnboundedSender<ClientEvent>,
    connected: AtomicBool,
    /// Active server-side track subscriptions, re-issued on every reconnect
    tracked: Mutex<HashSet<String>>,
    user_id: String,
}

/// Cheap handle to the live connection. Components hold one of these, never
/// the [`Connection`] itself.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    /// Queue an event for the gateway. Fails fast while the transport is
    /// down; delivery is at-most-once and never retried by this layer.
    pub fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.shared
            .tx
            .send(event)
            .map_err(|_| TransportError::Closed)
    }

    /// Best-effort presence announcement.
    pub fn announce(&self) {
        let event = ClientEvent::AddUser {
            user_id: self.shared.user_id.clone(),
        };
        if let Err(e) = self.send(event) {
            debug!("presence announcement skipped: {}", e);
        }
    }

    /// Ask the gateway for position updates for one mechanic and remember the
    /// subscription so it survives reconnects.
    pub fn track(&self, mechanic_id: &str) {
        let inserted = self
            .shared
            .tracked
            .lock()
            .expect("tracked set lock poisoned")
            .insert(mechanic_id.to_string());

        if inserted {
            let event = ClientEvent::TrackMechanic {
                mechanic_id: mechanic_id.to_string(),
            };
            if let Err(e) = self.send(event) {
                // Will be issued when the driver next connects
                debug!("track request for {} deferred: {}", mechanic_id, e);
            }
        }
    }

    /// Drop a track subscription. The wire protocol has no stop-tracking
    /// event; this only removes the id from the reconnect re-issue set.
    pub fn untrack(&self, mechanic_id: &str) {
        self.shared
            .tracked
            .lock()
            .expect("tracked set lock poisoned")
            .remove(mechanic_id);
    }
}

/// The one live connection. Owned by the composition root for the process
/// lifetime; dropping it tears down the driver task.
pub struct Connection {
    handle: ConnectionHandle,
    driver: JoinHandle<()>,
}

impl Connection {
    /// Establish the connection and spawn its driver task. The driver redials
    /// after transport failures and re-announces presence (plus any active
    /// track subscriptions) on every successful connect, not only the first.
    pub fn open(config: ConnectionConfig, bus: EventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            tx,
            connected: AtomicBool::new(false),
            tracked: Mutex::new(HashSet::new()),
            user_id: config.user_id.clone(),
        });

        let driver = tokio::spawn(drive(config, bus, shared.clone(), rx));

        Self {
            handle: ConnectionHandle { shared },
            driver,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Tear the connection down. Normal operation never calls this — the
    /// connection lives for the process — but shutdown paths and tests do.
    pub fn close(self) {
        self.driver.abort();
        info!("connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(
    config: ConnectionConfig,
    bus: EventBus,
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<ClientEvent>,
) {
    loop {
        match connect_async(config.url.as_str()).await {
            Ok((ws, _)) => {
                info!("connected to gateway at {}", config.url);
                let (mut sink, mut stream) = ws.split();

                shared.connected.store(true, Ordering::Release);
                bus.publish_connection_status(&ConnectionStatus { connected: true });

                if announce_and_retrack(&mut sink, &shared).await {
                    run_session(&mut sink, &mut stream, &bus, &mut rx).await;
                }

                shared.connected.store(false, Ordering::Release);
                bus.publish_connection_status(&ConnectionStatus { connected: false });

                // At-most-once: whatever was queued while the link died is
                // dropped, not replayed after reconnect.
                let mut discarded = 0u32;
                while rx.try_recv().is_ok() {
                    discarded += 1;
                }
                if discarded > 0 {
                    warn!("discarded {} queued events after disconnect", discarded);
                }
            }
            Err(e) => {
                warn!("gateway connect failed: {}", e);
            }
        }

        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Announce presence and re-issue active track subscriptions. Runs on every
/// successful (re)connect.
async fn announce_and_retrack(sink: &mut WsSink, shared: &Shared) -> bool {
    let announce = ClientEvent::AddUser {
        user_id: shared.user_id.clone(),
    };
    if !send_event(sink, &announce).await {
        return false;
    }

    let tracked: Vec<String> = shared
        .tracked
        .lock()
        .expect("tracked set lock poisoned")
        .iter()
        .cloned()
        .collect();
    for mechanic_id in tracked {
        let event = ClientEvent::TrackMechanic { mechanic_id };
        if !send_event(sink, &event).await {
            return false;
        }
    }

    true
}

async fn run_session(
    sink: &mut WsSink,
    stream: &mut WsStream,
    bus: &EventBus,
    rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
) {
    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(event) => {
                        if !send_event(sink, &event).await {
                            break;
                        }
                    }
                    // All handles dropped; nothing left to relay
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => dispatch_inbound(bus, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("gateway closed the connection");
                        break;
                    }
                    // Pings are answered by the transport; binary frames are
                    // not part of this protocol
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("gateway read error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

async fn send_event(sink: &mut WsSink, event: &ClientEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to encode outbound event: {}", e);
            return true; // the event is unsendable, the link is fine
        }
    };
    if let Err(e) = sink.send(Message::Text(json.into())).await {
        warn!("gateway send failed: {}", e);
        return false;
    }
    true
}

/// Baseline inbound handler: parse, shape-check, republish on the bus.
/// Malformed events are dropped whole — never applied partially.
fn dispatch_inbound(bus: &EventBus, text: &str) {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("bad gateway event: {} -- raw: {}", e, truncate_for_log(text));
            return;
        }
    };

    if !event.is_well_formed() {
        debug!("dropping ill-formed gateway event: {:?}", event);
        return;
    }

    match event {
        ServerEvent::GetMessage { sender_id, text } => {
            bus.publish_new_message(&InboundMessage { sender_id, text });
        }
        ServerEvent::MechanicLiveLocation {
            mechanic_id,
            lat,
            lng,
        } => {
            bus.publish_mechanic_location(&MechanicPosition {
                mechanic_id,
                lat,
                lng,
            });
        }
    }
}

/// Cap log output without splitting a multibyte character — slicing at a raw
/// byte index panics when it lands inside one, and a dead log line must never
/// take the driver task down with it.
fn truncate_for_log(text: &str) -> &str {
    const MAX_BYTES: usize = 200;
    if text.len() <= MAX_BYTES {
        return text;
    }
    let mut end = MAX_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
pub(crate) fn test_handle(
    user_id: &str,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<ClientEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        tx,
        connected: AtomicBool::new(true),
        tracked: Mutex::new(HashSet::new()),
        user_id: user_id.to_string(),
    });
    (ConnectionHandle { shared }, rx)
}
