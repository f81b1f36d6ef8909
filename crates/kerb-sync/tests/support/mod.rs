//! In-process gateway used by the integration tests: a miniature WebSocket
//! server implementing the relay semantics the real gateway provides —
//! presence registration, chat relay and mechanic location fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, broadcast, mpsc};

use kerb_types::events::{ClientEvent, ServerEvent};

pub struct GatewayState {
    /// user_id -> targeted send channel
    users: RwLock<HashMap<String, mpsc::UnboundedSender<ServerEvent>>>,
    /// mechanic_id -> user_ids tracking it
    trackers: RwLock<HashMap<String, HashSet<String>>>,
    /// Signals every live connection handler to hang up
    kick: broadcast::Sender<()>,
}

impl GatewayState {
    fn new() -> Self {
        let (kick, _) = broadcast::channel(1);
        Self {
            users: RwLock::default(),
            trackers: RwLock::default(),
            kick,
        }
    }
}

pub struct TestGateway {
    pub url: String,
    state: Arc<GatewayState>,
}

impl TestGateway {
    pub async fn spawn() -> TestGateway {
        let state = Arc::new(GatewayState::new());

        let app = Router::new()
            .route("/gateway", get(ws_upgrade))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test gateway");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test gateway serve");
        });

        TestGateway {
            url: format!("ws://{}/gateway", addr),
            state,
        }
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.state.users.read().await.keys().cloned().collect()
    }

    pub async fn trackers_of(&self, mechanic_id: &str) -> Vec<String> {
        self.state
            .trackers
            .read()
            .await
            .get(mechanic_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Hang up on every live connection and forget all presence and tracker
    /// state, as if the gateway had restarted. The server keeps listening on
    /// the same address, so clients can redial.
    pub async fn drop_connections(&self) {
        self.state.users.write().await.clear();
        self.state.trackers.write().await.clear();
        let _ = self.state.kick.send(());
    }

    /// Poll until a condition on the gateway holds, or panic after ~2s.
    pub async fn wait_until<F, Fut>(&self, what: &str, mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("test gateway never reached state: {}", what);
    }
}

async fn ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let mut kick_rx = state.kick.subscribe();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Forward targeted events to this client
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = serde_json::to_string(&event).expect("encode server event");
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // The user id is learned from the addUser announcement
    let mut user_id: Option<String> = None;

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(event) = serde_json::from_str::<ClientEvent>(&text) else {
                continue;
            };

            match event {
                ClientEvent::AddUser { user_id: id } => {
                    recv_state.users.write().await.insert(id.clone(), tx.clone());
                    user_id = Some(id);
                }

                ClientEvent::SendMessage {
                    sender_id,
                    other_user_id,
                    text,
                } => {
                    let users = recv_state.users.read().await;
                    if let Some(target) = users.get(&other_user_id) {
                        let _ = target.send(ServerEvent::GetMessage { sender_id, text });
                    }
                }

                ClientEvent::TrackMechanic { mechanic_id } => {
                    if let Some(id) = &user_id {
                        recv_state
                            .trackers
                            .write()
                            .await
                            .entry(mechanic_id)
                            .or_default()
                            .insert(id.clone());
                    }
                }

                ClientEvent::RegisterMechanic {
                    mechanic_id,
                    lat,
                    lng,
                    ..
                }
                | ClientEvent::SendLocation {
                    mechanic_id,
                    lat,
                    lng,
                    ..
                } => {
                    let trackers = recv_state.trackers.read().await;
                    let users = recv_state.users.read().await;
                    if let Some(watching) = trackers.get(&mechanic_id) {
                        for watcher in watching {
                            if let Some(target) = users.get(watcher) {
                                let _ = target.send(ServerEvent::MechanicLiveLocation {
                                    mechanic_id: mechanic_id.clone(),
                                    lat,
                                    lng,
                                });
                            }
                        }
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = kick_rx.recv() => {
            send_task.abort();
            recv_task.abort();
        }
    }
}
