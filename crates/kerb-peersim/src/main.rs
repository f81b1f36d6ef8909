//! Simulated mechanic peer: registers with the gateway, then publishes a
//! position that drifts on a small random walk. Used to exercise live
//! tracking against a running gateway without a real mechanic app.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use kerb_types::events::ClientEvent;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kerb=debug".into()),
        )
        .init();

    let url = env_or("KERB_GATEWAY_URL", "ws://127.0.0.1:3000/gateway");
    let mechanic_id = env_or("KERB_MECHANIC_ID", "m1");
    // Default walk starts in Nairobi
    let mut lat: f64 = env_or("KERB_LAT", "-1.286389").parse()?;
    let mut lng: f64 = env_or("KERB_LNG", "36.817223").parse()?;
    let interval_ms: u64 = env_or("KERB_INTERVAL_MS", "2000").parse()?;

    let (ws, _) = connect_async(url.as_str()).await?;
    info!("peersim {} connected to {}", mechanic_id, url);
    let (mut sink, mut stream) = ws.split();

    let register = ClientEvent::RegisterMechanic {
        mechanic_id: mechanic_id.clone(),
        lat,
        lng,
        available: true,
    };
    sink.send(Message::Text(serde_json::to_string(&register)?.into()))
        .await?;

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut rng = rand::rng();
                lat = (lat + rng.random_range(-0.0005..0.0005)).clamp(-90.0, 90.0);
                lng = (lng + rng.random_range(-0.0005..0.0005)).clamp(-180.0, 180.0);

                let event = ClientEvent::SendLocation {
                    mechanic_id: mechanic_id.clone(),
                    lat,
                    lng,
                    available: true,
                };
                if let Err(e) = sink.send(Message::Text(serde_json::to_string(&event)?.into())).await {
                    warn!("location publish failed, exiting: {}", e);
                    break;
                }
                info!("published position {:.6},{:.6}", lat, lng);
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("gateway closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("gateway read error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
