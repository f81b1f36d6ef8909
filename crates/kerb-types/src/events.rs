use serde::{Deserialize, Serialize};

/// Events sent from the client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Announce presence once the transport is open
    AddUser { user_id: String },

    /// Relay an outbound chat message to another user
    SendMessage {
        sender_id: String,
        other_user_id: String,
        text: String,
    },

    /// Start receiving position updates for one mechanic
    TrackMechanic { mechanic_id: String },

    /// Mechanic side: register availability and initial position
    RegisterMechanic {
        mechanic_id: String,
        lat: f64,
        lng: f64,
        available: bool,
    },

    /// Mechanic side: publish a position update
    SendLocation {
        mechanic_id: String,
        lat: f64,
        lng: f64,
        available: bool,
    },
}

/// Events pushed from the gateway to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Inbound chat message relayed from another user
    GetMessage { sender_id: String, text: String },

    /// Position update for a tracked mechanic
    MechanicLiveLocation {
        mechanic_id: String,
        lat: f64,
        lng: f64,
    },
}

impl ServerEvent {
    /// Basic shape check for inbound events. Events that fail are dropped by
    /// the connection driver rather than applied partially.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::GetMessage { sender_id, .. } => !sender_id.is_empty(),
            Self::MechanicLiveLocation {
                mechanic_id,
                lat,
                lng,
            } => {
                !mechanic_id.is_empty()
                    && lat.is_finite()
                    && lng.is_finite()
                    && (-90.0..=90.0).contains(lat)
                    && (-180.0..=180.0).contains(lng)
            }
        }
    }
}
