//! Socket wire-format messages and event names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Server → Client frame
// ---------------------------------------------------------------------------

/// A frame sent from the server to a client over the socket.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    pub event: String,
    pub data: Value,
}

impl ServerFrame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    /// Build an `error` frame.
    pub fn error(message: &str) -> Self {
        Self::new(EventName::ERROR, serde_json::json!({ "message": message }))
    }
}

// ---------------------------------------------------------------------------
// Client → Server frame
// ---------------------------------------------------------------------------

/// A message received from a client over the socket.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticatePayload {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoomPayload {
    pub room: String,
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Event names exchanged with clients.
pub struct EventName;

impl EventName {
    // Client → server.
    pub const AUTHENTICATE: &'static str = "authenticate";
    pub const JOIN_ROOM: &'static str = "join-room";
    pub const LEAVE_ROOM: &'static str = "leave-room";
    pub const PING: &'static str = "ping";

    // Server → client.
    pub const CONNECTED: &'static str = "connected";
    pub const AUTHENTICATED: &'static str = "authenticated";
    pub const ERROR: &'static str = "error";
    pub const PONG: &'static str = "pong";
    pub const USER_ONLINE: &'static str = "user:online";
    pub const USER_OFFLINE: &'static str = "user:offline";

    // Fan-out payloads.
    pub const CALL_NEW: &'static str = "call:new";
    pub const CALL_UPDATED: &'static str = "call:updated";
    pub const CALL_ENDED: &'static str = "call:ended";
    pub const ORDER_NEW: &'static str = "order:new";
    pub const ORDER_UPDATED: &'static str = "order:updated";
    pub const NOTIFICATION: &'static str = "notification";
    pub const NOTIFICATION_NEW: &'static str = "notification:new";
    pub const NOTIFICATION_READ: &'static str = "notification:read";
    pub const NOTIFICATION_ALL_READ: &'static str = "notification:all_read";
    pub const NOTIFICATION_CLEARED: &'static str = "notification:cleared";
    pub const AVITO_NEW_MESSAGE: &'static str = "avito-new-message";
    pub const AVITO_CHAT_UPDATED: &'static str = "avito-chat-updated";
    pub const AVITO_NOTIFICATION: &'static str = "avito-notification";
}
