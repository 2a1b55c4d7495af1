//! Shared helpers for the integration tests.
//!
//! Tests run with the in-memory store, a disabled bus bridge (single-instance
//! mode), and a programmable push transport, so no external services are
//! needed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_api::bridge::BusBridge;
use relay_api::config::Config;
use relay_api::gateway::hub::EventHub;
use relay_api::gateway::registry::ConnectionRegistry;
use relay_api::notify::inbox::NotificationInbox;
use relay_api::notify::push::{
    PushDispatcher, PushOutcome, PushPayload, PushSubscription, PushTransport,
};
use relay_api::notify::telegram::TelegramRelay;
use relay_api::store::MemoryStore;
use relay_api::AppState;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const WEBHOOK_TOKEN: &str = "integration-webhook-token";

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_config() -> Config {
    Config {
        port: 0,
        jwt_secret: JWT_SECRET.to_string(),
        cookie_secret: JWT_SECRET.to_string(),
        webhook_token: WEBHOOK_TOKEN.to_string(),
        redis: None,
        cors_origins: Vec::new(),
        vapid: None,
        telegram: None,
        production: false,
        auth_grace: Duration::from_millis(400),
    }
}

/// Push transport with programmable per-endpoint outcomes.
pub struct FakePushTransport {
    outcomes: Mutex<HashMap<String, PushOutcome>>,
    delivered: Mutex<Vec<String>>,
}

impl FakePushTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(HashMap::new()),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn set_outcome(&self, endpoint: &str, outcome: PushOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), outcome);
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for FakePushTransport {
    async fn deliver(&self, subscription: &PushSubscription, _: &PushPayload) -> PushOutcome {
        self.delivered
            .lock()
            .unwrap()
            .push(subscription.endpoint.clone());
        *self
            .outcomes
            .lock()
            .unwrap()
            .get(&subscription.endpoint)
            .unwrap_or(&PushOutcome::Delivered)
    }
}

pub fn test_state() -> (AppState, Arc<FakePushTransport>) {
    let config = Arc::new(test_config());
    let registry = Arc::new(ConnectionRegistry::new());
    let bridge = BusBridge::disabled("test-instance".to_string());
    let hub = Arc::new(EventHub::new(registry.clone(), bridge.clone()));
    let store = Arc::new(MemoryStore::new());
    let transport = FakePushTransport::new();

    let state = AppState {
        config,
        registry,
        hub: hub.clone(),
        bridge,
        inbox: Arc::new(NotificationInbox::new(store.clone(), hub)),
        push: Arc::new(PushDispatcher::new(store, transport.clone())),
        telegram: Arc::new(TelegramRelay::new(None)),
    };
    (state, transport)
}

/// Start a real TCP server; returns its address and the shared state.
pub async fn start_server() -> (SocketAddr, AppState, Arc<FakePushTransport>) {
    let (state, transport) = test_state();
    let app = relay_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, transport)
}

#[derive(Serialize)]
struct MintClaims {
    #[serde(rename = "userId")]
    user_id: i64,
    role: String,
    exp: i64,
}

/// Mint a user token the way the external identity issuer does.
pub fn mint_token(user_id: i64, role: &str) -> String {
    let claims = MintClaims {
        user_id,
        role: role.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Connect a socket and consume the `connected` greeting.
pub async fn connect_socket(addr: SocketAddr) -> Socket {
    let url = format!("ws://{addr}/socket");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let greeting = next_json(&mut ws).await;
    assert_eq!(greeting["event"], "connected");
    ws
}

/// Send `authenticate` and consume the `authenticated` reply.
pub async fn authenticate(ws: &mut Socket, token: &str) -> serde_json::Value {
    let frame = serde_json::json!({
        "event": "authenticate",
        "data": { "token": token }
    });
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send authenticate");

    let reply = next_json(ws).await;
    assert_eq!(reply["event"], "authenticated", "got: {reply}");

    // Members of the presence-scoped rooms see their own user:online; drain
    // it so tests start from a clean stream.
    let rooms: Vec<String> = reply["data"]["rooms"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r.as_str().map(String::from))
        .collect();
    if rooms.iter().any(|r| r == "operators" || r == "directors") {
        let online = next_event(ws, "user:online").await;
        assert_eq!(online["data"]["userId"], reply["data"]["userId"]);
    }

    reply
}

pub async fn send_event(ws: &mut Socket, event: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "event": event, "data": data });
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Read the next text frame as JSON, with a timeout.
pub async fn next_json(ws: &mut Socket) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("parse frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Read frames until one matches `event`, skipping others (e.g. presence
/// echoes that race the assertion).
pub async fn next_event(ws: &mut Socket, event: &str) -> serde_json::Value {
    loop {
        let frame = next_json(ws).await;
        if frame["event"] == event {
            return frame;
        }
    }
}

/// Expect the server to close the connection (optionally after a final
/// `error` frame, which is returned when present).
pub async fn expect_close(ws: &mut Socket) -> Option<serde_json::Value> {
    let mut last_error = None;
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next()).await;
        match msg {
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: serde_json::Value = serde_json::from_str(&text).expect("parse frame");
                if frame["event"] == "error" {
                    last_error = Some(frame);
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return last_error,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => return last_error,
            Err(_) => panic!("timeout waiting for close"),
        }
    }
}
