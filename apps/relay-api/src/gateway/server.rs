//! Socket upgrade handler and per-connection event loop.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::auth::claims::{self, AuthedUser};
use crate::auth::cookie;
use crate::AppState;

use super::events::{AuthenticatePayload, ClientFrame, EventName, RoomPayload, ServerFrame};
use super::rooms::{self, ROOM_DIRECTORS, ROOM_OPERATORS};

/// Dead-socket sweep period. Some socket stacks miss disconnect callbacks.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Server-side liveness: ping cadence and the silence limit that closes a
/// connection.
const PING_INTERVAL: Duration = Duration::from_secs(25);
const PING_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest accepted socket frame.
const MAX_FRAME_BYTES: usize = 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let handshake = handshake_token(&params, &headers, &state.config.cookie_secret);
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, state, handshake))
}

/// Token candidate from the handshake, tried in precedence order after the
/// `authenticate` payload: query `token`, bearer header, access-token cookie.
///
/// `Err` marks a cookie whose signature failed; that is a hard rejection and
/// must not fall through to "no token".
fn handshake_token(
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    cookie_secret: &str,
) -> Result<Option<String>, ()> {
    if let Some(token) = params.get("token").filter(|t| !t.is_empty()) {
        return Ok(Some(token.clone()));
    }

    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
    {
        return Ok(Some(token.to_string()));
    }

    if let Some(header) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        if let Some(raw) = cookie::find_access_token(header) {
            return match cookie::verify_cookie_value(cookie_secret, &raw) {
                Ok(token) => Ok(Some(token)),
                Err(_) => Err(()),
            };
        }
    }

    Ok(None)
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    handshake: Result<Option<String>, ()>,
) {
    let socket_id = opsrelay_common::socket_id();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    state.registry.insert_pending(&socket_id, out_tx);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let auth_grace = state.config.auth_grace;

    // Greeting: assigned socket id plus the authentication deadline hint.
    let greeting = ServerFrame::new(
        EventName::CONNECTED,
        serde_json::json!({
            "socketId": socket_id,
            "authTimeoutMs": auth_grace.as_millis() as u64,
        }),
    );
    if send_frame(&mut ws_tx, &greeting).await.is_err() {
        state.registry.remove(&socket_id);
        return;
    }

    // Phase 1: wait for a successful authenticate within the grace period.
    let pending =
        time::timeout(auth_grace, wait_for_authenticate(&mut ws_tx, &mut ws_rx)).await;

    let payload_token = match pending {
        Ok(Ok(token)) => token,
        Ok(Err(())) => {
            state.registry.remove(&socket_id);
            return;
        }
        Err(_elapsed) => {
            let _ = send_frame(&mut ws_tx, &ServerFrame::error("authentication timeout")).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            state.registry.remove(&socket_id);
            return;
        }
    };

    // Resolve the token: payload first, then the handshake candidate.
    let token = match payload_token {
        Some(token) if !token.is_empty() => Some(token),
        _ => match handshake {
            Ok(candidate) => candidate,
            Err(()) => {
                let _ =
                    send_frame(&mut ws_tx, &ServerFrame::error("invalid cookie signature")).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                state.registry.remove(&socket_id);
                return;
            }
        },
    };

    let user = match claims::verify_token(&state.config.jwt_secret, token.as_deref().unwrap_or(""))
    {
        Ok(user) => user,
        Err(e) => {
            let _ = send_frame(&mut ws_tx, &ServerFrame::error(&e.to_string())).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            state.registry.remove(&socket_id);
            return;
        }
    };

    let rooms = user.role.auto_rooms();
    if !state
        .registry
        .authenticate(&socket_id, user.clone(), rooms.clone())
    {
        // Disconnect raced the guard.
        return;
    }

    let authenticated = ServerFrame::new(
        EventName::AUTHENTICATED,
        serde_json::json!({
            "userId": user.user_id,
            "role": user.role.as_str(),
            "rooms": rooms,
        }),
    );
    if send_frame(&mut ws_tx, &authenticated).await.is_err() {
        state.registry.remove(&socket_id);
        return;
    }

    tracing::info!(%socket_id, user_id = user.user_id, role = %user.role, "socket authenticated");
    emit_presence(&state, &user, true).await;

    run_session(&state, &socket_id, &user, &mut ws_tx, &mut ws_rx, &mut out_rx).await;

    if let Some(removed) = state.registry.remove(&socket_id) {
        if let Some(user) = removed.user {
            emit_presence(&state, &user, false).await;
        }
    }
    tracing::info!(%socket_id, user_id = user.user_id, "socket closed");
}

/// Pending-phase read loop. Returns the `authenticate` payload token, or
/// `Err` when the connection ended first. Ping works pre-auth; anything else
/// draws an error frame without closing.
async fn wait_for_authenticate(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<Option<String>, ()> {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(?e, "socket read error before authenticate");
                return Err(());
            }
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => return Err(()),
            _ => continue,
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(_) => {
                let _ = send_frame(ws_tx, &ServerFrame::error("invalid message")).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                return Err(());
            }
        };

        match frame.event.as_str() {
            EventName::AUTHENTICATE => {
                let payload: AuthenticatePayload =
                    serde_json::from_value(frame.data).unwrap_or(AuthenticatePayload { token: None });
                return Ok(payload.token);
            }
            EventName::PING => {
                let _ = send_frame(ws_tx, &pong()).await;
            }
            _ => {
                let _ = send_frame(ws_tx, &ServerFrame::error("not authenticated")).await;
            }
        }
    }
    Err(())
}

/// Main session loop: forward fan-out frames, handle room membership and
/// ping, enforce liveness.
async fn run_session(
    state: &AppState,
    socket_id: &str,
    user: &AuthedUser,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
    out_rx: &mut mpsc::UnboundedReceiver<ServerFrame>,
) {
    let mut ping_timer = time::interval(PING_INTERVAL);
    ping_timer.tick().await; // First tick fires immediately; skip it.
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            // Fan-out frame destined for this socket.
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if send_frame(ws_tx, &frame).await.is_err() {
                    break;
                }
            }

            // Client sends us a message.
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(?e, %socket_id, "socket read error");
                        break;
                    }
                    None => break,
                };
                last_seen = Instant::now();

                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(_) => {
                        let _ = send_frame(ws_tx, &ServerFrame::error("invalid message")).await;
                        continue;
                    }
                };

                if handle_client_frame(state, socket_id, user, frame, ws_tx).await.is_err() {
                    break;
                }
            }

            // Liveness: ping on a cadence, close after prolonged silence.
            _ = ping_timer.tick() => {
                if last_seen.elapsed() > PING_TIMEOUT {
                    tracing::debug!(%socket_id, "liveness timeout, closing socket");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_client_frame(
    state: &AppState,
    socket_id: &str,
    user: &AuthedUser,
    frame: ClientFrame,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    match frame.event.as_str() {
        EventName::PING => {
            send_frame(ws_tx, &pong()).await.map_err(|_| ())?;
        }
        EventName::JOIN_ROOM => {
            let Ok(RoomPayload { room }) = serde_json::from_value(frame.data) else {
                send_frame(ws_tx, &ServerFrame::error("room is required"))
                    .await
                    .map_err(|_| ())?;
                return Ok(());
            };
            // Forbidden joins answer with an error frame but keep the socket.
            if let Err(refusal) = rooms::check_join(user, &room) {
                send_frame(ws_tx, &ServerFrame::error(refusal.message()))
                    .await
                    .map_err(|_| ())?;
                return Ok(());
            }
            state.registry.join_room(socket_id, &room);
        }
        EventName::LEAVE_ROOM => {
            let Ok(RoomPayload { room }) = serde_json::from_value(frame.data) else {
                send_frame(ws_tx, &ServerFrame::error("room is required"))
                    .await
                    .map_err(|_| ())?;
                return Ok(());
            };
            if !rooms::is_valid_room_name(&room) {
                send_frame(ws_tx, &ServerFrame::error("invalid room name"))
                    .await
                    .map_err(|_| ())?;
                return Ok(());
            }
            state.registry.leave_room(socket_id, &room);
        }
        EventName::AUTHENTICATE => {
            send_frame(ws_tx, &ServerFrame::error("already authenticated"))
                .await
                .map_err(|_| ())?;
        }
        other => {
            tracing::debug!(%socket_id, event = other, "unknown client event");
            send_frame(ws_tx, &ServerFrame::error("unknown event"))
                .await
                .map_err(|_| ())?;
        }
    }
    Ok(())
}

/// Presence events are scoped to `directors` (plus `operators` when the
/// subject is an operator), never broadcast to all. Also used by the sweep
/// task when it reaps an orphaned authenticated socket.
pub async fn emit_presence(state: &AppState, user: &AuthedUser, online: bool) {
    let event = if online {
        EventName::USER_ONLINE
    } else {
        EventName::USER_OFFLINE
    };
    let data = serde_json::json!({
        "userId": user.user_id,
        "role": user.role.as_str(),
    });

    state
        .hub
        .broadcast_to_room(ROOM_DIRECTORS, event, data.clone())
        .await;
    if user.role.is_operator() {
        state.hub.broadcast_to_room(ROOM_OPERATORS, event, data).await;
    }
}

fn pong() -> ServerFrame {
    ServerFrame::new(
        EventName::PONG,
        serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() }),
    )
}

async fn send_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap();
    ws_tx.send(Message::Text(json.into())).await
}
