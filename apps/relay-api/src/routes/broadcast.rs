//! Webhook ingress: external services publish events here.
//!
//! Every body carries the shared webhook secret; validation is constant-time
//! and a mismatch answers 401 without echoing the submitted value.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::middleware::require_webhook_token;
use crate::error::ApiError;
use crate::gateway::events::EventName;
use crate::gateway::rooms::{self, ROOM_DIRECTORS, ROOM_OPERATORS};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/broadcast/call-new", post(call_new))
        .route("/broadcast/call-updated", post(call_updated))
        .route("/broadcast/call-ended", post(call_ended))
        .route("/broadcast/order-new", post(order_new))
        .route("/broadcast/order-updated", post(order_updated))
        .route("/broadcast/notification", post(notification))
        .route("/broadcast/avito-event", post(avito_event))
}

fn ok() -> Json<Value> {
    Json(serde_json::json!({ "success": true }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/broadcast/call-*
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CallBroadcast {
    token: Option<String>,
    call: Value,
}

/// Calls route to the operators room and, when an operator is named, that
/// operator's own room. Never to all.
async fn broadcast_call(
    state: AppState,
    body: CallBroadcast,
    event: &str,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;

    state
        .hub
        .broadcast_to_room(ROOM_OPERATORS, event, body.call.clone())
        .await;

    if let Some(operator_id) = body.call.get("operatorId").and_then(Value::as_i64) {
        state
            .hub
            .broadcast_to_room(&format!("operator:{operator_id}"), event, body.call)
            .await;
    }
    Ok(ok())
}

async fn call_new(
    State(state): State<AppState>,
    Json(body): Json<CallBroadcast>,
) -> Result<Json<Value>, ApiError> {
    broadcast_call(state, body, EventName::CALL_NEW).await
}

async fn call_updated(
    State(state): State<AppState>,
    Json(body): Json<CallBroadcast>,
) -> Result<Json<Value>, ApiError> {
    broadcast_call(state, body, EventName::CALL_UPDATED).await
}

async fn call_ended(
    State(state): State<AppState>,
    Json(body): Json<CallBroadcast>,
) -> Result<Json<Value>, ApiError> {
    broadcast_call(state, body, EventName::CALL_ENDED).await
}

// ---------------------------------------------------------------------------
// POST /api/v1/broadcast/order-new | order-updated
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OrderBroadcast {
    token: Option<String>,
    order: Value,
}

async fn broadcast_order(
    state: AppState,
    body: OrderBroadcast,
    event: &str,
    include_order_room: bool,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;

    let order = &body.order;
    let mut targets = vec![ROOM_OPERATORS.to_string(), ROOM_DIRECTORS.to_string()];

    if let Some(city) = order.get("city").and_then(Value::as_str) {
        let room = format!("city:{city}");
        // City names must already be transliterated to the room charset.
        if !rooms::is_valid_room_name(&room) {
            return Err(ApiError::bad_request("city is not a valid room name"));
        }
        targets.push(room);
    }
    if let Some(master_id) = order.get("masterId").and_then(Value::as_i64) {
        targets.push(format!("master:{master_id}"));
    }
    if include_order_room {
        if let Some(order_id) = order.get("id").and_then(Value::as_i64) {
            targets.push(format!("order:{order_id}"));
        }
    }

    for room in targets {
        state.hub.broadcast_to_room(&room, event, order.clone()).await;
    }
    Ok(ok())
}

async fn order_new(
    State(state): State<AppState>,
    Json(body): Json<OrderBroadcast>,
) -> Result<Json<Value>, ApiError> {
    broadcast_order(state, body, EventName::ORDER_NEW, false).await
}

async fn order_updated(
    State(state): State<AppState>,
    Json(body): Json<OrderBroadcast>,
) -> Result<Json<Value>, ApiError> {
    broadcast_order(state, body, EventName::ORDER_UPDATED, true).await
}

// ---------------------------------------------------------------------------
// POST /api/v1/broadcast/notification
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBroadcast {
    token: Option<String>,
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    rooms: Vec<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Route by user if set, else by rooms if non-empty, else to all.
async fn notification(
    State(state): State<AppState>,
    Json(body): Json<NotificationBroadcast>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;

    let event = body.event.as_deref().unwrap_or(EventName::NOTIFICATION);

    if let Some(user_id) = body.user_id {
        let delivered = state.hub.send_to_user(user_id, event, body.data);
        return Ok(Json(serde_json::json!({ "success": true, "delivered": delivered })));
    }

    if !body.rooms.is_empty() {
        for room in &body.rooms {
            if !rooms::is_valid_room_name(room) {
                return Err(ApiError::bad_request("invalid room name"));
            }
        }
        for room in &body.rooms {
            state.hub.broadcast_to_room(room, event, body.data.clone()).await;
        }
        return Ok(ok());
    }

    state.hub.broadcast_to_all(event, body.data).await;
    Ok(ok())
}

// ---------------------------------------------------------------------------
// POST /api/v1/broadcast/avito-event
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvitoEvent {
    token: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    data: Value,
}

async fn avito_event(
    State(state): State<AppState>,
    Json(body): Json<AvitoEvent>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;

    let event = match body.event_type.as_deref() {
        Some("new-message") => EventName::AVITO_NEW_MESSAGE,
        Some("chat-updated") => EventName::AVITO_CHAT_UPDATED,
        _ => EventName::AVITO_NOTIFICATION,
    };

    state.hub.broadcast_to_all(event, body.data.clone()).await;

    if event == EventName::AVITO_NEW_MESSAGE {
        let preview = body
            .data
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("(no text)");
        state.telegram.notify(format!("New Avito message: {preview}"));
    }
    Ok(ok())
}
