//! Inbox endpoints and the internal notification publishers.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::middleware::{require_webhook_token, AuthUser};
use crate::error::ApiError;
use crate::gateway::events::EventName;
use crate::gateway::rooms::{self, ROOM_DIRECTORS};
use crate::notify::inbox::NewNotification;
use crate::notify::push::{PushPayload, Subscriber};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list).delete(clear))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read", post(mark_read))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{id}", delete(delete_one))
        .route("/notifications/internal/create", post(internal_create))
        .route("/notifications/internal/notify-users", post(internal_notify_users))
        .route("/notifications/internal/notify-room", post(internal_notify_room))
        .route("/notifications/internal/operator/call", post(internal_operator_call))
        .route("/notifications/internal/operator/order", post(internal_operator_order))
        .route("/notifications/internal/directors/city", post(internal_directors_city))
        .route("/notifications/internal/master", post(internal_master))
        .route("/notifications/internal/system", post(internal_system))
}

/// Durable write plus Web Push, the full delivery path for one user.
async fn deliver(state: &AppState, user_id: i64, input: NewNotification) {
    let payload = PushPayload {
        title: input.title.clone(),
        body: input.message.clone(),
        kind: Some(input.kind.clone()),
        order_id: input.order_id,
        data: input.data.clone(),
        ..Default::default()
    };
    state.inbox.create(user_id, input).await;
    state.push.send(&Subscriber::User(user_id), &payload).await;
}

// ---------------------------------------------------------------------------
// User-facing inbox endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

async fn list(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Value> {
    let limit = params.limit.unwrap_or(20).min(100);
    let offset = params.offset.unwrap_or(0);

    let notifications = state.inbox.list(user.user_id, limit, offset).await;
    let unread = state.inbox.unread_count(user.user_id).await;
    Json(serde_json::json!({
        "notifications": notifications,
        "unreadCount": unread,
    }))
}

async fn unread_count(AuthUser(user): AuthUser, State(state): State<AppState>) -> Json<Value> {
    let unread = state.inbox.unread_count(user.user_id).await;
    Json(serde_json::json!({ "unreadCount": unread }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadRequest {
    notification_id: String,
}

async fn mark_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<Value>, ApiError> {
    if !state.inbox.mark_read(user.user_id, &body.notification_id).await {
        return Err(ApiError::not_found("Notification not found"));
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn mark_all_read(AuthUser(user): AuthUser, State(state): State<AppState>) -> Json<Value> {
    state.inbox.mark_all_read(user.user_id).await;
    Json(serde_json::json!({ "success": true }))
}

async fn delete_one(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.inbox.delete(user.user_id, &id).await {
        return Err(ApiError::not_found("Notification not found"));
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn clear(AuthUser(user): AuthUser, State(state): State<AppState>) -> Json<Value> {
    state.inbox.clear(user.user_id).await;
    Json(serde_json::json!({ "success": true }))
}

// ---------------------------------------------------------------------------
// Internal publishers (webhook-secret protected)
// ---------------------------------------------------------------------------

fn ok() -> Json<Value> {
    Json(serde_json::json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalCreate {
    token: Option<String>,
    user_id: i64,
    #[serde(flatten)]
    notification: NewNotification,
}

async fn internal_create(
    State(state): State<AppState>,
    Json(body): Json<InternalCreate>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;
    deliver(&state, body.user_id, body.notification).await;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalNotifyUsers {
    token: Option<String>,
    user_ids: Vec<i64>,
    #[serde(flatten)]
    notification: NewNotification,
}

async fn internal_notify_users(
    State(state): State<AppState>,
    Json(body): Json<InternalNotifyUsers>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;
    for user_id in body.user_ids {
        deliver(&state, user_id, body.notification.clone()).await;
    }
    Ok(ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalNotifyRoom {
    token: Option<String>,
    room: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Room-scoped notification event. No durable write: membership is not an
/// identity list.
async fn internal_notify_room(
    State(state): State<AppState>,
    Json(body): Json<InternalNotifyRoom>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;
    if !rooms::is_valid_room_name(&body.room) {
        return Err(ApiError::bad_request("invalid room name"));
    }
    let event = body.event.as_deref().unwrap_or(EventName::NOTIFICATION);
    state.hub.broadcast_to_room(&body.room, event, body.data).await;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalOperatorCall {
    token: Option<String>,
    operator_id: i64,
    call: Value,
}

async fn internal_operator_call(
    State(state): State<AppState>,
    Json(body): Json<InternalOperatorCall>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;

    let phone = body.call.get("phone").and_then(Value::as_str).unwrap_or("unknown");
    deliver(
        &state,
        body.operator_id,
        NewNotification {
            kind: "call_incoming".to_string(),
            title: "Incoming call".to_string(),
            message: format!("Call from {phone}"),
            order_id: None,
            data: Some(body.call),
        },
    )
    .await;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalOperatorOrder {
    token: Option<String>,
    operator_id: i64,
    order_id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

async fn internal_operator_order(
    State(state): State<AppState>,
    Json(body): Json<InternalOperatorOrder>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;
    deliver(
        &state,
        body.operator_id,
        NewNotification {
            kind: "order_update".to_string(),
            title: body.title.unwrap_or_else(|| "Order update".to_string()),
            message: body.message.unwrap_or_default(),
            order_id: Some(body.order_id),
            data: body.data,
        },
    )
    .await;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalDirectorsCity {
    token: Option<String>,
    city: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Directors-plus-city broadcast. Director membership is a room, not an
/// identity list, so this path has no durable write either.
async fn internal_directors_city(
    State(state): State<AppState>,
    Json(body): Json<InternalDirectorsCity>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;

    let city_room = format!("city:{}", body.city);
    if !rooms::is_valid_room_name(&city_room) {
        return Err(ApiError::bad_request("city is not a valid room name"));
    }

    let event = body.event.as_deref().unwrap_or(EventName::NOTIFICATION);
    state
        .hub
        .broadcast_to_room(ROOM_DIRECTORS, event, body.data.clone())
        .await;
    state.hub.broadcast_to_room(&city_room, event, body.data).await;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalMaster {
    token: Option<String>,
    master_id: String,
    /// Internal user id of the master, when the caller has the mapping.
    /// Without it only the master-namespace Web Push fires.
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(flatten)]
    notification: NewNotification,
}

async fn internal_master(
    State(state): State<AppState>,
    Json(body): Json<InternalMaster>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;

    let payload = PushPayload {
        title: body.notification.title.clone(),
        body: body.notification.message.clone(),
        kind: Some(body.notification.kind.clone()),
        order_id: body.notification.order_id,
        data: body.notification.data.clone(),
        ..Default::default()
    };
    state
        .push
        .send(&Subscriber::Master(body.master_id), &payload)
        .await;

    if let Some(user_id) = body.user_id {
        deliver(&state, user_id, body.notification).await;
    }
    Ok(ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalSystem {
    token: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

async fn internal_system(
    State(state): State<AppState>,
    Json(body): Json<InternalSystem>,
) -> Result<Json<Value>, ApiError> {
    require_webhook_token(&state, body.token.as_deref())?;
    let event = body.event.as_deref().unwrap_or(EventName::NOTIFICATION);
    state.hub.broadcast_to_all(event, body.data).await;
    Ok(ok())
}
