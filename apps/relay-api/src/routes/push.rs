//! Web Push subscription management endpoints.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::middleware::AuthUser;
use crate::notify::push::{PushPayload, PushSubscription, SettingsPatch, Subscriber};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/push/subscribe", post(subscribe))
        .route("/push/unsubscribe", post(unsubscribe))
        .route("/push/settings", get(settings).patch(update_settings))
        .route("/push/test", post(send_test))
        .route("/push/master/subscribe", post(master_subscribe))
        .route("/push/master/unsubscribe", post(master_unsubscribe))
        .route(
            "/push/master/settings",
            get(master_settings).patch(master_update_settings),
        )
        .route("/push/master/test", post(master_send_test))
}

fn test_payload() -> PushPayload {
    PushPayload {
        title: "Test notification".to_string(),
        body: "Push delivery is working".to_string(),
        kind: Some("test".to_string()),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// User endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    subscription: PushSubscription,
}

async fn subscribe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<SubscribeRequest>,
) -> Json<Value> {
    let who = Subscriber::User(user.user_id);
    let success = state.push.subscribe(&who, body.subscription).await;
    let settings = state.push.settings(&who).await;
    Json(serde_json::json!({ "success": success, "settings": settings }))
}

#[derive(Debug, Deserialize)]
struct UnsubscribeRequest {
    endpoint: String,
}

async fn unsubscribe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<UnsubscribeRequest>,
) -> Json<Value> {
    let removed = state
        .push
        .unsubscribe(&Subscriber::User(user.user_id), &body.endpoint)
        .await;
    Json(serde_json::json!({ "success": removed }))
}

async fn settings(AuthUser(user): AuthUser, State(state): State<AppState>) -> Json<Value> {
    let settings = state.push.settings(&Subscriber::User(user.user_id)).await;
    Json(serde_json::to_value(settings).unwrap())
}

async fn update_settings(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Json<Value> {
    let settings = state
        .push
        .update_settings(&Subscriber::User(user.user_id), patch)
        .await;
    Json(serde_json::to_value(settings).unwrap())
}

async fn send_test(AuthUser(user): AuthUser, State(state): State<AppState>) -> Json<Value> {
    let report = state
        .push
        .send(&Subscriber::User(user.user_id), &test_payload())
        .await;
    Json(serde_json::json!({ "success": report.sent > 0, "report": report }))
}

// ---------------------------------------------------------------------------
// Master endpoints
//
// Master identity comes from an external system; callers name the master id
// explicitly after normal user authentication.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterSubscribeRequest {
    master_id: String,
    subscription: PushSubscription,
}

async fn master_subscribe(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<MasterSubscribeRequest>,
) -> Json<Value> {
    let who = Subscriber::Master(body.master_id);
    let success = state.push.subscribe(&who, body.subscription).await;
    let settings = state.push.settings(&who).await;
    Json(serde_json::json!({ "success": success, "settings": settings }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterUnsubscribeRequest {
    master_id: String,
    endpoint: String,
}

async fn master_unsubscribe(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<MasterUnsubscribeRequest>,
) -> Json<Value> {
    let removed = state
        .push
        .unsubscribe(&Subscriber::Master(body.master_id), &body.endpoint)
        .await;
    Json(serde_json::json!({ "success": removed }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterQuery {
    master_id: String,
}

async fn master_settings(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<MasterQuery>,
) -> Json<Value> {
    let settings = state.push.settings(&Subscriber::Master(query.master_id)).await;
    Json(serde_json::to_value(settings).unwrap())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterSettingsPatch {
    master_id: String,
    #[serde(flatten)]
    patch: SettingsPatch,
}

async fn master_update_settings(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<MasterSettingsPatch>,
) -> Json<Value> {
    let settings = state
        .push
        .update_settings(&Subscriber::Master(body.master_id), body.patch)
        .await;
    Json(serde_json::to_value(settings).unwrap())
}

async fn master_send_test(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(query): Json<MasterQuery>,
) -> Json<Value> {
    let report = state
        .push
        .send(&Subscriber::Master(query.master_id), &test_payload())
        .await;
    Json(serde_json::json!({ "success": report.sent > 0, "report": report }))
}
