//! Service health and registry statistics.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use crate::auth::middleware::AuthUser;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats/health", get(health))
        .route("/stats/connections", get(connections))
        .route("/stats/rooms", get(rooms))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "instanceId": state.bridge.instance_id(),
        "bus": if state.bridge.is_degraded() { "degraded" } else { "connected" },
    }))
}

async fn connections(AuthUser(_user): AuthUser, State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "total": state.registry.connection_count(),
        "authenticated": state.registry.authenticated_count(),
        "users": state.registry.user_count(),
    }))
}

async fn rooms(AuthUser(_user): AuthUser, State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({ "rooms": state.registry.room_counts() }))
}
