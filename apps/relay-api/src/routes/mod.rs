pub mod broadcast;
pub mod notifications;
pub mod push;
pub mod stats;

use axum::Router;

use crate::gateway::server;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().merge(server::router()).nest(
        "/api/v1",
        broadcast::router()
            .merge(notifications::router())
            .merge(push::router())
            .merge(stats::router()),
    )
}
