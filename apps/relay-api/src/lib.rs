pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod routes;
pub mod store;

use std::sync::Arc;

use bridge::BusBridge;
use config::Config;
use gateway::hub::EventHub;
use gateway::registry::ConnectionRegistry;
use notify::inbox::NotificationInbox;
use notify::push::PushDispatcher;
use notify::telegram::TelegramRelay;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Arc<EventHub>,
    pub bridge: Arc<BusBridge>,
    pub inbox: Arc<NotificationInbox>,
    pub push: Arc<PushDispatcher>,
    pub telegram: Arc<TelegramRelay>,
}
