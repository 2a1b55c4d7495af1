use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderValue;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::bridge::{self, BusBridge};
use relay_api::config::Config;
use relay_api::gateway::hub::EventHub;
use relay_api::gateway::registry::ConnectionRegistry;
use relay_api::gateway::server::{emit_presence, SWEEP_INTERVAL};
use relay_api::notify::inbox::NotificationInbox;
use relay_api::notify::push::{DisabledTransport, PushDispatcher, PushTransport, VapidTransport};
use relay_api::notify::telegram::TelegramRelay;
use relay_api::store::{MemoryStore, RedisStore, Store};
use relay_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;
    let instance_id = bridge::generate_instance_id();

    // Durable store: Redis when configured, else in-memory (inbox and push
    // state then live only as long as the process).
    let store: Arc<dyn Store> = match &config.redis {
        Some(redis_config) => match RedisStore::connect(redis_config).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(%e, "redis store unavailable, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            tracing::warn!("redis not configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let registry = Arc::new(ConnectionRegistry::new());

    // Cross-instance bus. Without Redis the bridge is a no-op and the
    // service runs in single-instance mode.
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let bus = match config.redis.clone() {
        Some(redis_config) => BusBridge::connect(instance_id.clone(), redis_config, inbound_tx),
        None => BusBridge::disabled(instance_id.clone()),
    };

    let hub = Arc::new(EventHub::new(registry.clone(), bus.clone()));

    // Re-emit envelopes arriving from peer instances.
    let remote_hub = hub.clone();
    tokio::spawn(async move {
        while let Some(envelope) = inbound_rx.recv().await {
            remote_hub.handle_remote(envelope);
        }
    });

    let push_transport: Arc<dyn PushTransport> = match config.vapid.clone() {
        Some(vapid) => Arc::new(VapidTransport::new(vapid)),
        None => {
            tracing::warn!("VAPID keys not configured, web push disabled");
            Arc::new(DisabledTransport)
        }
    };

    let telegram = TelegramRelay::new(config.telegram.clone());
    let state = AppState {
        config: Arc::new(config),
        registry: registry.clone(),
        hub: hub.clone(),
        bridge: bus.clone(),
        inbox: Arc::new(NotificationInbox::new(store.clone(), hub.clone())),
        push: Arc::new(PushDispatcher::new(store, push_transport)),
        telegram: Arc::new(telegram),
    };

    tracing::info!(%instance_id, "relay-api configured");

    // Reap sockets whose stack never delivered a disconnect callback.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = sweep_state.registry.sweep();
            if !removed.is_empty() {
                tracing::debug!(removed = removed.len(), "swept dead sockets");
            }
            for conn in removed {
                if let Some(user) = conn.user {
                    emit_presence(&sweep_state, &user, false).await;
                }
            }
        }
    });

    let cors = if state.config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = relay_api::routes::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "relay-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    // Dropping the serve future on shutdown closes the listener and every
    // live socket; clients see a transport-level close with no more frames.
    tokio::select! {
        result = axum::serve(listener, app) => {
            result.expect("server error");
        }
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
            bus.shutdown().await;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
