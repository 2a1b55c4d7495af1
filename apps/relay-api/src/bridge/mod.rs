//! Cross-instance pub/sub bridge over Redis.
//!
//! Two bus connections are held: one for publishing and one subscribed to the
//! broadcast channel (a subscribed connection cannot issue other commands).
//! The bridge may run with the bus absent: every operation becomes a no-op
//! and the service keeps serving same-instance clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};

use crate::config::RedisConfig;
use crate::store;

/// The single bus channel carrying broadcast envelopes.
pub const CHANNEL: &str = "socket-broadcast";

/// After this many consecutive failures the tight backoff stops and
/// reconnect attempts drop to the slow cooldown.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Reconnect cadence once the failure budget is spent. Recovery keeps
/// running at this pace for the life of the process.
const RETRY_COOLDOWN: Duration = Duration::from_secs(30);

fn backoff(retry: u32) -> Duration {
    Duration::from_millis((100 * retry as u64).min(3_000))
}

/// Envelope exchanged on the bus and re-emitted to local sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub room: Option<String>,
    pub origin_instance_id: String,
}

/// Per-process identity used exclusively for self-echo suppression.
pub fn generate_instance_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    format!("{host}-{:08x}", rand::random::<u32>())
}

/// Decode a bus payload, dropping self-echoes.
///
/// Envelope construction and suppression both live here so the origin tag
/// can never be forgotten by a caller.
fn accept_payload(instance_id: &str, payload: &str) -> Option<Envelope> {
    match serde_json::from_str::<Envelope>(payload) {
        Ok(envelope) if envelope.origin_instance_id == instance_id => None,
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::warn!(?e, "undecodable bus envelope dropped");
            None
        }
    }
}

pub struct BusBridge {
    instance_id: String,
    publisher: Mutex<Option<ConnectionManager>>,
    degraded: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl BusBridge {
    /// A bridge with no bus: every publish is a no-op. Used when Redis is not
    /// configured, and by tests.
    pub fn disabled(instance_id: String) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            instance_id,
            publisher: Mutex::new(None),
            degraded: AtomicBool::new(true),
            shutdown_tx,
        })
    }

    /// Create the bridge and start connecting in the background.
    ///
    /// Envelopes received from peer instances (own echoes already dropped)
    /// are forwarded on `inbound_tx`. Until the bus is reachable the bridge
    /// reports degraded and publishes nothing.
    pub fn connect(
        instance_id: String,
        config: RedisConfig,
        inbound_tx: mpsc::UnboundedSender<Envelope>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bridge = Arc::new(Self {
            instance_id,
            publisher: Mutex::new(None),
            degraded: AtomicBool::new(true),
            shutdown_tx,
        });

        let setup = bridge.clone();
        tokio::spawn(async move {
            setup.run(config, inbound_tx, shutdown_rx).await;
        });

        bridge
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Publish a broadcast envelope tagged with this instance's origin id.
    /// No-op while the bus is unreachable.
    pub async fn publish(&self, event: &str, data: Value, room: Option<String>) {
        let envelope = Envelope {
            event: event.to_string(),
            data,
            room,
            origin_instance_id: self.instance_id.clone(),
        };

        let mut guard = self.publisher.lock().await;
        let Some(conn) = guard.as_mut() else {
            return;
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(?e, "failed to encode bus envelope");
                return;
            }
        };
        if let Err(e) = conn.publish::<_, _, ()>(CHANNEL, payload).await {
            tracing::warn!(?e, "bus publish failed");
        }
    }

    /// Unsubscribe and stop the background tasks. Called on graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        *self.publisher.lock().await = None;
        self.degraded.store(true, Ordering::Relaxed);
    }

    async fn run(
        self: Arc<Self>,
        config: RedisConfig,
        inbound_tx: mpsc::UnboundedSender<Envelope>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut failures = 0u32;
        let mut outage_reported = false;

        loop {
            if *shutdown_rx.borrow() {
                return;
            }

            let delay = match self.connect_once(&config, &inbound_tx, &mut shutdown_rx).await {
                SessionEnd::Shutdown => return,
                SessionEnd::NeverConnected => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        // The outage is logged once; reconnects continue at
                        // the cooldown pace so the bridge comes back when the
                        // bus does.
                        if !outage_reported {
                            tracing::error!(
                                attempts = failures,
                                "bus unreachable, running single-instance until it returns"
                            );
                            outage_reported = true;
                        }
                        RETRY_COOLDOWN
                    } else {
                        backoff(failures)
                    }
                }
                SessionEnd::Lost => {
                    // A completed session resets the failure budget.
                    failures = 1;
                    outage_reported = false;
                    *self.publisher.lock().await = None;
                    self.degraded.store(true, Ordering::Relaxed);
                    tracing::warn!("bus connection lost, reconnecting");
                    backoff(failures)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => return,
            }
        }
    }

    /// One bus session: connect both halves, then pump messages until the
    /// connection drops or shutdown is requested.
    async fn connect_once(
        &self,
        config: &RedisConfig,
        inbound_tx: &mpsc::UnboundedSender<Envelope>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let url = match store::redis::resolve_url(config).await {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(%e, "bus primary resolution failed");
                return SessionEnd::NeverConnected;
            }
        };

        let client = match redis::Client::open(url) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(?e, "bad bus url");
                return SessionEnd::NeverConnected;
            }
        };

        let publisher = match ConnectionManager::new(client.clone()).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(?e, "bus publisher connect failed");
                return SessionEnd::NeverConnected;
            }
        };

        let mut pubsub = match client.get_async_pubsub().await {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(?e, "bus subscriber connect failed");
                return SessionEnd::NeverConnected;
            }
        };
        if let Err(e) = pubsub.subscribe(CHANNEL).await {
            tracing::debug!(?e, "bus subscribe failed");
            return SessionEnd::NeverConnected;
        }

        *self.publisher.lock().await = Some(publisher);
        self.degraded.store(false, Ordering::Relaxed);
        tracing::info!(instance_id = %self.instance_id, "bus bridge connected");

        let end = {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break SessionEnd::Shutdown,
                    msg = stream.next() => {
                        let Some(msg) = msg else { break SessionEnd::Lost };
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::warn!(?e, "non-text bus payload dropped");
                                continue;
                            }
                        };
                        if let Some(envelope) = accept_payload(&self.instance_id, &payload) {
                            if inbound_tx.send(envelope).is_err() {
                                break SessionEnd::Shutdown;
                            }
                        }
                    }
                }
            }
        };

        if matches!(end, SessionEnd::Shutdown) {
            let _ = pubsub.unsubscribe(CHANNEL).await;
        }
        end
    }
}

enum SessionEnd {
    /// Shutdown requested or the inbound consumer went away.
    Shutdown,
    /// The session never got both halves connected.
    NeverConnected,
    /// An established session dropped.
    Lost,
}
