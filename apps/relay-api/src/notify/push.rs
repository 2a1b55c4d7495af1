//! Web Push subscriptions, preferences, and delivery.
//!
//! Subscriptions are held per subscriber as a hash field map keyed by a short
//! digest of the vendor endpoint URL, bounded to [`MAX_DEVICES`] with the
//! oldest-entered evicted. Delivery goes through [`PushTransport`] so tests
//! and the real VAPID-signed vendor calls share one dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::VapidConfig;
use crate::store::Store;

/// Subscription cap per subscriber (multi-device support).
pub const MAX_DEVICES: usize = 5;

// ---------------------------------------------------------------------------
// Data shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A browser push subscription as handed over by the client, plus the entry
/// timestamp used for oldest-first eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    #[serde(default)]
    pub added_at: i64,
}

/// Stored preferences. `enabled` is derived from subscription presence and
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPreferences {
    call_incoming: bool,
    call_missed: bool,
}

impl Default for StoredPreferences {
    fn default() -> Self {
        Self {
            call_incoming: true,
            call_missed: true,
        }
    }
}

/// Preference view returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSettings {
    pub enabled: bool,
    pub call_incoming: bool,
    pub call_missed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub call_incoming: Option<bool>,
    pub call_missed: Option<bool>,
}

/// Payload serialized to the push vendor.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Identity namespace for subscription storage. Masters live in a separate
/// key space because their ids come from an external system.
#[derive(Debug, Clone)]
pub enum Subscriber {
    User(i64),
    Master(String),
}

impl Subscriber {
    fn subscriptions_key(&self) -> String {
        match self {
            Subscriber::User(id) => format!("push:subscriptions:{id}"),
            Subscriber::Master(id) => format!("push:master:subscriptions:{id}"),
        }
    }

    fn preferences_key(&self) -> String {
        match self {
            Subscriber::User(id) => format!("push:preferences:{id}"),
            Subscriber::Master(id) => format!("push:master:preferences:{id}"),
        }
    }
}

/// Stable short digest of the vendor endpoint URL, used as the hash field.
fn endpoint_hash(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint.as_bytes());
    hex::encode(&digest[..8])
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The vendor reported the subscription permanently gone (404/410).
    Gone,
    Failed,
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, subscription: &PushSubscription, payload: &PushPayload)
        -> PushOutcome;
}

/// Transport used when no VAPID key pair is configured: every send fails
/// softly and nothing is pruned.
pub struct DisabledTransport;

#[async_trait]
impl PushTransport for DisabledTransport {
    async fn deliver(&self, _: &PushSubscription, _: &PushPayload) -> PushOutcome {
        PushOutcome::Failed
    }
}

#[derive(Serialize)]
struct VapidClaims {
    aud: String,
    exp: i64,
    sub: String,
}

/// VAPID-signed delivery to the vendor endpoints. The private key is the
/// ES256 signing key in PEM form.
pub struct VapidTransport {
    http: reqwest::Client,
    config: VapidConfig,
}

impl VapidTransport {
    pub fn new(config: VapidConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn authorization(&self, endpoint: &str) -> Option<String> {
        let url = reqwest::Url::parse(endpoint).ok()?;
        let aud = format!("{}://{}", url.scheme(), url.host_str()?);
        let claims = VapidClaims {
            aud,
            exp: Utc::now().timestamp() + 12 * 60 * 60,
            sub: self.config.subject.clone(),
        };
        let key = EncodingKey::from_ec_pem(self.config.private_key.as_bytes()).ok()?;
        let jwt = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &key).ok()?;
        Some(format!("vapid t={jwt}, k={}", self.config.public_key))
    }
}

#[async_trait]
impl PushTransport for VapidTransport {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> PushOutcome {
        let Some(authorization) = self.authorization(&subscription.endpoint) else {
            tracing::warn!(endpoint = %subscription.endpoint, "could not sign push request");
            return PushOutcome::Failed;
        };

        let response = self
            .http
            .post(&subscription.endpoint)
            .header("Authorization", authorization)
            .header("TTL", "86400")
            .json(payload)
            .send()
            .await;

        match response {
            Ok(resp) => match resp.status().as_u16() {
                404 | 410 => PushOutcome::Gone,
                code if (200..300).contains(&code) => PushOutcome::Delivered,
                code => {
                    tracing::warn!(code, endpoint = %subscription.endpoint, "push vendor error");
                    PushOutcome::Failed
                }
            },
            Err(e) => {
                tracing::warn!(?e, endpoint = %subscription.endpoint, "push request failed");
                PushOutcome::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Result of one fan-out to a subscriber's devices.
#[derive(Debug, Default, Serialize)]
pub struct SendReport {
    pub sent: usize,
    pub pruned: usize,
}

pub struct PushDispatcher {
    store: Arc<dyn Store>,
    transport: Arc<dyn PushTransport>,
}

impl PushDispatcher {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn PushTransport>) -> Self {
        Self { store, transport }
    }

    /// Store a subscription. Re-subscribing the same endpoint replaces the
    /// stored record; exceeding the device cap evicts the oldest-entered.
    pub async fn subscribe(&self, who: &Subscriber, mut subscription: PushSubscription) -> bool {
        let key = who.subscriptions_key();
        subscription.added_at = Utc::now().timestamp_millis();
        let field = endpoint_hash(&subscription.endpoint);
        let value = serde_json::to_string(&subscription).unwrap();

        let result: Result<(), crate::store::StoreError> = async {
            self.store.hset(&key, &field, &value).await?;
            while self.store.hlen(&key).await? > MAX_DEVICES {
                if let Some(oldest) = self.oldest_field(&key).await? {
                    self.store.hdel(&key, &oldest).await?;
                } else {
                    break;
                }
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%e, "push subscribe failed");
                false
            }
        }
    }

    async fn oldest_field(&self, key: &str) -> Result<Option<String>, crate::store::StoreError> {
        let entries = self.store.hgetall(key).await?;
        Ok(entries
            .iter()
            .filter_map(|(field, value)| {
                let sub: PushSubscription = serde_json::from_str(value).ok()?;
                Some((field.clone(), sub.added_at))
            })
            .min_by_key(|(_, added_at)| *added_at)
            .map(|(field, _)| field))
    }

    pub async fn unsubscribe(&self, who: &Subscriber, endpoint: &str) -> bool {
        match self
            .store
            .hdel(&who.subscriptions_key(), &endpoint_hash(endpoint))
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(%e, "push unsubscribe failed");
                false
            }
        }
    }

    pub async fn settings(&self, who: &Subscriber) -> PushSettings {
        let prefs = self.stored_preferences(who).await;
        let devices = self
            .store
            .hlen(&who.subscriptions_key())
            .await
            .unwrap_or(0);
        PushSettings {
            enabled: devices > 0,
            call_incoming: prefs.call_incoming,
            call_missed: prefs.call_missed,
        }
    }

    pub async fn update_settings(&self, who: &Subscriber, patch: SettingsPatch) -> PushSettings {
        let mut prefs = self.stored_preferences(who).await;
        if let Some(v) = patch.call_incoming {
            prefs.call_incoming = v;
        }
        if let Some(v) = patch.call_missed {
            prefs.call_missed = v;
        }
        let value = serde_json::to_string(&prefs).unwrap();
        if let Err(e) = self.store.set(&who.preferences_key(), &value).await {
            tracing::warn!(%e, "push preferences write failed");
        }
        self.settings(who).await
    }

    async fn stored_preferences(&self, who: &Subscriber) -> StoredPreferences {
        match self.store.get(&who.preferences_key()).await {
            Ok(Some(v)) => serde_json::from_str(&v).unwrap_or_default(),
            _ => StoredPreferences::default(),
        }
    }

    /// Deliver a payload to every device of `who`, pruning permanently-gone
    /// subscriptions. Preference gating applies per payload type:
    /// `call_incoming`/`call_missed` honor the matching preference, `test`
    /// bypasses checks, unknown types proceed.
    pub async fn send(&self, who: &Subscriber, payload: &PushPayload) -> SendReport {
        let kind = payload.kind.as_deref().unwrap_or("");
        if kind != "test" {
            let prefs = self.stored_preferences(who).await;
            let allowed = match kind {
                "call_incoming" => prefs.call_incoming,
                "call_missed" => prefs.call_missed,
                _ => true,
            };
            if !allowed {
                return SendReport::default();
            }
        }

        let key = who.subscriptions_key();
        let entries = match self.store.hgetall(&key).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(%e, "push subscription read failed");
                return SendReport::default();
            }
        };

        let mut report = SendReport::default();
        for (field, value) in entries {
            let Ok(subscription) = serde_json::from_str::<PushSubscription>(&value) else {
                continue;
            };
            match self.transport.deliver(&subscription, payload).await {
                PushOutcome::Delivered => report.sent += 1,
                PushOutcome::Gone => {
                    let _ = self.store.hdel(&key, &field).await;
                    report.pruned += 1;
                }
                PushOutcome::Failed => {}
            }
        }
        report
    }
}
