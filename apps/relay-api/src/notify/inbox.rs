//! Durable per-user notification inbox.
//!
//! Storage shape: one sorted set per user holding JSON-encoded notifications
//! ranked by creation time (ms epoch), plus a separate unread counter so the
//! count never needs a full scan. Store failures degrade to empty results;
//! the socket path keeps working without the inbox.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::events::EventName;
use crate::gateway::hub::EventHub;
use crate::store::Store;

/// Inbox retention: bounded length, trimmed by oldest.
pub const INBOX_MAX: usize = 50;

/// Inbox TTL, refreshed on every write.
pub const INBOX_TTL_SECS: u64 = 24 * 60 * 60;

fn inbox_key(user_id: i64) -> String {
    format!("ui:notifications:{user_id}")
}

fn unread_key(user_id: i64) -> String {
    format!("ui:notifications:unread:{user_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub data: Option<Value>,
}

pub struct NotificationInbox {
    store: Arc<dyn Store>,
    hub: Arc<EventHub>,
}

impl NotificationInbox {
    pub fn new(store: Arc<dyn Store>, hub: Arc<EventHub>) -> Self {
        Self { store, hub }
    }

    /// Write a notification, trim overflow, bump the unread counter, and
    /// push `notification:new` to the owner's sockets.
    pub async fn create(&self, user_id: i64, input: NewNotification) -> Option<Notification> {
        let created_at = Utc::now();
        let notification = Notification {
            id: opsrelay_common::notification_id(),
            kind: input.kind,
            title: input.title,
            message: input.message,
            order_id: input.order_id,
            data: input.data,
            read: false,
            created_at,
        };

        let key = inbox_key(user_id);
        let member = serde_json::to_string(&notification).unwrap();
        let rank = created_at.timestamp_millis();

        let stored: Result<(), crate::store::StoreError> = async {
            self.store.zadd(&key, &member, rank).await?;
            self.store.expire(&key, INBOX_TTL_SECS).await?;

            let card = self.store.zcard(&key).await?;
            if card > INBOX_MAX {
                self.store.zremrange_lowest(&key, card - INBOX_MAX).await?;
            }

            // The counter is not trimmed by capacity.
            self.store.incr(&unread_key(user_id)).await?;
            self.store.expire(&unread_key(user_id), INBOX_TTL_SECS).await?;
            Ok(())
        }
        .await;

        if let Err(e) = stored {
            tracing::warn!(%e, user_id, "inbox write failed, notification not persisted");
            return None;
        }

        self.hub.send_to_user(
            user_id,
            EventName::NOTIFICATION_NEW,
            serde_json::to_value(&notification).unwrap(),
        );
        Some(notification)
    }

    /// Newest-first page of the inbox. Undecodable entries are skipped.
    pub async fn list(&self, user_id: i64, limit: usize, offset: usize) -> Vec<Notification> {
        let members = match self.store.zrevrange(&inbox_key(user_id), offset, limit).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(%e, user_id, "inbox list failed");
                return Vec::new();
            }
        };
        members
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect()
    }

    pub async fn unread_count(&self, user_id: i64) -> i64 {
        match self.store.get(&unread_key(user_id)).await {
            Ok(Some(v)) => v.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(%e, user_id, "unread count read failed");
                0
            }
        }
    }

    /// Mark one notification read. Idempotent: a second call is a no-op.
    /// Returns whether the notification exists.
    pub async fn mark_read(&self, user_id: i64, notification_id: &str) -> bool {
        let key = inbox_key(user_id);
        let entries = match self.store.zrange_withscores(&key).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(%e, user_id, "inbox read failed");
                return false;
            }
        };

        let Some((member, rank, notification)) = find_by_id(&entries, notification_id) else {
            return false;
        };

        if notification.read {
            return true;
        }

        let mut updated = notification;
        updated.read = true;
        let result: Result<(), crate::store::StoreError> = async {
            // Remove-then-reinsert at the same rank keeps the ordering.
            self.store.zrem(&key, &member).await?;
            self.store
                .zadd(&key, &serde_json::to_string(&updated).unwrap(), rank)
                .await?;
            self.store.decr_floor(&unread_key(user_id)).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(%e, user_id, "mark-read failed");
            return false;
        }

        self.hub.send_to_user(
            user_id,
            EventName::NOTIFICATION_READ,
            serde_json::json!({ "notificationId": notification_id }),
        );
        true
    }

    /// Mark every entry read and zero the counter.
    pub async fn mark_all_read(&self, user_id: i64) {
        let key = inbox_key(user_id);
        let entries = match self.store.zrange_withscores(&key).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(%e, user_id, "inbox read failed");
                return;
            }
        };

        let result: Result<(), crate::store::StoreError> = async {
            self.store.del(&key).await?;
            for (member, rank) in &entries {
                let Ok(mut notification) = serde_json::from_str::<Notification>(member) else {
                    continue;
                };
                notification.read = true;
                self.store
                    .zadd(&key, &serde_json::to_string(&notification).unwrap(), *rank)
                    .await?;
            }
            if !entries.is_empty() {
                self.store.expire(&key, INBOX_TTL_SECS).await?;
            }
            self.store.set(&unread_key(user_id), "0").await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(%e, user_id, "mark-all-read failed");
            return;
        }

        self.hub
            .send_to_user(user_id, EventName::NOTIFICATION_ALL_READ, serde_json::json!({}));
    }

    /// Remove one notification. No socket event.
    pub async fn delete(&self, user_id: i64, notification_id: &str) -> bool {
        let key = inbox_key(user_id);
        let entries = match self.store.zrange_withscores(&key).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(%e, user_id, "inbox read failed");
                return false;
            }
        };

        let Some((member, _, notification)) = find_by_id(&entries, notification_id) else {
            return false;
        };

        let result: Result<(), crate::store::StoreError> = async {
            self.store.zrem(&key, &member).await?;
            if !notification.read {
                self.store.decr_floor(&unread_key(user_id)).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(%e, user_id, "delete failed");
            return false;
        }
        true
    }

    /// Drop the whole inbox and its counter.
    pub async fn clear(&self, user_id: i64) {
        let result: Result<(), crate::store::StoreError> = async {
            self.store.del(&inbox_key(user_id)).await?;
            self.store.del(&unread_key(user_id)).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(%e, user_id, "clear failed");
            return;
        }

        self.hub
            .send_to_user(user_id, EventName::NOTIFICATION_CLEARED, serde_json::json!({}));
    }
}

fn find_by_id(
    entries: &[(String, i64)],
    notification_id: &str,
) -> Option<(String, i64, Notification)> {
    entries.iter().find_map(|(member, rank)| {
        let notification = serde_json::from_str::<Notification>(member).ok()?;
        (notification.id == notification_id).then(|| (member.clone(), *rank, notification))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BusBridge;
    use crate::gateway::registry::ConnectionRegistry;
    use crate::store::MemoryStore;

    fn inbox() -> NotificationInbox {
        let registry = Arc::new(ConnectionRegistry::new());
        let bridge = BusBridge::disabled("test".to_string());
        let hub = Arc::new(EventHub::new(registry, bridge));
        NotificationInbox::new(Arc::new(MemoryStore::new()), hub)
    }

    fn input(title: &str) -> NewNotification {
        NewNotification {
            kind: "order_update".to_string(),
            title: title.to_string(),
            message: "msg".to_string(),
            order_id: None,
            data: None,
        }
    }

    #[tokio::test]
    async fn create_and_list_newest_first() {
        let inbox = inbox();
        for i in 0..3 {
            inbox.create(9, input(&format!("n{i}"))).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let listed = inbox.list(9, 10, 0).await;
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].title, "n2");
        assert_eq!(listed[2].title, "n0");
        assert_eq!(inbox.unread_count(9).await, 3);
    }

    #[tokio::test]
    async fn list_respects_limit_and_offset() {
        let inbox = inbox();
        for i in 0..5 {
            inbox.create(9, input(&format!("n{i}"))).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let page = inbox.list(9, 2, 1).await;
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].title, "n3");
        assert_eq!(page[1].title, "n2");
    }

    #[tokio::test]
    async fn overflow_trims_oldest_but_not_the_counter() {
        let inbox = inbox();
        for i in 0..(INBOX_MAX + 1) {
            inbox.create(9, input(&format!("n{i}"))).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let listed = inbox.list(9, INBOX_MAX + 10, 0).await;
        assert_eq!(listed.len(), INBOX_MAX);
        // The earliest entry is gone.
        assert!(listed.iter().all(|n| n.title != "n0"));
        // The counter counts creates, not capacity.
        assert_eq!(inbox.unread_count(9).await, (INBOX_MAX + 1) as i64);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let inbox = inbox();
        let n = inbox.create(9, input("a")).await.unwrap();
        inbox.create(9, input("b")).await.unwrap();

        assert!(inbox.mark_read(9, &n.id).await);
        assert_eq!(inbox.unread_count(9).await, 1);

        // Second call changes nothing.
        assert!(inbox.mark_read(9, &n.id).await);
        assert_eq!(inbox.unread_count(9).await, 1);

        let listed = inbox.list(9, 10, 0).await;
        let read_entry = listed.iter().find(|e| e.id == n.id).unwrap();
        assert!(read_entry.read);
    }

    #[tokio::test]
    async fn mark_read_unknown_id_returns_false() {
        let inbox = inbox();
        inbox.create(9, input("a")).await.unwrap();
        assert!(!inbox.mark_read(9, "ntf_missing").await);
        assert_eq!(inbox.unread_count(9).await, 1);
    }

    #[tokio::test]
    async fn mark_all_read_zeroes_counter_and_flags_entries() {
        let inbox = inbox();
        for i in 0..4 {
            inbox.create(9, input(&format!("n{i}"))).await.unwrap();
        }

        inbox.mark_all_read(9).await;

        assert_eq!(inbox.unread_count(9).await, 0);
        let listed = inbox.list(9, 10, 0).await;
        assert_eq!(listed.len(), 4);
        assert!(listed.iter().all(|n| n.read));
    }

    #[tokio::test]
    async fn delete_unread_decrements_counter() {
        let inbox = inbox();
        let n = inbox.create(9, input("a")).await.unwrap();
        inbox.create(9, input("b")).await.unwrap();

        assert!(inbox.delete(9, &n.id).await);
        assert_eq!(inbox.unread_count(9).await, 1);
        assert_eq!(inbox.list(9, 10, 0).await.len(), 1);
    }

    #[tokio::test]
    async fn delete_read_entry_keeps_counter() {
        let inbox = inbox();
        let n = inbox.create(9, input("a")).await.unwrap();
        inbox.create(9, input("b")).await.unwrap();
        inbox.mark_read(9, &n.id).await;

        assert!(inbox.delete(9, &n.id).await);
        assert_eq!(inbox.unread_count(9).await, 1);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let inbox = inbox();
        inbox.create(9, input("a")).await.unwrap();
        inbox.clear(9).await;

        assert!(inbox.list(9, 10, 0).await.is_empty());
        assert_eq!(inbox.unread_count(9).await, 0);
    }

    #[tokio::test]
    async fn list_skips_undecodable_entries() {
        let inbox = inbox();
        inbox.create(9, input("a")).await.unwrap();
        inbox
            .store
            .zadd(&inbox_key(9), "not json", 1)
            .await
            .unwrap();

        let listed = inbox.list(9, 10, 0).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "a");
    }

    #[tokio::test]
    async fn notifications_serialize_with_camel_case_wire_names() {
        let inbox = inbox();
        let n = inbox
            .create(
                9,
                NewNotification {
                    kind: "order_update".to_string(),
                    title: "t".to_string(),
                    message: "m".to_string(),
                    order_id: Some(42),
                    data: None,
                },
            )
            .await
            .unwrap();

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "order_update");
        assert_eq!(json["orderId"], 42);
        assert!(json["createdAt"].is_string());
        assert!(json.get("data").is_none());
    }
}
