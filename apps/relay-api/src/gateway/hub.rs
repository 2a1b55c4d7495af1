//! Fan-out operations: local emit plus cross-instance propagation.

use std::sync::Arc;

use serde_json::Value;

use crate::bridge::{BusBridge, Envelope};

use super::events::ServerFrame;
use super::registry::{ConnectionRegistry, FrameSender};

/// The broadcast surface used by webhook ingress, the notification service,
/// and the socket handlers themselves.
pub struct EventHub {
    registry: Arc<ConnectionRegistry>,
    bridge: Arc<BusBridge>,
}

impl EventHub {
    pub fn new(registry: Arc<ConnectionRegistry>, bridge: Arc<BusBridge>) -> Self {
        Self { registry, bridge }
    }

    /// Emit to every local socket in `room`, then propagate to peer
    /// instances. Peers re-emit to their own members of `room`.
    pub async fn broadcast_to_room(&self, room: &str, event: &str, data: Value) {
        emit(self.registry.room_senders(room), event, &data);
        self.bridge
            .publish(event, data, Some(room.to_string()))
            .await;
    }

    /// Emit to every local authenticated socket, then propagate. Receivers
    /// drop our own echo by origin id, so each socket sees one copy.
    pub async fn broadcast_to_all(&self, event: &str, data: Value) {
        emit(self.registry.all_senders(), event, &data);
        self.bridge.publish(event, data, None).await;
    }

    /// Emit to all sockets of one user. Local-only by design: the durable
    /// inbox is the cross-instance recovery path for per-user delivery.
    pub fn send_to_user(&self, user_id: i64, event: &str, data: Value) -> usize {
        let senders = self.registry.user_senders(user_id);
        let delivered = senders.len();
        emit(senders, event, &data);
        delivered
    }

    /// Re-emit an envelope received from a peer instance.
    pub fn handle_remote(&self, envelope: Envelope) {
        let senders = match &envelope.room {
            Some(room) => self.registry.room_senders(room),
            None => self.registry.all_senders(),
        };
        emit(senders, &envelope.event, &envelope.data);
    }
}

fn emit(senders: Vec<FrameSender>, event: &str, data: &Value) {
    for sender in senders {
        // A closed receiver means the socket task is gone; the sweep will
        // reap the registry entry.
        let _ = sender.send(ServerFrame::new(event, data.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{AuthedUser, Role};
    use crate::bridge::BusBridge;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn hub() -> (EventHub, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let bridge = BusBridge::disabled("test-instance".to_string());
        (EventHub::new(registry.clone(), bridge), registry)
    }

    fn connect_user(
        registry: &ConnectionRegistry,
        socket_id: &str,
        user_id: i64,
        rooms: &[&str],
    ) -> UnboundedReceiver<ServerFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.insert_pending(socket_id, tx);
        registry.authenticate(
            socket_id,
            AuthedUser {
                user_id,
                role: Role::new("operator"),
            },
            rooms.iter().map(|r| r.to_string()).collect(),
        );
        rx
    }

    #[tokio::test]
    async fn room_broadcast_reaches_only_members() {
        let (hub, registry) = hub();
        let mut in_room = connect_user(&registry, "s1", 1, &["operators"]);
        let mut outside = connect_user(&registry, "s2", 2, &["directors"]);

        hub.broadcast_to_room("operators", "call:new", serde_json::json!({ "id": 42 }))
            .await;

        let frame = in_room.recv().await.unwrap();
        assert_eq!(frame.event, "call:new");
        assert_eq!(frame.data["id"], 42);
        assert!(outside.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_all_skips_pending_sockets() {
        let (hub, registry) = hub();
        let mut authed = connect_user(&registry, "s1", 1, &[]);

        let (tx, mut pending) = mpsc::unbounded_channel();
        registry.insert_pending("s2", tx);

        hub.broadcast_to_all("avito-notification", serde_json::json!({}))
            .await;

        assert!(authed.recv().await.is_some());
        assert!(pending.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_socket_of_that_user() {
        let (hub, registry) = hub();
        let mut first = connect_user(&registry, "s1", 7, &[]);
        let mut second = connect_user(&registry, "s2", 7, &[]);
        let mut other = connect_user(&registry, "s3", 8, &[]);

        let delivered = hub.send_to_user(7, "notification:new", serde_json::json!({ "id": "n1" }));

        assert_eq!(delivered, 2);
        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_envelope_routes_by_room() {
        let (hub, registry) = hub();
        let mut member = connect_user(&registry, "s1", 1, &["city:Omsk"]);
        let mut outsider = connect_user(&registry, "s2", 2, &[]);

        hub.handle_remote(Envelope {
            event: "order:new".to_string(),
            data: serde_json::json!({ "id": 9 }),
            room: Some("city:Omsk".to_string()),
            origin_instance_id: "peer".to_string(),
        });

        assert_eq!(member.try_recv().unwrap().event, "order:new");
        assert!(outsider.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_envelope_without_room_reaches_all_authenticated() {
        let (hub, registry) = hub();
        let mut a = connect_user(&registry, "s1", 1, &[]);
        let mut b = connect_user(&registry, "s2", 2, &[]);

        hub.handle_remote(Envelope {
            event: "avito-new-message".to_string(),
            data: serde_json::json!({}),
            room: None,
            origin_instance_id: "peer".to_string(),
        });

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }
}
