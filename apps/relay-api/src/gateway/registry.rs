//! Connection registry: socket arena plus a per-user secondary index.
//!
//! `by_user[u]` contains `s` iff `by_socket[s]` is authenticated as `u`. A
//! single lock guards both maps so the invariant holds under parallel accept,
//! authenticate, disconnect, sweep, and broadcast. Senders are cloned out
//! under the lock and written to after it is released.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::auth::claims::AuthedUser;

use super::events::ServerFrame;

pub type FrameSender = mpsc::UnboundedSender<ServerFrame>;

/// Connection lifecycle state.
///
/// The state is explicit rather than encoded in an optional user field so
/// that "never index or broadcast to a pending connection" is locally
/// checkable. The terminal state is removal from the registry.
#[derive(Debug)]
pub enum ConnState {
    Pending,
    Authenticated(AuthedUser),
}

struct Connection {
    state: ConnState,
    rooms: HashSet<String>,
    sender: FrameSender,
}

/// What was known about a connection at removal time, for presence events.
pub struct RemovedConn {
    pub socket_id: String,
    pub user: Option<AuthedUser>,
}

#[derive(Default)]
struct Inner {
    by_socket: HashMap<String, Connection>,
    by_user: HashMap<i64, HashSet<String>>,
}

pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a freshly accepted socket in the `Pending` state.
    pub fn insert_pending(&self, socket_id: &str, sender: FrameSender) {
        let mut inner = self.inner.write();
        inner.by_socket.insert(
            socket_id.to_string(),
            Connection {
                state: ConnState::Pending,
                rooms: HashSet::new(),
                sender,
            },
        );
    }

    /// Promote a pending socket to `Authenticated`, index it under the user,
    /// and install its auto-joined rooms.
    ///
    /// Returns `false` if the socket disappeared while the token was being
    /// verified (disconnect races the guard).
    pub fn authenticate(&self, socket_id: &str, user: AuthedUser, rooms: Vec<String>) -> bool {
        let mut inner = self.inner.write();
        let Some(conn) = inner.by_socket.get_mut(socket_id) else {
            return false;
        };
        conn.state = ConnState::Authenticated(user.clone());
        conn.rooms = rooms.into_iter().collect();
        inner
            .by_user
            .entry(user.user_id)
            .or_default()
            .insert(socket_id.to_string());
        true
    }

    /// Remove a socket, deleting its user-index entry when it was the last
    /// socket of that user.
    pub fn remove(&self, socket_id: &str) -> Option<RemovedConn> {
        let mut inner = self.inner.write();
        let conn = inner.by_socket.remove(socket_id)?;
        let user = match conn.state {
            ConnState::Authenticated(user) => {
                if let Some(ids) = inner.by_user.get_mut(&user.user_id) {
                    ids.remove(socket_id);
                    if ids.is_empty() {
                        inner.by_user.remove(&user.user_id);
                    }
                }
                Some(user)
            }
            ConnState::Pending => None,
        };
        Some(RemovedConn {
            socket_id: socket_id.to_string(),
            user,
        })
    }

    /// Add a room to an authenticated socket's membership set.
    pub fn join_room(&self, socket_id: &str, room: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.by_socket.get_mut(socket_id) {
            Some(conn) if matches!(conn.state, ConnState::Authenticated(_)) => {
                conn.rooms.insert(room.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn leave_room(&self, socket_id: &str, room: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.by_socket.get_mut(socket_id) {
            Some(conn) => conn.rooms.remove(room),
            None => false,
        }
    }

    pub fn rooms_of(&self, socket_id: &str) -> Option<Vec<String>> {
        let inner = self.inner.read();
        inner
            .by_socket
            .get(socket_id)
            .map(|c| c.rooms.iter().cloned().collect())
    }

    /// Senders of every authenticated socket in `room`.
    pub fn room_senders(&self, room: &str) -> Vec<FrameSender> {
        let inner = self.inner.read();
        inner
            .by_socket
            .values()
            .filter(|c| matches!(c.state, ConnState::Authenticated(_)) && c.rooms.contains(room))
            .map(|c| c.sender.clone())
            .collect()
    }

    /// Senders of every authenticated socket.
    pub fn all_senders(&self) -> Vec<FrameSender> {
        let inner = self.inner.read();
        inner
            .by_socket
            .values()
            .filter(|c| matches!(c.state, ConnState::Authenticated(_)))
            .map(|c| c.sender.clone())
            .collect()
    }

    /// Senders of all sockets held by `user_id`. O(1) index lookup.
    pub fn user_senders(&self, user_id: i64) -> Vec<FrameSender> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_user.get(&user_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.by_socket.get(id))
            .map(|c| c.sender.clone())
            .collect()
    }

    /// Reap sockets whose outbound channel is gone. Covers disconnect paths
    /// where the socket stack never delivered a close callback.
    pub fn sweep(&self) -> Vec<RemovedConn> {
        let orphans: Vec<String> = {
            let inner = self.inner.read();
            inner
                .by_socket
                .iter()
                .filter(|(_, c)| c.sender.is_closed())
                .map(|(id, _)| id.clone())
                .collect()
        };
        orphans.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().by_socket.len()
    }

    pub fn authenticated_count(&self) -> usize {
        let inner = self.inner.read();
        inner
            .by_socket
            .values()
            .filter(|c| matches!(c.state, ConnState::Authenticated(_)))
            .count()
    }

    pub fn user_count(&self) -> usize {
        self.inner.read().by_user.len()
    }

    /// Occupancy per room, for the stats surface.
    pub fn room_counts(&self) -> HashMap<String, usize> {
        let inner = self.inner.read();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for conn in inner.by_socket.values() {
            if matches!(conn.state, ConnState::Authenticated(_)) {
                for room in &conn.rooms {
                    *counts.entry(room.clone()).or_default() += 1;
                }
            }
        }
        counts
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Role;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn user(user_id: i64, role: &str) -> AuthedUser {
        AuthedUser {
            user_id,
            role: Role::new(role),
        }
    }

    fn add_pending(reg: &ConnectionRegistry, id: &str) -> UnboundedReceiver<ServerFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        reg.insert_pending(id, tx);
        rx
    }

    #[test]
    fn pending_sockets_are_not_indexed_and_receive_no_broadcasts() {
        let reg = ConnectionRegistry::new();
        let _rx = add_pending(&reg, "s1");

        assert_eq!(reg.connection_count(), 1);
        assert_eq!(reg.authenticated_count(), 0);
        assert!(reg.user_senders(7).is_empty());
        assert!(reg.all_senders().is_empty());
        assert!(reg.room_senders("operators").is_empty());
    }

    #[test]
    fn authenticate_indexes_socket_under_user() {
        let reg = ConnectionRegistry::new();
        let _rx = add_pending(&reg, "s1");

        assert!(reg.authenticate("s1", user(7, "operator"), vec!["operators".to_string()]));
        assert_eq!(reg.authenticated_count(), 1);
        assert_eq!(reg.user_senders(7).len(), 1);
        assert_eq!(reg.room_senders("operators").len(), 1);
    }

    #[test]
    fn authenticate_unknown_socket_returns_false() {
        let reg = ConnectionRegistry::new();
        assert!(!reg.authenticate("ghost", user(7, "operator"), vec![]));
        assert!(reg.user_senders(7).is_empty());
    }

    #[test]
    fn user_may_hold_multiple_sockets() {
        let reg = ConnectionRegistry::new();
        let _rx1 = add_pending(&reg, "s1");
        let _rx2 = add_pending(&reg, "s2");
        reg.authenticate("s1", user(7, "operator"), vec![]);
        reg.authenticate("s2", user(7, "operator"), vec![]);

        assert_eq!(reg.user_senders(7).len(), 2);
        assert_eq!(reg.user_count(), 1);

        reg.remove("s1");
        assert_eq!(reg.user_senders(7).len(), 1);

        reg.remove("s2");
        // Empty set implies absent key.
        assert_eq!(reg.user_count(), 0);
        assert!(reg.user_senders(7).is_empty());
    }

    #[test]
    fn remove_reports_the_authenticated_user() {
        let reg = ConnectionRegistry::new();
        let _rx = add_pending(&reg, "s1");
        reg.authenticate("s1", user(7, "director"), vec![]);

        let removed = reg.remove("s1").unwrap();
        assert_eq!(removed.user.unwrap().user_id, 7);
        assert!(reg.remove("s1").is_none());
    }

    #[test]
    fn remove_pending_reports_no_user() {
        let reg = ConnectionRegistry::new();
        let _rx = add_pending(&reg, "s1");
        let removed = reg.remove("s1").unwrap();
        assert!(removed.user.is_none());
    }

    #[test]
    fn join_and_leave_room_round_trip() {
        let reg = ConnectionRegistry::new();
        let _rx = add_pending(&reg, "s1");
        reg.authenticate("s1", user(7, "operator"), vec!["operators".to_string()]);

        let before = reg.rooms_of("s1").unwrap().len();
        assert!(reg.join_room("s1", "city:Omsk"));
        assert_eq!(reg.room_senders("city:Omsk").len(), 1);
        assert!(reg.leave_room("s1", "city:Omsk"));
        assert_eq!(reg.rooms_of("s1").unwrap().len(), before);
        assert!(reg.room_senders("city:Omsk").is_empty());
    }

    #[test]
    fn pending_socket_cannot_join_rooms() {
        let reg = ConnectionRegistry::new();
        let _rx = add_pending(&reg, "s1");
        assert!(!reg.join_room("s1", "operators"));
        assert!(reg.room_senders("operators").is_empty());
    }

    #[test]
    fn sweep_reaps_closed_senders() {
        let reg = ConnectionRegistry::new();
        let rx1 = add_pending(&reg, "s1");
        let _rx2 = add_pending(&reg, "s2");
        reg.authenticate("s1", user(7, "operator"), vec![]);
        reg.authenticate("s2", user(8, "operator"), vec![]);

        drop(rx1);
        let removed = reg.sweep();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].user.as_ref().unwrap().user_id, 7);
        assert_eq!(reg.connection_count(), 1);
        assert!(reg.user_senders(7).is_empty());
        assert_eq!(reg.user_senders(8).len(), 1);
    }

    #[test]
    fn room_counts_cover_only_authenticated_sockets() {
        let reg = ConnectionRegistry::new();
        let _rx1 = add_pending(&reg, "s1");
        let _rx2 = add_pending(&reg, "s2");
        reg.authenticate(
            "s1",
            user(7, "operator"),
            vec!["operator".to_string(), "operators".to_string()],
        );

        let counts = reg.room_counts();
        assert_eq!(counts.get("operators"), Some(&1));
        assert_eq!(counts.get("operator"), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}
