//! Wire identifiers for sockets and inbox notifications.
//!
//! Both are ULIDs behind a short kind tag. The tag makes log lines and store
//! keys greppable by kind; the ULID body makes ids of the same kind sort by
//! creation time, which matters for notifications (see [`notification_id`]).

use ulid::Ulid;

/// Id assigned to a live socket connection at accept time.
pub fn socket_id() -> String {
    tagged("sock")
}

/// Id for an inbox notification.
///
/// The inbox ranks entries by creation timestamp; two notifications written
/// in the same millisecond tie on rank, and the id is the stable tie-breaker.
/// ULIDs rise with creation time, so the tie-break preserves write order.
pub fn notification_id() -> String {
    tagged("ntf")
}

fn tagged(tag: &str) -> String {
    format!("{tag}_{}", Ulid::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_kind_tag() {
        assert!(socket_id().starts_with("sock_"));
        assert!(notification_id().starts_with("ntf_"));
    }

    #[test]
    fn notification_ids_rise_with_creation_time() {
        let earlier = notification_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = notification_id();
        assert_ne!(earlier, later);
        // Lexicographic order tracks creation order, the property the inbox
        // tie-break relies on.
        assert!(later > earlier);
    }

    #[test]
    fn kinds_do_not_collide_in_key_space() {
        assert!(!socket_id().starts_with("ntf_"));
        assert!(!notification_id().starts_with("sock_"));
    }
}
