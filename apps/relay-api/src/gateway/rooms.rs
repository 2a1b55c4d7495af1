//! Room names and the join access policy.
//!
//! Rooms are implicit string labels; membership lives on each connection.
//! Room kinds, by naming convention:
//! - `operators`, `directors`: role rooms, auto-joined at authentication;
//! - `city:<name>`: by-city broadcast targets, selected at publish time;
//! - `operator:<id>`, `master:<id>`, `user:<id>`, `order:<id>`: per-subject.

use crate::auth::claims::AuthedUser;

pub const ROOM_OPERATORS: &str = "operators";
pub const ROOM_DIRECTORS: &str = "directors";

const ROOM_MAX_LEN: usize = 100;

/// Per-subject room prefixes whose numeric suffix is an identity: joining one
/// for a different subject requires the director role.
const IDENTITY_PREFIXES: [&str; 3] = ["operator:", "master:", "user:"];

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRefusal {
    InvalidName,
    DirectorsOnly,
    NotOwnSubject,
}

impl JoinRefusal {
    pub fn message(&self) -> &'static str {
        match self {
            JoinRefusal::InvalidName => "invalid room name",
            JoinRefusal::DirectorsOnly => "directors room requires the director role",
            JoinRefusal::NotOwnSubject => "cannot join another user's room",
        }
    }
}

/// Room names are ASCII `[A-Za-z0-9:_-]`, length 1–100. Non-Latin letters are
/// rejected; callers transliterate city names before publishing.
pub fn is_valid_room_name(name: &str) -> bool {
    if name.is_empty() || name.len() > ROOM_MAX_LEN {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-')
}

/// Check whether `user` may join `room` explicitly.
pub fn check_join(user: &AuthedUser, room: &str) -> Result<(), JoinRefusal> {
    if !is_valid_room_name(room) {
        return Err(JoinRefusal::InvalidName);
    }

    if room == ROOM_DIRECTORS && !user.role.may_join_directors() {
        return Err(JoinRefusal::DirectorsOnly);
    }

    for prefix in IDENTITY_PREFIXES {
        if let Some(suffix) = room.strip_prefix(prefix) {
            let own = suffix.parse::<i64>().map(|id| id == user.user_id);
            if own != Ok(true) && !user.role.may_act_as_director() {
                return Err(JoinRefusal::NotOwnSubject);
            }
        }
    }

    // `order:<id>` and role rooms other than `directors` are open to any
    // authenticated user.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Role;

    fn user(user_id: i64, role: &str) -> AuthedUser {
        AuthedUser {
            user_id,
            role: Role::new(role),
        }
    }

    #[test]
    fn accepts_plain_ascii_names() {
        assert!(is_valid_room_name("operators"));
        assert!(is_valid_room_name("city:Saratov"));
        assert!(is_valid_room_name("operator:7"));
        assert!(is_valid_room_name("a_b-c:42"));
    }

    #[test]
    fn rejects_non_latin_and_oversized_names() {
        assert!(!is_valid_room_name(""));
        assert!(!is_valid_room_name("city:Нск"));
        assert!(!is_valid_room_name("room with spaces"));
        assert!(!is_valid_room_name(&"r".repeat(101)));
    }

    #[test]
    fn directors_room_requires_director_role() {
        assert_eq!(
            check_join(&user(1, "operator"), "directors"),
            Err(JoinRefusal::DirectorsOnly)
        );
        assert!(check_join(&user(1, "director"), "directors").is_ok());
    }

    #[test]
    fn operators_room_is_open() {
        assert!(check_join(&user(1, "master"), "operators").is_ok());
    }

    #[test]
    fn own_subject_room_is_allowed() {
        assert!(check_join(&user(7, "operator"), "operator:7").is_ok());
        assert!(check_join(&user(7, "operator"), "user:7").is_ok());
    }

    #[test]
    fn foreign_subject_room_requires_director() {
        assert_eq!(
            check_join(&user(7, "operator"), "operator:8"),
            Err(JoinRefusal::NotOwnSubject)
        );
        assert!(check_join(&user(7, "director"), "operator:8").is_ok());
    }

    #[test]
    fn non_numeric_subject_requires_director() {
        assert_eq!(
            check_join(&user(7, "operator"), "master:abc"),
            Err(JoinRefusal::NotOwnSubject)
        );
    }

    #[test]
    fn order_rooms_are_not_identity_restricted() {
        assert!(check_join(&user(7, "operator"), "order:991").is_ok());
    }
}
