//! User-token verification and the role capability model.
//!
//! Tokens are minted by an external identity service; this module only
//! verifies the HMAC signature and extracts the `{userId, role}` claim pair.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Why a presented token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Missing,
    Expired,
    Invalid,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "no token provided"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::Invalid => write!(f, "invalid token"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(rename = "userId")]
    user_id: i64,
    role: String,
}

/// The verified identity behind a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthedUser {
    pub user_id: i64,
    pub role: Role,
}

/// Verify a compact signed claim and extract the user identity.
pub fn verify_token(secret: &str, token: &str) -> Result<AuthedUser, TokenError> {
    if token.is_empty() {
        return Err(TokenError::Missing);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    let data = jsonwebtoken::decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    })?;

    Ok(AuthedUser {
        user_id: data.claims.user_id,
        role: Role::new(&data.claims.role),
    })
}

/// A user role, normalized to lower case, with capability predicates.
///
/// Roles are open-ended strings; only a handful carry extra capabilities or
/// group-room membership, looked up in the table below.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Role(String);

impl Role {
    pub fn new(raw: &str) -> Self {
        Self(raw.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_director(&self) -> bool {
        self.0 == "director"
    }

    pub fn is_operator(&self) -> bool {
        self.0 == "operator" || self.0 == "callcentre_operator"
    }

    /// Directors may join any per-subject room and the `directors` room.
    pub fn may_act_as_director(&self) -> bool {
        self.is_director()
    }

    pub fn may_join_directors(&self) -> bool {
        self.is_director()
    }

    /// Rooms auto-joined at authentication: the role's own room plus its
    /// group room, if any.
    pub fn auto_rooms(&self) -> Vec<String> {
        let mut rooms = vec![self.0.clone()];
        if self.is_operator() {
            rooms.push("operators".to_string());
        } else if self.is_director() {
            rooms.push("directors".to_string());
        }
        rooms
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &str = "test-secret-test-secret-test-secret!";

    #[derive(Serialize)]
    struct MintClaims {
        #[serde(rename = "userId")]
        user_id: i64,
        role: String,
        exp: i64,
    }

    fn mint(user_id: i64, role: &str, exp_offset_secs: i64) -> String {
        let claims = MintClaims {
            user_id,
            role: role.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn verify_valid_token() {
        let token = mint(7, "operator", 3600);
        let user = verify_token(SECRET, &token).unwrap();
        assert_eq!(user.user_id, 7);
        assert_eq!(user.role.as_str(), "operator");
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = mint(7, "operator", 3600);
        assert_eq!(
            verify_token("another-secret-another-secret-yes!", &token),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn verify_rejects_expired_token() {
        let token = mint(7, "operator", -3600);
        assert_eq!(verify_token(SECRET, &token), Err(TokenError::Expired));
    }

    #[test]
    fn verify_rejects_empty_token() {
        assert_eq!(verify_token(SECRET, ""), Err(TokenError::Missing));
    }

    #[test]
    fn verify_rejects_garbage() {
        assert_eq!(verify_token(SECRET, "not.a.jwt"), Err(TokenError::Invalid));
    }

    #[test]
    fn role_is_normalized_to_lowercase() {
        assert_eq!(Role::new("Director").as_str(), "director");
    }

    #[test]
    fn operator_auto_rooms() {
        assert_eq!(Role::new("operator").auto_rooms(), vec!["operator", "operators"]);
        assert_eq!(
            Role::new("callcentre_operator").auto_rooms(),
            vec!["callcentre_operator", "operators"]
        );
    }

    #[test]
    fn director_auto_rooms() {
        assert_eq!(Role::new("director").auto_rooms(), vec!["director", "directors"]);
    }

    #[test]
    fn other_roles_join_only_their_own_room() {
        assert_eq!(Role::new("master").auto_rooms(), vec!["master"]);
    }
}
