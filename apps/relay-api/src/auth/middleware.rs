//! End-user token extraction for HTTP routes.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::auth::claims::{self, AuthedUser};
use crate::auth::cookie;
use crate::error::ApiError;
use crate::AppState;

/// Authenticated user extracted from `Authorization: Bearer <token>` or the
/// `access_token` cookie.
///
/// Use as an Axum extractor in any handler that requires authentication:
///
/// ```ignore
/// async fn handler(AuthUser(user): AuthUser) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthedUser);

/// Rejection returned when the token is missing or invalid.
pub struct AuthRejection {
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(parts) {
            Some(t) => t,
            None => cookie_token(parts, &state.config.cookie_secret)?.ok_or(AuthRejection {
                message: "Missing access token",
            })?,
        };

        let user = claims::verify_token(&state.config.jwt_secret, &token).map_err(|_| {
            AuthRejection {
                message: "Invalid or expired token",
            }
        })?;

        Ok(AuthUser(user))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Cookie lookup. `Ok(None)` means no cookie was presented; a signature
/// failure is a hard rejection.
fn cookie_token(parts: &Parts, cookie_secret: &str) -> Result<Option<String>, AuthRejection> {
    let Some(header) = parts.headers.get(COOKIE).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    let Some(raw) = cookie::find_access_token(header) else {
        return Ok(None);
    };
    cookie::verify_cookie_value(cookie_secret, &raw)
        .map(Some)
        .map_err(|_| AuthRejection {
            message: "Invalid cookie signature",
        })
}

/// Validate the shared webhook secret carried in a publish body.
///
/// The comparison is constant-time and the submitted value is never echoed.
pub fn require_webhook_token(state: &AppState, provided: Option<&str>) -> Result<(), ApiError> {
    let provided = provided.ok_or_else(|| ApiError::unauthorized("Missing webhook token"))?;
    if !super::constant_time_eq(&state.config.webhook_token, provided) {
        return Err(ApiError::unauthorized("Invalid webhook token"));
    }
    Ok(())
}
