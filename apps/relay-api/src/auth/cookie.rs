//! `access_token` cookie extraction with optional HMAC signature check.
//!
//! The front-door proxy may append an HMAC-SHA256 signature segment to the
//! cookie value. A compact signed claim has three dot-separated segments, so
//! a four-segment value is recognized as signed: the trailing segment is
//! verified against the cookie secret and stripped before claim verification.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

const COOKIE_NAMES: [&str; 2] = ["access_token", "__Host-access_token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieError {
    BadSignature,
}

/// Find the access-token cookie in a `Cookie` header value.
///
/// Returns the URL-decoded raw value, which may still carry a signature
/// segment; callers pass it through [`verify_cookie_value`].
pub fn find_access_token(cookie_header: &str) -> Option<String> {
    for pair in cookie_header.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let name = parts.next()?.trim();
        let value = parts.next()?.trim();
        if COOKIE_NAMES.contains(&name) && !value.is_empty() {
            return Some(percent_decode(value));
        }
    }
    None
}

/// Strip and verify a trailing HMAC signature segment, if present.
///
/// Three segments pass through untouched (an unsigned compact claim). Four
/// segments require the trailing one to be a valid HMAC-SHA256 of the rest;
/// signature failure is a hard rejection.
pub fn verify_cookie_value(cookie_secret: &str, value: &str) -> Result<String, CookieError> {
    let segments: Vec<&str> = value.split('.').collect();
    if segments.len() != 4 {
        return Ok(value.to_string());
    }

    let payload = segments[..3].join(".");
    let expected = sign(cookie_secret, &payload);
    if !constant_time_eq(&expected, segments[3]) {
        return Err(CookieError::BadSignature);
    }
    Ok(payload)
}

fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Minimal percent-decoding for cookie values.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(byte) = u8::from_str_radix(&value[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
