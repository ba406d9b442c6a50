//! HAT auth token inspection.
//!
//! HAT issues JWTs. The client only reads the `exp` claim to avoid sending a
//! request it knows will be refused; signature checks are the server's job.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Expiry state of an auth token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Not expired. `None` when the token carries no `exp` claim.
    Valid { expires_at: Option<DateTime<Utc>> },
    Expired { expired_at: DateTime<Utc> },
    /// Not a decodable JWT. The server gets the final say.
    Opaque,
}

impl TokenState {
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenState::Expired { .. })
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Inspect a token's `exp` claim against `now`.
pub fn token_state(token: &str, now: DateTime<Utc>) -> TokenState {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return TokenState::Opaque,
    };

    let bytes = match URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
        Ok(b) => b,
        Err(_) => return TokenState::Opaque,
    };
    let claims: Claims = match serde_json::from_slice(&bytes) {
        Ok(c) => c,
        Err(_) => return TokenState::Opaque,
    };

    match claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)) {
        Some(expires_at) if expires_at <= now => TokenState::Expired {
            expired_at: expires_at,
        },
        expires_at => TokenState::Valid { expires_at },
    }
}
