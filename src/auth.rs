//! Identity & auth (§4.3). Bearer tokens are HMAC-signed JWTs carrying the
//! session identity; admin operations compare against a separate shared
//! secret in constant time.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{AuthFailure, RelayError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub session_id: String,
    pub api_key: String,
    pub stream_key: String,
    pub domain: String,
    pub exp: usize,
}

/// Token lifetime: long enough that a normal streaming session never
/// re-authenticates mid-stream, short enough that a leaked token has a
/// bounded blast radius.
const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Returns the configured secret, or generates a random one and warns that
/// restarts invalidate outstanding tokens (§4.3).
pub fn secret_or_random(configured: &Option<String>) -> String {
    match configured {
        Some(secret) => secret.clone(),
        None => {
            let mut bytes = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            let generated = hex::encode(bytes);
            tracing::warn!(
                "JWT_SECRET not set; generated a random signing secret for this process. \
                 Restarting the process will invalidate all outstanding tokens."
            );
            generated
        }
    }
}

pub fn issue_token(
    secret: &str,
    session_id: &str,
    api_key: &str,
    stream_key: &str,
    domain: &str,
) -> Result<String, RelayError> {
    let claims = TokenClaims {
        session_id: session_id.to_owned(),
        api_key: api_key.to_owned(),
        stream_key: stream_key.to_owned(),
        domain: domain.to_owned(),
        exp: (chrono::Utc::now() + chrono::Duration::seconds(TOKEN_TTL_SECS)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| RelayError::Internal(sqlx::Error::Protocol(e.to_string())))
}

pub fn verify_token(secret: &str, token: &str) -> Result<TokenClaims, RelayError> {
    decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| RelayError::Auth(AuthFailure::InvalidToken))
}

/// Extracts a bearer token from either the standard `Authorization` header
/// or a `?token=` query parameter. The event stream needs the latter
/// because browsers cannot set custom headers on SSE connections (§4.3).
pub fn extract_bearer(authorization: Option<&str>, query_token: Option<&str>) -> Option<String> {
    if let Some(header) = authorization {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_owned());
        }
    }
    query_token.map(|s| s.to_owned())
}

/// Constant-time comparison for the admin shared secret, per spec's
/// explicit call-out. Avoids any data-dependent early return.
pub fn admin_key_matches(configured: &str, presented: &str) -> bool {
    let a = configured.as_bytes();
    let b = presented.as_bytes();
    if a.len() != b.len() {
        // Still walk a fixed number of comparisons so the early return
        // above (length only) is the only length-dependent branch.
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn check_admin(admin_key: &Option<String>, presented: Option<&str>) -> Result<(), RelayError> {
    let Some(configured) = admin_key else {
        return Err(RelayError::Auth(AuthFailure::AdminNotConfigured));
    };
    match presented {
        Some(presented) if admin_key_matches(configured, presented) => Ok(()),
        _ => Err(RelayError::Auth(AuthFailure::AdminForbidden)),
    }
}
