//! Signed session tokens.
//!
//! A token is `base64url(header) . base64url(payload) . base64url(signature)`
//! without padding, where the signature is HMAC-SHA256 over the first two
//! segments. The header is a fixed constant: the verifier never reads an
//! `alg` field out of the token, so algorithm-confusion tokens fail on the
//! signature check like any other forgery.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, KeyInit, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{Identity, Role};

/// Fixed token header; there is no algorithm negotiation.
const HEADER: &[u8] = br#"{"alg":"HS256","typ":"JWT"}"#;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Caller email
    pub email: String,
    /// Display name
    pub name: String,
    /// Access role
    pub role: Role,
    /// Issued-at (epoch seconds)
    pub iat: i64,
    /// Expiry (epoch seconds)
    pub exp: i64,
}

/// Why a token failed verification. Mapped to a uniform 401 at the HTTP
/// layer; the distinction exists for server-side logs only.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    /// Not three dot-separated base64url segments
    #[error("malformed token")]
    Malformed,
    /// Signature recomputation did not match
    #[error("signature mismatch")]
    Signature,
    /// Payload did not parse or lacked required claims
    #[error("invalid payload")]
    Payload,
    /// `exp` has passed
    #[error("token expired")]
    Expired,
}

/// Sign a session token for `identity` valid for `ttl`.
pub fn sign(identity: &Identity, secret: &[u8], ttl: Duration) -> String {
    let now = chrono::Utc::now().timestamp();
    #[allow(clippy::cast_possible_wrap)]
    let claims = SessionClaims {
        email: identity.email.clone(),
        name: identity.name.clone(),
        role: identity.role,
        iat: now,
        exp: now + ttl.as_secs() as i64,
    };

    let head = URL_SAFE_NO_PAD.encode(HEADER);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&claims).expect("session claims always serialize"),
    );
    let signature = compute_signature(secret, &head, &payload);

    format!("{head}.{payload}.{signature}")
}

/// Verify a session token and return its claims.
///
/// # Errors
///
/// Returns [`TokenError`] for malformed tokens, signature mismatches
/// (including tokens signed under a different secret), unparseable payloads
/// and expired tokens. Never panics on attacker-controlled input.
pub fn verify(token: &str, secret: &[u8]) -> Result<SessionClaims, TokenError> {
    let mut segments = token.split('.');
    let (Some(head), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };

    let given = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed)?;
    let computed = raw_signature(secret, head, payload);

    // Length check first, then constant-time comparison over the full
    // buffers; never short-circuit on the first differing byte.
    if given.len() != computed.len() || !bool::from(computed.ct_eq(&given)) {
        return Err(TokenError::Signature);
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Payload)?;
    let claims: SessionClaims =
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Payload)?;

    if claims.exp <= chrono::Utc::now().timestamp() {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

fn raw_signature(secret: &[u8], head: &str, payload: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(head.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn compute_signature(secret: &[u8], head: &str, payload: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw_signature(secret, head, payload))
}
