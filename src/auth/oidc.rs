//! Google ID-token verification for the browser login path.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid`.
//! 2. Fetch Google's JWKS (cached for 1 hour; refreshed once on unknown `kid`).
//! 3. Verify the signature and standard claims (`exp`, `iat`, `iss`).
//! 4. Check the `aud` claim against the configured OAuth client ID.
//! 5. Return the token's email and display name.
//!
//! The gateway never trusts the Google token beyond this exchange: the
//! verified email must still resolve in the credential directory before a
//! session token is issued.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::Deserialize;
use tracing::debug;

/// Google's JWKS endpoint.
const GOOGLE_JWKS_URI: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Issuer values Google uses in ID tokens.
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];

/// Error variants for ID-token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// JWT decode / signature verification failed.
    #[error("ID token verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("ID token missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in Google's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// The token's `iss` claim is not a Google issuer.
    #[error("Unexpected issuer: {0}")]
    UnexpectedIssuer(String),

    /// The token carries no email claim.
    #[error("ID token has no email claim")]
    MissingEmail,

    /// Network or HTTP error while fetching the JWKS.
    #[error("JWKS fetch error: {0}")]
    Http(#[from] reqwest::Error),
}

/// The identity asserted by a verified Google ID token.
#[derive(Debug, Clone)]
pub struct VerifiedLogin {
    /// Email address from the token claims.
    pub email: String,
    /// Display name, falling back to the email when Google sends none.
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    iss: String,
    #[allow(dead_code)]
    exp: u64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies Google ID tokens against a configured OAuth client ID.
pub struct GoogleVerifier {
    client_id: String,
    http: reqwest::Client,
    /// Single-issuer JWKS cache keyed by URI; refreshed on staleness or
    /// unknown `kid`.
    jwks: DashMap<&'static str, CachedJwks>,
    jwks_ttl: Duration,
}

impl GoogleVerifier {
    /// Create a verifier for the given OAuth client ID.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            http: reqwest::Client::builder()
                .https_only(true)
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            jwks: DashMap::new(),
            jwks_ttl: Duration::from_secs(3600),
        }
    }

    /// Verify a Google ID token and return the asserted login identity.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError`] if the token is invalid, expired, not issued
    /// by Google, not addressed to our client ID, or signed with an unknown
    /// key.
    pub async fn verify(&self, id_token: &str) -> Result<VerifiedLogin, LoginError> {
        let header = jsonwebtoken::decode_header(id_token)?;
        let kid = header.kid.ok_or(LoginError::MissingKeyId)?;

        let decoding_key = self.find_decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 60; // 60-second clock skew tolerance
        validation.set_audience(&[&self.client_id]);

        let token_data: TokenData<IdTokenClaims> =
            jsonwebtoken::decode(id_token, &decoding_key, &validation)?;
        let claims = token_data.claims;

        if !GOOGLE_ISSUERS.contains(&claims.iss.as_str()) {
            return Err(LoginError::UnexpectedIssuer(claims.iss));
        }

        let email = claims.email.ok_or(LoginError::MissingEmail)?;
        let name = claims.name.unwrap_or_else(|| email.clone());
        Ok(VerifiedLogin { email, name })
    }

    /// Find a decoding key by `kid`, refreshing the JWKS cache once if the
    /// key is not in the cached set.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, LoginError> {
        let jwks = self.get_or_fetch_jwks(false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.get_or_fetch_jwks(true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| LoginError::UnknownKeyId(kid.to_string()))
    }

    async fn get_or_fetch_jwks(&self, force_refresh: bool) -> Result<JwkSet, LoginError> {
        if !force_refresh {
            if let Some(cached) = self.jwks.get(GOOGLE_JWKS_URI) {
                if cached.fetched_at.elapsed() < self.jwks_ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!("Fetching Google JWKS");
        let jwks: JwkSet = self.http.get(GOOGLE_JWKS_URI).send().await?.json().await?;

        self.jwks.insert(
            GOOGLE_JWKS_URI,
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks)
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        if jwk.common.key_id.as_deref() != Some(kid) {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            _ => None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_token_is_rejected_without_network() {
        let verifier = GoogleVerifier::new("client-id");
        let result = tokio_test::block_on(verifier.verify("not-a-jwt"));
        assert!(matches!(result, Err(LoginError::Jwt(_))));
    }

    #[test]
    fn empty_jwks_has_no_keys() {
        let jwks: JwkSet = serde_json::from_str(r#"{"keys":[]}"#).unwrap();
        assert!(find_key_in_jwks(&jwks, "any-kid").is_none());
    }
}
