//! Authentication: identities, session tokens, credential directory,
//! browser login and request classification.

pub mod directory;
pub mod oidc;
pub mod request;
pub mod token;

use serde::{Deserialize, Serialize};

pub use directory::CredentialDirectory;
pub use request::{AuthDecision, SessionAuthenticator, session_auth_middleware};
pub use token::{SessionClaims, TokenError, sign, verify};

/// Access role of a caller.
///
/// Anything that is not `admin` in the credential document resolves to
/// `Viewer`, the least-privileged role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full read/write access
    Admin,
    /// Read-only access, enforced by write-method and tool filtering
    #[serde(other)]
    Viewer,
}

impl Role {
    /// Parse a role string from the credential document.
    /// Unrecognized values downgrade to [`Role::Viewer`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::Viewer
        }
    }
}

/// A resolved caller: email, display name, role and optional static API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Email address (unique, compared case-insensitively)
    pub email: String,
    /// Display name
    pub name: String,
    /// Access role
    pub role: Role,
    /// Static API key for agent clients, if issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}
