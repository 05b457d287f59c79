//! Configuration management

use std::{path::Path, time::Duration};

use base64::Engine;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Repository configuration
    pub repos: ReposConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Hard deadline for the graceful HTTP stop during shutdown.
    /// The listener is abandoned once this elapses, whether or not the
    /// graceful stop has completed.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6440,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable authentication (default: false for local single-user setups)
    pub enabled: bool,

    /// Symmetric secret used to sign session tokens.
    /// If unset, a random secret is generated at startup; all outstanding
    /// sessions are invalidated on every restart until one is configured.
    #[serde(default)]
    pub session_secret: Option<String>,

    /// Session token lifetime
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Google OAuth client ID. Absent means the browser login path is
    /// disabled; API-key-only MCP access still works.
    #[serde(default)]
    pub google_client_id: Option<String>,

    /// Paths that bypass authentication
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec![
        "/api/auth/status".to_string(),
        "/api/auth/google".to_string(),
    ]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            session_secret: None,
            session_ttl: Duration::from_secs(24 * 3600),
            google_client_id: None,
            public_paths: default_public_paths(),
        }
    }
}

/// Resolved signing secret, tagged with its provenance so startup logs can
/// say whether sessions survive a restart.
#[derive(Debug, Clone)]
pub enum SessionSecret {
    /// Explicitly configured; sessions survive restarts.
    Configured(String),
    /// Randomly generated at startup; sessions die with the process.
    Generated(String),
}

impl SessionSecret {
    /// The secret bytes, regardless of provenance.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Configured(s) | Self::Generated(s) => s.as_bytes(),
        }
    }

    /// True if the secret was generated rather than configured.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

impl AuthConfig {
    /// Resolve the session signing secret.
    ///
    /// A configured secret is used as-is. When none is configured a random
    /// 32-byte secret is generated, which invalidates all outstanding
    /// sessions on every restart; callers must surface the distinction in
    /// logs.
    #[must_use]
    pub fn resolve_session_secret(&self) -> SessionSecret {
        match &self.session_secret {
            Some(s) if !s.is_empty() => SessionSecret::Configured(s.clone()),
            _ => {
                use rand::RngExt;
                let random_bytes: [u8; 32] = rand::rng().random();
                SessionSecret::Generated(
                    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes),
                )
            }
        }
    }
}

/// Git repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReposConfig {
    /// Remote URL of the repository holding user/role definitions.
    /// Absent means the credential directory stays empty and API-key auth
    /// never matches.
    #[serde(default)]
    pub users_repo_url: Option<String>,

    /// Remote URL of the live project repository. Absent means the gateway
    /// operates on `project_dir` without cloning.
    #[serde(default)]
    pub project_repo_url: Option<String>,

    /// Local working directory used when no project repo URL is configured.
    pub project_dir: String,

    /// Path of the credential document inside the users repository.
    pub users_file: String,

    /// Interval between credential repository refresh pulls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self {
            users_repo_url: None,
            project_repo_url: None,
            project_dir: ".".to_string(),
            users_file: "users.md".to_string(),
            poll_interval: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (STEWARD_ prefix)
        figment = figment.merge(Env::prefixed("STEWARD_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment
        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {path_str}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {path_str}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(secs) = s.strip_suffix("ms") {
            return secs
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom);
        }
        if let Some(secs) = s.strip_suffix('s') {
            return secs
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom);
        }
        if let Some(mins) = s.strip_suffix('m') {
            return mins
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom);
        }
        if let Some(hours) = s.strip_suffix('h') {
            return hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom);
        }

        // Bare number: seconds
        s.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_loadable() {
        let config = Config::default();
        assert_eq!(config.server.port, 6440);
        assert!(!config.auth.enabled);
        assert_eq!(config.repos.poll_interval, Duration::from_secs(300));
        assert!(config.repos.users_repo_url.is_none());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/steward.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn configured_secret_survives_resolution() {
        let auth = AuthConfig {
            session_secret: Some("fixed-secret".to_string()),
            ..AuthConfig::default()
        };
        let secret = auth.resolve_session_secret();
        assert!(!secret.is_generated());
        assert_eq!(secret.as_bytes(), b"fixed-secret");
    }

    #[test]
    fn absent_secret_generates_random_value() {
        let auth = AuthConfig::default();
        let a = auth.resolve_session_secret();
        let b = auth.resolve_session_secret();
        assert!(a.is_generated());
        assert!(b.is_generated());
        // Two resolutions must not produce the same secret
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn empty_secret_counts_as_absent() {
        let auth = AuthConfig {
            session_secret: Some(String::new()),
            ..AuthConfig::default()
        };
        assert!(auth.resolve_session_secret().is_generated());
    }

    #[test]
    fn public_paths_default_to_auth_endpoints() {
        let auth = AuthConfig::default();
        assert!(auth.public_paths.iter().any(|p| p == "/api/auth/status"));
        assert!(auth.public_paths.iter().any(|p| p == "/api/auth/google"));
    }

    #[test]
    fn humantime_deserializes_minutes() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let w: Wrapper = serde_yaml::from_str("d: 5m").unwrap();
        assert_eq!(w.d, Duration::from_secs(300));
    }
}
