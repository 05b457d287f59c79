//! In-memory credential directory.
//!
//! Built from a markdown document whose YAML front matter lists known
//! users. The whole table is replaced on every [`CredentialDirectory::load`]
//! so concurrent readers see either the fully-old or fully-new state, never
//! a partial merge.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Identity, Role};
use crate::Result;

/// Directory of known identities, indexed by email and by API key.
pub struct CredentialDirectory {
    /// Path of the credential document
    path: PathBuf,
    /// Current snapshot; swapped wholesale on reload
    snapshot: RwLock<Arc<Snapshot>>,
}

#[derive(Default)]
struct Snapshot {
    /// Keyed by lowercased email
    by_email: HashMap<String, Identity>,
    /// Keyed by exact API key
    by_key: HashMap<String, Identity>,
    /// Declaration order, for listing
    order: Vec<String>,
}

impl CredentialDirectory {
    /// Create a directory backed by the given document path. The directory
    /// is empty until the first [`load`](Self::load).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Reload the directory from its backing document, replacing all state.
    ///
    /// A missing file is not an error: the directory loads empty. "No
    /// credentials file yet" is a valid, if non-functional, state. An
    /// unreadable or unparseable document IS an error, and the previously
    /// loaded table stays authoritative; stale-but-valid data over no data.
    pub async fn load(&self) -> Result<()> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Credential document absent, directory empty");
                *self.snapshot.write() = Arc::new(Snapshot::default());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot = build_snapshot(&content)?;
        debug!(
            path = %self.path.display(),
            users = snapshot.order.len(),
            "Credential directory loaded"
        );
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(())
    }

    /// Drop all loaded identities. Used during teardown so a concurrent
    /// lookup observes a fully-cleared table rather than stale data.
    pub fn clear(&self) {
        *self.snapshot.write() = Arc::new(Snapshot::default());
    }

    /// Look up an identity by email, case-insensitively.
    #[must_use]
    pub fn find_by_email(&self, email: &str) -> Option<Identity> {
        let snapshot = self.snapshot.read().clone();
        snapshot.by_email.get(&email.to_lowercase()).cloned()
    }

    /// Look up an identity by static API key. Exact match; an empty key
    /// never matches anything.
    #[must_use]
    pub fn find_by_api_key(&self, key: &str) -> Option<Identity> {
        if key.is_empty() {
            return None;
        }
        let snapshot = self.snapshot.read().clone();
        snapshot.by_key.get(key).cloned()
    }

    /// All loaded identities, in document order.
    #[must_use]
    pub fn list_all(&self) -> Vec<Identity> {
        let snapshot = self.snapshot.read().clone();
        snapshot
            .order
            .iter()
            .filter_map(|email| snapshot.by_email.get(email).cloned())
            .collect()
    }
}

/// Parse the credential document into a fresh snapshot.
///
/// The document is free-form markdown with a YAML front-matter block
/// (`---` fences) whose `users:` key lists entries. An entry is accepted
/// only with non-empty trimmed `email` and `name`; anything else about an
/// entry is tolerated; an unusable `role` downgrades to viewer rather
/// than failing the load. Only unparseable YAML is an error.
fn build_snapshot(content: &str) -> Result<Snapshot> {
    let mut snapshot = Snapshot::default();

    let Some(front) = front_matter(content) else {
        warn!("Credential document has no front matter, directory empty");
        return Ok(snapshot);
    };

    let doc: serde_yaml::Value = serde_yaml::from_str(front)
        .map_err(|e| crate::Error::Upstream(format!("credential front matter: {e}")))?;

    let Some(users) = doc.get("users").and_then(|u| u.as_sequence()) else {
        warn!("Credential front matter has no 'users' list, directory empty");
        return Ok(snapshot);
    };

    for entry in users {
        let email = trimmed_string(entry.get("email"));
        let name = trimmed_string(entry.get("name"));
        let (Some(email), Some(name)) = (email, name) else {
            debug!("Skipping credential entry without email or name");
            continue;
        };

        let role = entry
            .get("role")
            .and_then(serde_yaml::Value::as_str)
            .map_or(Role::Viewer, Role::parse);
        let api_key = trimmed_string(entry.get("apiKey"));

        let identity = Identity {
            email: email.clone(),
            name,
            role,
            api_key: api_key.clone(),
        };

        let key = email.to_lowercase();
        if let Some(api_key) = api_key {
            snapshot.by_key.insert(api_key, identity.clone());
        }
        if snapshot.by_email.insert(key.clone(), identity).is_none() {
            snapshot.order.push(key);
        }
    }

    Ok(snapshot)
}

/// Extract the YAML front-matter block, or fall back to the whole document
/// when it is bare YAML without fences.
fn front_matter(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---")?;
    // Fence must end its line
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"));
    match rest {
        Some(body) => body.find("\n---").map(|end| &body[..end]),
        None => None,
    }
}

fn trimmed_string(value: Option<&serde_yaml::Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
