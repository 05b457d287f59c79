//! Repo synchronization service.
//!
//! Owns one ephemeral local clone of a remote git repository. The
//! credential variant keeps a [`CredentialDirectory`] loaded from the clone
//! and refreshes it on a fixed interval; the project variant clones once
//! and leaves further mutation to the business layer.
//!
//! Lifecycle is strictly one-way: `Unstarted → Running → Stopped`. A
//! stopped service never restarts; construct a new one instead, so stale
//! clone state cannot be resurrected.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::shell::GitShell;
use crate::auth::CredentialDirectory;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unstarted,
    Running,
    Stopped,
}

/// Synchronizes one remote git repository into an ephemeral local clone.
pub struct RepoSyncService {
    remote_url: String,
    clone_dir: PathBuf,
    git: Arc<dyn GitShell>,
    /// Present on the credential variant only
    directory: Option<Arc<CredentialDirectory>>,
    /// Present on the credential variant only
    poll_interval: Option<Duration>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes pulls regardless of trigger (timer or manual), and holds
    /// off directory deletion while a pull is in flight.
    pull_guard: tokio::sync::Mutex<()>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl RepoSyncService {
    /// Create the credential variant: clones the users repository, loads
    /// the credential directory from `users_file` inside the clone, and
    /// refreshes it every `poll_interval`.
    #[must_use]
    pub fn credential(
        remote_url: impl Into<String>,
        users_file: &str,
        poll_interval: Duration,
        git: Arc<dyn GitShell>,
    ) -> Self {
        let clone_dir = ephemeral_dir();
        let directory = Arc::new(CredentialDirectory::new(clone_dir.join(users_file)));
        Self {
            remote_url: remote_url.into(),
            clone_dir,
            git,
            directory: Some(directory),
            poll_interval: Some(poll_interval),
            lifecycle: Mutex::new(Lifecycle::Unstarted),
            pull_guard: tokio::sync::Mutex::new(()),
            poll_task: Mutex::new(None),
        }
    }

    /// Create the project variant: clones once, no polling; the checkout
    /// path is handed to the business layer.
    #[must_use]
    pub fn project(remote_url: impl Into<String>, git: Arc<dyn GitShell>) -> Self {
        Self {
            remote_url: remote_url.into(),
            clone_dir: ephemeral_dir(),
            git,
            directory: None,
            poll_interval: None,
            lifecycle: Mutex::new(Lifecycle::Unstarted),
            pull_guard: tokio::sync::Mutex::new(()),
            poll_task: Mutex::new(None),
        }
    }

    /// The credential directory, on the credential variant.
    #[must_use]
    pub fn directory(&self) -> Option<Arc<CredentialDirectory>> {
        self.directory.clone()
    }

    /// Path of the local clone.
    #[must_use]
    pub fn checkout_path(&self) -> &Path {
        &self.clone_dir
    }

    /// Clone the remote and perform the initial load.
    ///
    /// # Errors
    ///
    /// Fails if the service is already running or was stopped (a stopped
    /// service never restarts), or if the clone/initial load fails. After a
    /// failed start the service counts as running so that [`stop`](Self::stop)
    /// still cleans up whatever the clone left behind.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Unstarted => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => {
                    return Err(Error::Lifecycle("sync service already running".into()));
                }
                Lifecycle::Stopped => {
                    return Err(Error::Lifecycle(
                        "sync service was stopped and cannot restart".into(),
                    ));
                }
            }
        }

        info!(remote = %self.remote_url, dir = %self.clone_dir.display(), "Cloning repository");
        self.git.clone_repo(&self.remote_url, &self.clone_dir).await?;

        if let Some(directory) = &self.directory {
            directory.load().await?;
        }

        if let Some(interval) = self.poll_interval {
            let service = Arc::clone(self);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // The first tick completes immediately; the clone just
                // happened, so skip it.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = service.pull().await {
                        warn!(remote = %service.remote_url, error = %e, "Background refresh failed");
                    }
                }
            });
            *self.poll_task.lock() = Some(handle);
        }

        Ok(())
    }

    /// Fast-forward pull and reload. Serialized against every other pull
    /// on this service; a failure leaves the previously loaded state
    /// authoritative.
    pub async fn pull(&self) -> Result<()> {
        let _guard = self.pull_guard.lock().await;

        if *self.lifecycle.lock() != Lifecycle::Running {
            return Err(Error::Lifecycle("sync service is not running".into()));
        }

        self.git.pull(&self.clone_dir).await?;

        if let Some(directory) = &self.directory {
            directory.load().await?;
        }
        debug!(remote = %self.remote_url, "Repository refreshed");
        Ok(())
    }

    /// Stop the service: cancel the poll timer, wait out any in-flight
    /// pull, delete the clone directory (best effort) and clear the
    /// loaded credentials. Idempotent: repeated calls are no-ops, and
    /// cleanup is attempted even if a previous stop partially failed.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Stopped {
                // Still re-attempt directory removal below? No: a completed
                // stop already cleaned up; a *partial* stop never reaches
                // the Stopped state transition with the task alive.
                debug!(remote = %self.remote_url, "stop() on already-stopped service");
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        // Timer first, so no pull can race the directory deletion.
        if let Some(handle) = self.poll_task.lock().take() {
            handle.abort();
        }

        // Wait for any in-flight pull to drain before deleting its workdir.
        let _guard = self.pull_guard.lock().await;

        if let Err(e) = tokio::fs::remove_dir_all(&self.clone_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(dir = %self.clone_dir.display(), error = %e, "Clone cleanup failed");
            }
        }

        // Clear in-memory credentials last: lookups see fully-loaded or
        // fully-cleared, never a half-torn-down table.
        if let Some(directory) = &self.directory {
            directory.clear();
        }
        info!(remote = %self.remote_url, "Sync service stopped");
    }
}

/// A fresh unique directory under the system temp dir. Never reused across
/// start/stop cycles.
fn ephemeral_dir() -> PathBuf {
    std::env::temp_dir().join(format!("steward-sync-{}", uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// GitShell fake that materializes a credential document on clone and
    /// rewrites it on pull.
    struct FakeGit {
        clones: AtomicUsize,
        pulls: AtomicUsize,
        initial_doc: String,
        pulled_doc: String,
    }

    impl FakeGit {
        fn new(initial_doc: &str, pulled_doc: &str) -> Self {
            Self {
                clones: AtomicUsize::new(0),
                pulls: AtomicUsize::new(0),
                initial_doc: initial_doc.to_string(),
                pulled_doc: pulled_doc.to_string(),
            }
        }
    }

    #[async_trait]
    impl GitShell for FakeGit {
        async fn clone_repo(&self, _remote: &str, dest: &Path) -> Result<()> {
            self.clones.fetch_add(1, Ordering::SeqCst);
            tokio::fs::create_dir_all(dest).await?;
            tokio::fs::write(dest.join("users.md"), &self.initial_doc).await?;
            Ok(())
        }

        async fn pull(&self, workdir: &Path) -> Result<()> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(workdir.join("users.md"), &self.pulled_doc).await?;
            Ok(())
        }

        async fn commit(&self, _workdir: &Path, _message: &str) -> Result<()> {
            Ok(())
        }
    }

    const ADMIN_ONLY: &str =
        "---\nusers:\n  - email: admin@test.com\n    name: Ada\n    role: admin\n---\n";
    const ADMIN_AND_VIEWER: &str = "---\nusers:\n  - email: admin@test.com\n    name: Ada\n    role: admin\n  - email: viewer@test.com\n    name: Vic\n    role: viewer\n---\n";

    fn credential_service(git: Arc<dyn GitShell>) -> Arc<RepoSyncService> {
        Arc::new(RepoSyncService::credential(
            "fake://users.git",
            "users.md",
            Duration::from_secs(3600),
            git,
        ))
    }

    #[tokio::test]
    async fn start_loads_directory_and_pull_refreshes_it() {
        let git = Arc::new(FakeGit::new(ADMIN_ONLY, ADMIN_AND_VIEWER));
        let service = credential_service(git.clone());

        service.start().await.unwrap();
        let directory = service.directory().unwrap();
        assert_eq!(
            directory.find_by_email("admin@test.com").unwrap().name,
            "Ada"
        );
        assert!(directory.find_by_email("viewer@test.com").is_none());

        service.pull().await.unwrap();
        assert!(directory.find_by_email("viewer@test.com").is_some());
        // The original entry is still resolvable after the refresh
        assert!(directory.find_by_email("admin@test.com").is_some());

        service.stop().await;
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let git = Arc::new(FakeGit::new(ADMIN_ONLY, ADMIN_ONLY));
        let service = credential_service(git);

        service.start().await.unwrap();
        assert!(matches!(
            service.start().await,
            Err(Error::Lifecycle(_))
        ));
        service.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_removes_the_clone() {
        let git = Arc::new(FakeGit::new(ADMIN_ONLY, ADMIN_ONLY));
        let service = credential_service(git);

        service.start().await.unwrap();
        let dir = service.checkout_path().to_path_buf();
        assert!(dir.exists());

        service.stop().await;
        assert!(!dir.exists());

        // Second stop must not panic or error
        service.stop().await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn stop_clears_loaded_credentials() {
        let git = Arc::new(FakeGit::new(ADMIN_ONLY, ADMIN_ONLY));
        let service = credential_service(git);

        service.start().await.unwrap();
        let directory = service.directory().unwrap();
        assert!(directory.find_by_email("admin@test.com").is_some());

        service.stop().await;
        assert!(directory.find_by_email("admin@test.com").is_none());
    }

    #[tokio::test]
    async fn start_after_stop_is_refused() {
        let git = Arc::new(FakeGit::new(ADMIN_ONLY, ADMIN_ONLY));
        let service = credential_service(git);

        service.start().await.unwrap();
        service.stop().await;
        assert!(matches!(
            service.start().await,
            Err(Error::Lifecycle(_))
        ));
    }

    #[tokio::test]
    async fn pull_on_stopped_service_fails_cleanly() {
        let git = Arc::new(FakeGit::new(ADMIN_ONLY, ADMIN_ONLY));
        let service = credential_service(git);

        service.start().await.unwrap();
        service.stop().await;
        assert!(matches!(service.pull().await, Err(Error::Lifecycle(_))));
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_credentials() {
        let git = Arc::new(FakeGit::new(ADMIN_ONLY, "---\nusers: [broken\n---\n"));
        let service = credential_service(git);

        service.start().await.unwrap();
        let directory = service.directory().unwrap();
        assert!(directory.find_by_email("admin@test.com").is_some());

        // The pull lands a corrupt document; reload errors, but the
        // previously loaded table stays authoritative.
        assert!(service.pull().await.is_err());
        assert!(directory.find_by_email("admin@test.com").is_some());

        service.stop().await;
    }

    #[tokio::test]
    async fn project_variant_exposes_checkout_without_polling() {
        let git = Arc::new(FakeGit::new("", ""));
        let service = Arc::new(RepoSyncService::project("fake://project.git", git.clone()));

        service.start().await.unwrap();
        assert!(service.directory().is_none());
        assert!(service.checkout_path().exists());
        assert_eq!(git.pulls.load(Ordering::SeqCst), 0);

        service.stop().await;
    }
}
