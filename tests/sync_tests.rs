//! Repo synchronization scenarios against real local git repositories.
//!
//! These tests shell out to the system `git` binary, the same way the
//! gateway does in production.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use steward_gateway::auth::Role;
use steward_gateway::sync::{RepoSyncService, SystemGit};

const INITIAL_DOC: &str = "\
---
users:
  - email: admin@test.com
    name: Ada Admin
    role: admin
---

# Team
";

const UPDATED_DOC: &str = "\
---
users:
  - email: admin@test.com
    name: Ada Admin
    role: admin
  - email: viewer@test.com
    name: Vic Viewer
    role: viewer
---

# Team
";

fn git(args: &[&str], cwd: &Path) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("git binary available");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a bare "remote" seeded with the initial credential document.
/// Returns (workdir for pushing updates, remote URL).
fn users_remote(tmp: &Path) -> (std::path::PathBuf, String) {
    let seed = tmp.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    std::fs::write(seed.join("users.md"), INITIAL_DOC).unwrap();

    git(&["init", "-q", "-b", "main"], &seed);
    git(&["-c", "user.email=test@test", "-c", "user.name=test", "add", "-A"], &seed);
    git(
        &["-c", "user.email=test@test", "-c", "user.name=test", "commit", "-q", "-m", "seed users"],
        &seed,
    );

    let remote = tmp.join("remote.git");
    git(
        &["clone", "-q", "--bare", seed.to_str().unwrap(), remote.to_str().unwrap()],
        tmp,
    );
    git(&["remote", "add", "origin", remote.to_str().unwrap()], &seed);

    (seed, remote.to_string_lossy().into_owned())
}

fn push_update(seed: &Path) {
    std::fs::write(seed.join("users.md"), UPDATED_DOC).unwrap();
    git(&["-c", "user.email=test@test", "-c", "user.name=test", "add", "-A"], seed);
    git(
        &["-c", "user.email=test@test", "-c", "user.name=test", "commit", "-q", "-m", "add viewer"],
        seed,
    );
    git(&["push", "-q", "origin", "main"], seed);
}

fn credential_service(remote: &str) -> Arc<RepoSyncService> {
    Arc::new(RepoSyncService::credential(
        remote,
        "users.md",
        // Long interval: these tests drive pulls manually
        Duration::from_secs(3600),
        Arc::new(SystemGit),
    ))
}

/// Start against a remote with one admin, commit a new viewer entry, pull,
/// and resolve both.
#[tokio::test]
async fn pull_picks_up_committed_credential_changes() {
    let tmp = tempfile::tempdir().unwrap();
    let (seed, remote) = users_remote(tmp.path());

    let service = credential_service(&remote);
    service.start().await.unwrap();

    let directory = service.directory().unwrap();
    let admin = directory.find_by_email("admin@test.com").unwrap();
    assert_eq!(admin.role, Role::Admin);
    assert!(directory.find_by_email("viewer@test.com").is_none());

    push_update(&seed);
    service.pull().await.unwrap();

    let viewer = directory.find_by_email("viewer@test.com").unwrap();
    assert_eq!(viewer.role, Role::Viewer);
    // The original entry is still resolvable
    assert!(directory.find_by_email("admin@test.com").is_some());

    service.stop().await;
}

/// Two back-to-back stops never fail and leave no clone directory behind.
#[tokio::test]
async fn double_stop_leaves_no_residue() {
    let tmp = tempfile::tempdir().unwrap();
    let (_seed, remote) = users_remote(tmp.path());

    let service = credential_service(&remote);
    service.start().await.unwrap();
    let clone_dir = service.checkout_path().to_path_buf();
    assert!(clone_dir.exists());

    service.stop().await;
    service.stop().await;

    assert!(!clone_dir.exists());
}

/// A clone failure surfaces as an error, and stop still cleans up.
#[tokio::test]
async fn failed_clone_is_an_error_and_stop_still_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let bogus = tmp.path().join("does-not-exist.git");

    let service = credential_service(&bogus.to_string_lossy());
    assert!(service.start().await.is_err());

    service.stop().await;
    assert!(!service.checkout_path().exists());
}

/// Committing through the shell records a new revision in the clone.
#[tokio::test]
async fn commit_records_local_changes() {
    use steward_gateway::sync::GitShell;

    let tmp = tempfile::tempdir().unwrap();
    let (_seed, remote) = users_remote(tmp.path());

    let service = Arc::new(RepoSyncService::project(remote, Arc::new(SystemGit)));
    service.start().await.unwrap();
    let workdir = service.checkout_path().to_path_buf();

    git(&["config", "user.email", "test@test"], &workdir);
    git(&["config", "user.name", "test"], &workdir);
    std::fs::write(workdir.join("tasks.md"), "# tasks\n").unwrap();
    SystemGit.commit(&workdir, "add tasks file").await.unwrap();

    let output = Command::new("git")
        .args(["rev-list", "--count", "HEAD"])
        .current_dir(&workdir)
        .output()
        .unwrap();
    let count: u32 = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap();
    assert_eq!(count, 2);

    service.stop().await;
}

/// The project variant clones once and hands over the checkout path.
#[tokio::test]
async fn project_variant_clones_the_working_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let (_seed, remote) = users_remote(tmp.path());

    let service = Arc::new(RepoSyncService::project(remote, Arc::new(SystemGit)));
    service.start().await.unwrap();

    assert!(service.checkout_path().join("users.md").exists());
    assert!(service.directory().is_none());

    service.stop().await;
    assert!(!service.checkout_path().exists());
}
