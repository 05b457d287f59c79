//! Ephemeral git repository synchronization

mod service;
mod shell;

pub use service::RepoSyncService;
pub use shell::{GitShell, SystemGit};
