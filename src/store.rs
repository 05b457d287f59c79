//! Content store collaborator interface.
//!
//! The business layer (markdown/YAML parsing, task and milestone logic)
//! lives outside this crate. The gateway consumes it through
//! [`ContentStore`]: a handful of read/write accessors plus a change feed.
//! [`FileStore`] is the thin filesystem adapter the binary wires in; it
//! deliberately knows nothing about task semantics.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{Error, Result};

/// An event emitted by the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// The synchronous initial load finished. Emitted exactly once, first.
    Ready,
    /// Project state changed after the initial load.
    Mutated,
}

/// The live, parsed project state as the gateway sees it.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Subscribe to the change feed. The first event after the initial load
    /// is [`StoreEvent::Ready`]; every later event is a real mutation.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Task listing as served by `GET /api/tasks`.
    async fn tasks(&self) -> Result<Value>;

    /// Project configuration as served by `GET /api/config`.
    async fn config(&self) -> Result<Value>;

    /// Replace the project configuration (`PUT /api/config`).
    async fn write_config(&self, value: Value) -> Result<()>;
}

/// Filesystem-backed store adapter rooted at a project checkout.
///
/// Task files live under `tasks/`, the project configuration in
/// `config.yml`. Listing returns file stems only; interpreting their
/// contents is the business layer's job, not the gateway's.
pub struct FileStore {
    root: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl FileStore {
    /// Create a store rooted at `root`. No events are emitted until
    /// [`open`](Self::open) runs, so subscribers attached in between see
    /// the full feed from `Ready` onward.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            root: root.into(),
            events,
        }
    }

    /// Root directory of the checkout.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finish the initial load and emit `Ready`.
    pub fn open(&self) {
        debug!(root = %self.root.display(), "Content store ready");
        let _ = self.events.send(StoreEvent::Ready);
    }

    /// Emit a mutation event. Called by the business layer after any write.
    pub fn notify_mutated(&self) {
        let _ = self.events.send(StoreEvent::Mutated);
    }
}

#[async_trait]
impl ContentStore for FileStore {
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn tasks(&self) -> Result<Value> {
        let dir = self.root.join("tasks");
        let mut names = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Value::Array(Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(Value::String(stem.to_string()));
                }
            }
        }
        names.sort_by(|a, b| a.as_str().cmp(&b.as_str()));

        Ok(Value::Array(names))
    }

    async fn config(&self) -> Result<Value> {
        let path = self.root.join("config.yml");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
                    .map_err(|e| Error::Upstream(format!("config.yml: {e}")))?;
                serde_json::to_value(yaml).map_err(Into::into)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Null),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_config(&self, value: Value) -> Result<()> {
        let path = self.root.join("config.yml");
        let yaml = serde_yaml::to_string(&value)
            .map_err(|e| Error::Internal(format!("config serialization: {e}")))?;
        tokio::fs::write(&path, yaml).await?;
        self.notify_mutated();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_ready_then_mutations() {
        let store = FileStore::new("/tmp/unused");
        let mut rx = store.subscribe();

        store.open();
        store.notify_mutated();

        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Ready);
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Mutated);
    }

    #[tokio::test]
    async fn missing_tasks_directory_lists_empty() {
        let store = FileStore::new("/nonexistent/steward/project");
        assert_eq!(store.tasks().await.unwrap(), Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn missing_config_reads_null() {
        let store = FileStore::new("/nonexistent/steward/project");
        assert_eq!(store.config().await.unwrap(), Value::Null);
    }
}
