//! Gateway orchestrator: top-level composition and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::broadcast::ChangeBroadcaster;
use super::protocol::ProtocolGateway;
use super::router::{AppState, create_router};
use crate::auth::SessionAuthenticator;
use crate::auth::oidc::GoogleVerifier;
use crate::capability::ToolAccess;
use crate::config::Config;
use crate::registry::{PromptRegistry, ResourceRegistry, ToolRegistry, handler};
use crate::store::{ContentStore, FileStore};
use crate::sync::{RepoSyncService, SystemGit};
use crate::{Error, Result};

/// Top-level composition: owns the HTTP surface, both repo sync services,
/// the protocol gateway and the change broadcaster, plus the shutdown
/// sequence tying them together.
pub struct GatewayOrchestrator {
    config: Config,
    credential_sync: Option<Arc<RepoSyncService>>,
    project_sync: Option<Arc<RepoSyncService>>,
    store: Arc<FileStore>,
    broadcaster: Arc<ChangeBroadcaster>,
    state: Arc<AppState>,
    ready: Arc<AtomicBool>,
    stopping: AtomicBool,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl GatewayOrchestrator {
    /// Wire up all components from configuration. Nothing is started yet;
    /// [`run`](Self::run) performs the clones and binds the listener.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let secret = config.auth.resolve_session_secret();
        if config.auth.enabled {
            if secret.is_generated() {
                warn!(
                    "No session secret configured; generated one for this process; \
                     all sessions are invalidated on restart"
                );
            } else {
                info!("Using configured session secret");
            }
        }

        let git = Arc::new(SystemGit);

        let credential_sync = config.repos.users_repo_url.as_ref().map(|url| {
            Arc::new(RepoSyncService::credential(
                url.clone(),
                &config.repos.users_file,
                config.repos.poll_interval,
                git.clone(),
            ))
        });
        if config.auth.enabled && credential_sync.is_none() {
            warn!("Auth enabled but no users repository configured; API keys will never match");
        }

        let project_sync = config
            .repos
            .project_repo_url
            .as_ref()
            .map(|url| Arc::new(RepoSyncService::project(url.clone(), git.clone())));

        // The project checkout path is fixed at construction, so the store
        // can be wired before anything is cloned.
        let store_root = project_sync.as_ref().map_or_else(
            || std::path::PathBuf::from(&config.repos.project_dir),
            |sync| sync.checkout_path().to_path_buf(),
        );
        let store = Arc::new(FileStore::new(store_root));

        let directory = credential_sync.as_ref().and_then(|sync| sync.directory());
        let auth = Arc::new(SessionAuthenticator::new(
            &config.auth,
            secret,
            directory.clone(),
        ));

        let (tools, resources, prompts) = store_registries(&store);
        let protocol = Arc::new(ProtocolGateway::new(tools, resources, prompts));

        let login = config
            .auth
            .google_client_id
            .as_ref()
            .map(|client_id| Arc::new(GoogleVerifier::new(client_id.clone())));

        let broadcaster = Arc::new(ChangeBroadcaster::new());
        let ready = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let state = Arc::new(AppState {
            store: store.clone(),
            auth,
            protocol,
            broadcaster: broadcaster.clone(),
            login,
            directory,
            session_ttl: config.auth.session_ttl,
            ready: ready.clone(),
        });

        Arc::new(Self {
            config,
            credential_sync,
            project_sync,
            store,
            broadcaster,
            state,
            ready,
            stopping: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Start the sync services, open the store and serve until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.start_collaborators().await {
            // Crash-safe: whatever a failed start left behind gets the
            // full teardown.
            self.shutdown().await;
            return Err(e);
        }

        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let listener = TcpListener::bind(addr).await?;

        self.ready.store(true, Ordering::SeqCst);

        info!("============================================================");
        info!("STEWARD GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        if self.config.auth.enabled {
            info!(
                login = self.config.auth.google_client_id.is_some(),
                "AUTHENTICATION enabled"
            );
        } else {
            warn!("AUTHENTICATION disabled - gateway is open to all requests");
        }
        info!("  POST /mcp  (protocol endpoint)");
        info!("  GET  /ws   (change notifications)");
        info!("============================================================");

        let app = create_router(self.state.clone());
        let mut graceful_rx = self.shutdown_tx.subscribe();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = graceful_rx.recv().await;
                })
                .await
        });

        // Serve until Ctrl+C or a programmatic shutdown.
        let mut stop_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C");
            }
            _ = stop_rx.recv() => {}
        }

        self.shutdown().await;

        // Race the graceful HTTP stop against a hard deadline so a hung
        // stop can never block process exit.
        match tokio::time::timeout(self.config.server.shutdown_timeout, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server exited with error"),
            Ok(Err(e)) => warn!(error = %e, "HTTP server task failed"),
            Err(_) => {
                warn!("Graceful HTTP stop timed out, abandoning listener");
                server.abort();
            }
        }

        info!("Gateway stopped");
        Ok(())
    }

    async fn start_collaborators(&self) -> Result<()> {
        if let Some(sync) = &self.credential_sync {
            sync.start().await?;
        }
        if let Some(sync) = &self.project_sync {
            sync.start().await?;
        }

        // Subscribe before the store announces readiness so the
        // broadcaster sees the full feed from `Ready` onward.
        self.broadcaster.attach(self.store.as_ref());
        self.store.open();
        Ok(())
    }

    /// Ordered, idempotent teardown. A second concurrent call is a no-op.
    ///
    /// Sequence: stop consuming store events (which also releases the
    /// store subscription) → take the protocol gateway out of service →
    /// stop the credential sync (its poll timer is cancelled before its
    /// clone is deleted) → stop the project sync → force-close all client
    /// connections → begin the graceful HTTP stop.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down gateway");

        self.broadcaster.detach();
        self.ready.store(false, Ordering::SeqCst);

        if let Some(sync) = &self.credential_sync {
            sync.stop().await;
        }
        if let Some(sync) = &self.project_sync {
            sync.stop().await;
        }

        self.broadcaster.close_all();
        let _ = self.shutdown_tx.send(());
    }
}

/// Build the store-backed registries served over the protocol surface.
///
/// The handlers delegate straight to [`crate::store::ContentStore`]
/// accessors; anything
/// smarter than that belongs to the business layer, not the gateway.
fn store_registries(
    store: &Arc<FileStore>,
) -> (ToolRegistry, ResourceRegistry, PromptRegistry) {
    use crate::mcp::{Prompt, PromptArgument, Resource, Tool};

    let mut tools = ToolRegistry::new();

    let tasks_store = store.clone();
    tools.register(
        Tool {
            name: "tasks_list".to_string(),
            description: Some("List all task identifiers in the project".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolAccess::Read,
        handler(move |_args| {
            let store = tasks_store.clone();
            async move { store.tasks().await }
        }),
    );

    let config_store = store.clone();
    tools.register(
        Tool {
            name: "config_get".to_string(),
            description: Some("Read the project configuration".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolAccess::Read,
        handler(move |_args| {
            let store = config_store.clone();
            async move { store.config().await }
        }),
    );

    let write_store = store.clone();
    tools.register(
        Tool {
            name: "config_set".to_string(),
            description: Some("Replace the project configuration".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"config": {"type": "object"}},
                "required": ["config"]
            }),
        },
        ToolAccess::Write,
        handler(move |args| {
            let store = write_store.clone();
            async move {
                let config = args
                    .get("config")
                    .cloned()
                    .ok_or_else(|| Error::json_rpc(-32602, "Missing 'config' argument"))?;
                store.write_config(config).await?;
                Ok(json!({"ok": true}))
            }
        }),
    );

    let mut resources = ResourceRegistry::new();

    let tasks_resource_store = store.clone();
    resources.register(
        Resource {
            uri: "steward://tasks".to_string(),
            name: "tasks".to_string(),
            description: Some("Task listing".to_string()),
            mime_type: Some("application/json".to_string()),
        },
        handler(move |_args| {
            let store = tasks_resource_store.clone();
            async move { store.tasks().await }
        }),
    );

    let config_resource_store = store.clone();
    resources.register(
        Resource {
            uri: "steward://config".to_string(),
            name: "config".to_string(),
            description: Some("Project configuration".to_string()),
            mime_type: Some("application/json".to_string()),
        },
        handler(move |_args| {
            let store = config_resource_store.clone();
            async move { store.config().await }
        }),
    );

    let mut prompts = PromptRegistry::new();
    prompts.register(
        Prompt {
            name: "project_status".to_string(),
            description: Some("Summarize the current project state".to_string()),
            arguments: vec![PromptArgument {
                name: "focus".to_string(),
                description: Some("Optional area to focus the summary on".to_string()),
                required: false,
            }],
        },
        handler(|args| async move {
            let focus = args
                .get("focus")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("the whole project");
            Ok(json!([{
                "role": "user",
                "content": {
                    "type": "text",
                    "text": format!(
                        "Review the tasks and milestones and summarize the status of {focus}."
                    )
                }
            }]))
        }),
    );

    (tools, resources, prompts)
}
