//! Steward Gateway Library
//!
//! Authorization and protocol gateway for a project-management tool whose
//! state lives as files in a git repository.
//!
//! # Features
//!
//! - **Dual authentication**: signed session tokens for the browser UI,
//!   static API keys for agent/MCP clients
//! - **Role-scoped capabilities**: per-request tool filtering, enforced
//!   before any business logic runs
//! - **Repo sync**: ephemeral local clones of the credential and project
//!   repositories, with background refresh for credentials
//! - **Live updates**: change notifications fanned out to every connected
//!   WebSocket client, with startup-noise coalescing
//!
//! # Protocol Version
//!
//! The MCP surface implements protocol version 2024-11-05.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod capability;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod registry;
pub mod store;
pub mod sync;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// MCP Protocol version supported by this gateway
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
