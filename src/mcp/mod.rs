//! MCP protocol types and the per-call scoped server

mod messages;
mod server;
mod types;

pub use messages::*;
pub use server::ScopedServer;
pub use types::*;

/// MCP protocol version served by this gateway
pub const PROTOCOL_VERSION: &str = "2024-11-05";
