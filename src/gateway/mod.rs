//! Gateway composition: HTTP surface, protocol dispatch, change fan-out
//! and lifecycle

pub mod broadcast;
pub mod protocol;
mod router;
mod server;

pub use broadcast::ChangeBroadcaster;
pub use protocol::{ProtocolGateway, ProtocolReply};
pub use router::{AppState, create_router};
pub use server::GatewayOrchestrator;
