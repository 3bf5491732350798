//! WebSocket gateway: connection registry and socket handling

pub mod connections;
pub mod handler;

pub use connections::{ConnectionRegistry, CAP_TOOL_EVENTS};
pub use handler::gateway_ws_handler;
