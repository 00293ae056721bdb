//! switchboard-gateway — real-time broadcast channel for switchboard
//!
//! Provides a WebSocket server that observers connect to for submitting
//! tasks, querying agent status and memory, and receiving task-completion
//! events fanned out to every open connection.

pub mod clients;
pub mod protocol;
pub mod server;

pub use clients::{BroadcastReport, ClientRegistry, OUTBOUND_QUEUE_CAPACITY};
pub use protocol::{ClientMessage, ServerMessage, SystemInfo};
pub use server::{Dispatch, GatewayServer, GatewayState, handle_message};
