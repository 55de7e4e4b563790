//! Client-server connection management
//!
//! Provides the WebSocket connection to the multiplexer service with
//! automatic JSON framing, bounded-backoff reconnection and typed dispatch.

mod client;
mod dispatch;

pub use client::{Connection, ConnectionConfig, ConnectionState, WireSender};
pub use dispatch::{HandlerId, Registry};
