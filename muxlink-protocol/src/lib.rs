//! muxlink-protocol: Shared wire definitions for client-server communication
//!
//! This crate defines the JSON envelope, the message set and the data
//! structures exchanged between the muxlink client and the multiplexer
//! service over a message-oriented duplex connection.

pub mod codec;
pub mod envelope;
pub mod types;

// Re-export main types at crate root
pub use codec::{decode, encode, CodecError};
pub use envelope::{Envelope, Message, MessageKind};
pub use types::{Session, Window};

/// Protocol version string sent in the `connect` handshake
pub const PROTOCOL_VERSION: &str = "1.0.0";
