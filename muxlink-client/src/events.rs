//! Event types for the client's single run-to-completion loop
//!
//! Transport callbacks and timer firings all funnel into one stream so that
//! every state transition happens on one logical tick, in arrival order.

use muxlink_protocol::Envelope;

/// Bookkeeping tag attached to every capture request
///
/// Captured by value when a timer is scheduled, so a tick can never read
/// switched-away state at fire time. A response whose tag carries an older
/// generation than the model's current one is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTag {
    pub session_name: String,
    pub window_index: u32,
    pub generation: u64,
}

/// Events delivered to the client event loop
#[derive(Debug)]
pub enum ClientEvent {
    /// Decoded message from the server
    Inbound(Envelope),
    /// The transport task ended (close or error)
    TransportClosed,
    /// A reconnect backoff timer fired
    ReconnectDue,
    /// The output poll timer fired
    PollTick(CaptureTag),
    /// The post-execute capture delay elapsed
    CaptureDue(CaptureTag),
}
