//! muxlink client core
//!
//! Connection management, typed message dispatch and the
//! session/window/output reconciler. A rendering layer consumes
//! [`ClientModel`] and drives the reconciler's intents; everything in this
//! crate is headless.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod events;
pub mod reconciler;

pub use client::Client;
pub use config::{Preferences, Theme};
pub use connection::{Connection, ConnectionConfig, ConnectionState, HandlerId, Registry, WireSender};
pub use events::{CaptureTag, ClientEvent};
pub use reconciler::{ClientModel, Reconciler, ReconcilerConfig, ScrollbackMode};
