//! Command-line argument parsing

use clap::Parser;

use crate::config::Preferences;

/// Fixed service port used when deriving an endpoint from a bare host
pub const DEFAULT_SERVICE_PORT: u16 = 8080;

/// Derive the default endpoint URL from a host
pub fn default_server_url(host: &str) -> String {
    format!("ws://{host}:{DEFAULT_SERVICE_PORT}/ws")
}

/// muxlink - remote terminal-multiplexer client
#[derive(Debug, Parser)]
#[command(name = "muxlink", version, about)]
pub struct Args {
    /// WebSocket endpoint, e.g. ws://host:8080/ws
    #[arg(long, env = "MUXLINK_SERVER")]
    pub server: Option<String>,

    /// Auth token passed in the connect handshake
    #[arg(long, env = "MUXLINK_TOKEN")]
    pub token: Option<String>,

    /// Host to derive the endpoint from when no URL is configured
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Session to select once connected
    #[arg(long, short)]
    pub session: Option<String>,

    /// List sessions and exit
    #[arg(long)]
    pub list: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Endpoint resolution order: flag/env, saved preference, derived default
    pub fn resolve_url(&self, prefs: &Preferences) -> String {
        self.server
            .clone()
            .or_else(|| prefs.server.url.clone())
            .unwrap_or_else(|| default_server_url(&self.host))
    }

    /// Token resolution order: flag/env, saved preference
    pub fn resolve_token(&self, prefs: &Preferences) -> Option<String> {
        self.token.clone().or_else(|| prefs.server.token.clone())
    }
}
