//! Wire envelope and message types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Session, Window};

/// Wire envelope carrying a single message
///
/// `id` and `timestamp` are generated client-side at send time. The server
/// may echo `id` as `original_message_id` in an `error` reply to correlate
/// failures; no other request/response correlation exists on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub id: String,
    #[serde(flatten)]
    pub message: Message,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
}

impl Envelope {
    /// Wrap a message in a fresh envelope with a new id and current timestamp
    pub fn new(message: Message) -> Self {
        Self {
            id: format!("msg-{}", Uuid::new_v4().as_simple()),
            message,
            timestamp: unix_millis(),
            encrypted: None,
        }
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Protocol messages, serialized as `{"type": ..., "payload": {...}}`
///
/// Client to server unless noted otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// Handshake, sent as soon as the transport opens
    Connect {
        client_type: String,
        version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Handshake acknowledgment (server to client)
    ConnectAck {
        success: bool,
        server_version: String,
        encryption_enabled: bool,
    },

    /// Request the list of sessions
    ListSessions {},

    ListSessionsResponse {
        sessions: Vec<Session>,
    },

    /// Create a new session
    CreateSession {
        name: String,
    },

    /// `session` may be absent on failure; index and attached flags inside it
    /// are server-computed
    CreateSessionResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<Session>,
    },

    /// Delete a session by name
    DeleteSession {
        session_name: String,
    },

    DeleteSessionResponse {
        success: bool,
        session_name: String,
    },

    /// Rename a session; the session's identity changes with its name
    RenameSession {
        old_name: String,
        new_name: String,
    },

    RenameSessionResponse {
        success: bool,
        old_name: String,
        new_name: String,
    },

    /// Request the windows of a session
    ListWindows {
        session_name: String,
    },

    ListWindowsResponse {
        session_name: String,
        windows: Vec<Window>,
    },

    /// Make a window the active one in its session
    SwitchWindow {
        session_name: String,
        window_index: u32,
    },

    SwitchWindowResponse {
        success: bool,
        session_name: String,
        window_index: u32,
        window_name: String,
    },

    /// Run a command in a session's window
    ExecuteCommand {
        session_name: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_index: Option<u32>,
    },

    ExecuteCommandResponse {
        success: bool,
        session_name: String,
    },

    /// Pull the current rendered output for a session/window pair
    CaptureOutput {
        session_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_index: Option<u32>,
    },

    CaptureOutputResponse {
        session_name: String,
        output: String,
    },

    /// Server error, unsolicited or correlated via `original_message_id`
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_message_id: Option<String>,
    },
}

impl Message {
    /// Dispatch key for this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Connect { .. } => MessageKind::Connect,
            Message::ConnectAck { .. } => MessageKind::ConnectAck,
            Message::ListSessions {} => MessageKind::ListSessions,
            Message::ListSessionsResponse { .. } => MessageKind::ListSessionsResponse,
            Message::CreateSession { .. } => MessageKind::CreateSession,
            Message::CreateSessionResponse { .. } => MessageKind::CreateSessionResponse,
            Message::DeleteSession { .. } => MessageKind::DeleteSession,
            Message::DeleteSessionResponse { .. } => MessageKind::DeleteSessionResponse,
            Message::RenameSession { .. } => MessageKind::RenameSession,
            Message::RenameSessionResponse { .. } => MessageKind::RenameSessionResponse,
            Message::ListWindows { .. } => MessageKind::ListWindows,
            Message::ListWindowsResponse { .. } => MessageKind::ListWindowsResponse,
            Message::SwitchWindow { .. } => MessageKind::SwitchWindow,
            Message::SwitchWindowResponse { .. } => MessageKind::SwitchWindowResponse,
            Message::ExecuteCommand { .. } => MessageKind::ExecuteCommand,
            Message::ExecuteCommandResponse { .. } => MessageKind::ExecuteCommandResponse,
            Message::CaptureOutput { .. } => MessageKind::CaptureOutput,
            Message::CaptureOutputResponse { .. } => MessageKind::CaptureOutputResponse,
            Message::Error { .. } => MessageKind::Error,
        }
    }
}

/// Fieldless mirror of [`Message`], used as the dispatch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connect,
    ConnectAck,
    ListSessions,
    ListSessionsResponse,
    CreateSession,
    CreateSessionResponse,
    DeleteSession,
    DeleteSessionResponse,
    RenameSession,
    RenameSessionResponse,
    ListWindows,
    ListWindowsResponse,
    SwitchWindow,
    SwitchWindowResponse,
    ExecuteCommand,
    ExecuteCommandResponse,
    CaptureOutput,
    CaptureOutputResponse,
    Error,
}

impl MessageKind {
    /// Message type name as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::ConnectAck => "connect_ack",
            MessageKind::ListSessions => "list_sessions",
            MessageKind::ListSessionsResponse => "list_sessions_response",
            MessageKind::CreateSession => "create_session",
            MessageKind::CreateSessionResponse => "create_session_response",
            MessageKind::DeleteSession => "delete_session",
            MessageKind::DeleteSessionResponse => "delete_session_response",
            MessageKind::RenameSession => "rename_session",
            MessageKind::RenameSessionResponse => "rename_session_response",
            MessageKind::ListWindows => "list_windows",
            MessageKind::ListWindowsResponse => "list_windows_response",
            MessageKind::SwitchWindow => "switch_window",
            MessageKind::SwitchWindowResponse => "switch_window_response",
            MessageKind::ExecuteCommand => "execute_command",
            MessageKind::ExecuteCommandResponse => "execute_command_response",
            MessageKind::CaptureOutput => "capture_output",
            MessageKind::CaptureOutputResponse => "capture_output_response",
            MessageKind::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
