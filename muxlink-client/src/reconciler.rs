//! Session/window/output reconciler
//!
//! Turns user intents and asynchronous server replies into a consistent
//! [`ClientModel`], despite unordered delivery, a fixed-interval output
//! polling loop and identity changes from renames. Runs entirely on the
//! client's single event loop; the only concurrent pieces are the timers it
//! owns, which fire back into that loop.

mod model;

pub use model::{ClientModel, ScrollbackMode};

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;

use muxlink_protocol::{Envelope, Message, MessageKind, Session, Window};

use crate::connection::{Registry, WireSender};
use crate::events::{CaptureTag, ClientEvent};

/// Timing configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Fixed output-poll period while a session is selected
    pub poll_period: Duration,
    /// Delay before the out-of-band capture that follows a command
    pub capture_followup_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(1),
            capture_followup_delay: Duration::from_millis(300),
        }
    }
}

/// Rename confirmed but not yet reconciled by a list refresh
#[derive(Debug, Clone)]
struct PendingRename {
    old_name: String,
    new_name: String,
}

/// The stateful core: owns the client model and drives the
/// request/response choreography over a [`WireSender`]
pub struct Reconciler {
    config: ReconcilerConfig,
    sender: WireSender,
    events: mpsc::UnboundedSender<ClientEvent>,
    model: ClientModel,
    scrollback: ScrollbackMode,
    pending_rename: Option<PendingRename>,
    /// FIFO of generation tags for in-flight captures; the protocol has no
    /// request/response ids, so this is the only correlation there is
    pending_captures: VecDeque<CaptureTag>,
    last_error: Option<String>,
    server_version: Option<String>,
    poll_task: Option<tokio::task::JoinHandle<()>>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        sender: WireSender,
        events: mpsc::UnboundedSender<ClientEvent>,
        scrollback: ScrollbackMode,
    ) -> Self {
        Self {
            config,
            sender,
            events,
            model: ClientModel::new(),
            scrollback,
            pending_rename: None,
            pending_captures: VecDeque::new(),
            last_error: None,
            server_version: None,
            poll_task: None,
        }
    }

    /// Subscribe the reconciler to every reply kind it consumes
    pub fn register(registry: &mut Registry<Reconciler>) {
        const KINDS: [MessageKind; 10] = [
            MessageKind::ConnectAck,
            MessageKind::ListSessionsResponse,
            MessageKind::CreateSessionResponse,
            MessageKind::DeleteSessionResponse,
            MessageKind::RenameSessionResponse,
            MessageKind::ListWindowsResponse,
            MessageKind::SwitchWindowResponse,
            MessageKind::ExecuteCommandResponse,
            MessageKind::CaptureOutputResponse,
            MessageKind::Error,
        ];
        for kind in KINDS {
            registry.on(
                kind,
                Box::new(|reconciler: &mut Reconciler, envelope: &Envelope| {
                    reconciler.handle(&envelope.message)
                }),
            );
        }
    }

    // ==================== Accessors ====================

    pub fn model(&self) -> &ClientModel {
        &self.model
    }

    /// Last application-level failure, for display
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Server version reported in the handshake ack
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.is_some()
    }

    // ==================== User intents ====================

    /// Request a fresh session list
    pub fn refresh_sessions(&mut self) {
        self.sender.send(Message::ListSessions {});
    }

    /// Create a session; the model refreshes when the reply lands
    pub fn create_session(&mut self, name: impl Into<String>) {
        self.sender.send(Message::CreateSession { name: name.into() });
    }

    /// Delete a session
    ///
    /// When the victim is selected, selection and polling are torn down
    /// before the confirmation arrives: continuing to poll a deleted
    /// session only yields errors.
    pub fn delete_session(&mut self, name: &str) {
        if self.model.selected_name() == Some(name) {
            self.stop_polling();
            self.model.selected_session = None;
            self.model.windows.clear();
            self.model.selected_window_index = 0;
            self.clear_output();
        }
        self.sender.send(Message::DeleteSession {
            session_name: name.to_string(),
        });
    }

    /// Rename a session; local state is patched when the reply lands
    pub fn rename_session(&mut self, old_name: &str, new_name: &str) {
        self.sender.send(Message::RenameSession {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        });
    }

    /// Select a session from the current list and start polling its output
    pub fn select_session(&mut self, name: &str) {
        let Some(session) = self.model.sessions.iter().find(|s| s.name == name).cloned() else {
            self.last_error = Some(format!("unknown session: {name}"));
            return;
        };

        self.model.selected_window_index =
            session.active_window().map(|w| w.index).unwrap_or(0);
        self.model.windows = session.windows.clone();
        self.model.selected_session = Some(session);
        self.pending_rename = None;

        self.reset_output_context();
        self.sender.send(Message::ListWindows {
            session_name: name.to_string(),
        });
    }

    /// Drop the selection and stop polling
    pub fn deselect(&mut self) {
        self.stop_polling();
        self.pending_captures.clear();
        self.model.selected_session = None;
        self.model.windows.clear();
        self.model.selected_window_index = 0;
        self.clear_output();
    }

    /// Ask the server to switch the active window of the selected session
    pub fn switch_window(&mut self, window_index: u32) {
        let Some(name) = self.model.selected_name() else {
            return;
        };
        self.sender.send(Message::SwitchWindow {
            session_name: name.to_string(),
            window_index,
        });
    }

    /// Run a command in the selected session's window
    ///
    /// The command is echoed into the transcript immediately; one
    /// out-of-band capture is scheduled to pick up its effect sooner than
    /// the next poll tick.
    pub fn execute_command(&mut self, command: &str) {
        let Some(name) = self.model.selected_name().map(str::to_string) else {
            self.last_error = Some("no session selected".to_string());
            return;
        };

        self.sender.send(Message::ExecuteCommand {
            session_name: name,
            command: command.to_string(),
            window_index: Some(self.model.selected_window_index),
        });

        if !self.model.rendered_output.is_empty() && !self.model.rendered_output.ends_with('\n') {
            self.model.rendered_output.push('\n');
        }
        self.model.rendered_output.push_str(&format!("$ {command}\n"));
        self.model.render_revision += 1;

        if let Some(tag) = self.current_tag() {
            let events = self.events.clone();
            let delay = self.config.capture_followup_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(ClientEvent::CaptureDue(tag));
            });
        }
    }

    /// Change the display line cap
    ///
    /// The cached output is not guaranteed to retain enough history for a
    /// new cap, so this forces a fresh capture instead of re-rendering the
    /// cached value.
    pub fn set_scrollback(&mut self, mode: ScrollbackMode) {
        if self.scrollback == mode {
            return;
        }
        self.scrollback = mode;
        if self.model.selected_session.is_some() {
            self.reset_output_context();
        }
    }

    // ==================== Connection lifecycle ====================

    /// The transport dropped: stop polling and clear the model
    pub fn on_disconnected(&mut self) {
        self.stop_polling();
        self.pending_captures.clear();
        self.pending_rename = None;
        self.server_version = None;
        self.model.clear();
    }

    // ==================== Timer callbacks ====================

    /// A poll tick fired; `tag` was captured when the timer was scheduled
    pub fn on_poll_tick(&mut self, tag: CaptureTag) {
        // A tick already queued when the context switched carries a stale
        // tag; the replacement timer covers the new context.
        if !self.tag_is_current(&tag) {
            return;
        }
        self.issue_capture(tag);
    }

    /// The post-execute capture delay elapsed
    pub fn on_capture_due(&mut self, tag: CaptureTag) {
        if !self.tag_is_current(&tag) {
            return;
        }
        self.issue_capture(tag);
    }

    // ==================== Server replies ====================

    /// Apply one server message to the model
    pub fn handle(&mut self, message: &Message) {
        match message {
            Message::ConnectAck {
                success,
                server_version,
                ..
            } => self.on_connect_ack(*success, server_version),
            Message::ListSessionsResponse { sessions } => self.on_session_list(sessions),
            Message::CreateSessionResponse { success, session } => {
                self.on_create_response(*success, session.as_ref())
            }
            Message::DeleteSessionResponse {
                success,
                session_name,
            } => self.on_delete_response(*success, session_name),
            Message::RenameSessionResponse {
                success,
                old_name,
                new_name,
            } => self.on_rename_response(*success, old_name, new_name),
            Message::ListWindowsResponse {
                session_name,
                windows,
            } => self.on_window_list(session_name, windows),
            Message::SwitchWindowResponse {
                success,
                session_name,
                window_index,
                ..
            } => self.on_switch_response(*success, session_name, *window_index),
            Message::ExecuteCommandResponse {
                success,
                session_name,
            } => self.on_execute_response(*success, session_name),
            Message::CaptureOutputResponse {
                session_name,
                output,
            } => self.on_capture_response(session_name, output),
            Message::Error { code, message, .. } => self.on_error(code, message),
            // Requests are never dispatched back to the client
            _ => {}
        }
    }

    fn on_connect_ack(&mut self, success: bool, server_version: &str) {
        if success {
            tracing::info!(server_version, "server acknowledged connection");
            self.server_version = Some(server_version.to_string());
            self.last_error = None;
            self.refresh_sessions();
        } else {
            self.last_error = Some("connection rejected by server".to_string());
        }
    }

    fn on_session_list(&mut self, sessions: &[Session]) {
        self.model.sessions = sessions.to_vec();

        // A confirmed rename settles here: re-resolve the selection by its
        // new name, then drop the pending state.
        let selected_name = match (self.pending_rename.take(), self.model.selected_name()) {
            (Some(rename), Some(_)) => {
                tracing::debug!(from = %rename.old_name, to = %rename.new_name, "rename reconciled");
                Some(rename.new_name)
            }
            (None, Some(name)) => Some(name.to_string()),
            _ => None,
        };

        if let Some(name) = selected_name {
            if let Some(fresh) = self.model.sessions.iter().find(|s| s.name == name).cloned() {
                self.model.selected_session = Some(fresh);
            }
            // A missing entry is transient (the list raced a mutation);
            // keep the local selection until a delete confirms otherwise.
        }
    }

    fn on_create_response(&mut self, success: bool, session: Option<&Session>) {
        if success {
            tracing::debug!(name = ?session.map(|s| s.name.as_str()), "session created");
            // Never trust the embedded session alone; index and attached
            // flags are server-computed, so refresh the authoritative list.
            self.refresh_sessions();
        } else {
            self.last_error = Some("failed to create session".to_string());
        }
    }

    fn on_delete_response(&mut self, success: bool, session_name: &str) {
        if !success {
            self.last_error = Some(format!("failed to delete session '{session_name}'"));
            return;
        }
        // Local teardown normally happened optimistically at intent time;
        // cover deletes that originated elsewhere too.
        if self.model.selected_name() == Some(session_name) {
            self.stop_polling();
            self.model.selected_session = None;
            self.model.windows.clear();
            self.model.selected_window_index = 0;
            self.clear_output();
        }
        self.refresh_sessions();
    }

    fn on_rename_response(&mut self, success: bool, old_name: &str, new_name: &str) {
        if !success {
            self.last_error = Some(format!("failed to rename session '{old_name}'"));
            return;
        }

        if self.model.selected_name() == Some(old_name) {
            // Patch immediately so captures issued before the next list
            // refresh go out under the new name. The id is derived from the
            // name and must never survive a rename.
            if let Some(selected) = &mut self.model.selected_session {
                selected.name = new_name.to_string();
                selected.id = Session::id_for_name(new_name);
            }
            // The running poll timer still carries the old name by value.
            self.start_polling();
        }

        self.pending_rename = Some(PendingRename {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        });
        self.refresh_sessions();
    }

    fn on_window_list(&mut self, session_name: &str, windows: &[Window]) {
        // Only the selected session's windows are modeled
        if self.model.selected_name() != Some(session_name) {
            return;
        }

        self.model.windows = windows.to_vec();
        let active = windows
            .iter()
            .find(|w| w.active)
            .map(|w| w.index)
            .unwrap_or(0);

        if self.model.selected_window_index != active {
            // The server's active window moved under us; the output context
            // now targets a different window.
            self.model.selected_window_index = active;
            self.reset_output_context();
        }
    }

    fn on_switch_response(&mut self, success: bool, session_name: &str, window_index: u32) {
        if !success {
            self.last_error = Some(format!("failed to switch window in '{session_name}'"));
            return;
        }
        if self.model.selected_name() != Some(session_name) {
            return;
        }

        self.model.selected_window_index = window_index;
        self.reset_output_context();
        self.sender.send(Message::ListWindows {
            session_name: session_name.to_string(),
        });
    }

    fn on_execute_response(&mut self, success: bool, session_name: &str) {
        if success {
            tracing::debug!(session = session_name, "command delivered");
        } else {
            self.last_error = Some(format!("command failed in '{session_name}'"));
        }
    }

    fn on_capture_response(&mut self, session_name: &str, output: &str) {
        let Some(tag) = self.take_capture_tag(session_name) else {
            tracing::trace!(session = session_name, "unsolicited capture, ignoring");
            return;
        };
        if tag.generation < self.model.output_generation {
            tracing::trace!(session = session_name, "discarding stale capture");
            return;
        }
        if self.model.selected_name() != Some(session_name) {
            return;
        }

        // Diff on the raw payload, before any truncation, so scrollback
        // settings can change without suppressing genuinely new output.
        if self.model.last_raw_output.as_deref() == Some(output) {
            return;
        }

        self.model.last_raw_output = Some(output.to_string());
        self.model.rendered_output = self.scrollback.apply(output);
        self.model.render_revision += 1;
    }

    fn on_error(&mut self, code: &str, message: &str) {
        // Connection-scoped or correlated, either way it is surfaced as a
        // short-lived message and nothing else changes. Capture failures in
        // particular are retried implicitly by the next poll tick.
        tracing::warn!(code, message, "server error");
        self.last_error = Some(message.to_string());
    }

    // ==================== Output polling ====================

    /// Reset the output context: new generation, cleared transcript, and a
    /// freshly scheduled poll timer (with an immediate capture)
    fn reset_output_context(&mut self) {
        self.clear_output();
        self.start_polling();
    }

    fn clear_output(&mut self) {
        self.model.output_generation += 1;
        self.model.last_raw_output = None;
        if !self.model.rendered_output.is_empty() {
            self.model.rendered_output.clear();
            self.model.render_revision += 1;
        }
    }

    /// Cancel-then-start the poll timer for the current selection
    ///
    /// The timer's tag is captured by value here; ticks never read mutable
    /// state at fire time.
    fn start_polling(&mut self) {
        self.stop_polling();
        let Some(tag) = self.current_tag() else {
            return;
        };

        self.issue_capture(tag.clone());

        let events = self.events.clone();
        let period = self.config.poll_period;
        self.poll_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The immediate capture above stands in for the first tick
            interval.tick().await;
            loop {
                interval.tick().await;
                if events.send(ClientEvent::PollTick(tag.clone())).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    fn current_tag(&self) -> Option<CaptureTag> {
        self.model.selected_session.as_ref().map(|s| CaptureTag {
            session_name: s.name.clone(),
            window_index: self.model.selected_window_index,
            generation: self.model.output_generation,
        })
    }

    fn tag_is_current(&self, tag: &CaptureTag) -> bool {
        tag.generation == self.model.output_generation
            && self.model.selected_name() == Some(tag.session_name.as_str())
            && tag.window_index == self.model.selected_window_index
    }

    /// Send a capture request and record its tag for response correlation
    fn issue_capture(&mut self, tag: CaptureTag) {
        self.sender.send(Message::CaptureOutput {
            session_name: tag.session_name.clone(),
            window_index: Some(tag.window_index),
        });
        self.pending_captures.push_back(tag);
    }

    fn take_capture_tag(&mut self, session_name: &str) -> Option<CaptureTag> {
        let pos = self
            .pending_captures
            .iter()
            .position(|t| t.session_name == session_name)?;
        self.pending_captures.remove(pos)
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
