//! Client-visible model maintained by the reconciler
//!
//! The rendering layer reads these fields and nothing else; it never
//! duplicates state.

use muxlink_protocol::{Session, Window};

/// Display-only cap on rendered output lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollbackMode {
    /// Render everything the server captured
    Full,
    /// Render only the last `n` lines
    Tail(usize),
}

impl ScrollbackMode {
    /// Map the persisted preference (a line count, or none for full)
    pub fn from_lines(lines: Option<u32>) -> Self {
        match lines {
            Some(n) => ScrollbackMode::Tail(n as usize),
            None => ScrollbackMode::Full,
        }
    }

    /// Apply the cap to a raw capture
    pub(crate) fn apply(&self, output: &str) -> String {
        match *self {
            ScrollbackMode::Full => output.to_string(),
            ScrollbackMode::Tail(limit) => {
                let lines: Vec<&str> = output.lines().collect();
                if lines.len() <= limit {
                    output.to_string()
                } else {
                    lines[lines.len() - limit..].join("\n")
                }
            }
        }
    }
}

/// The reconciler's view of server state
///
/// Created empty at startup; `sessions` is replaced wholesale on every list
/// refresh, individual fields are patched optimistically on mutation
/// responses, and everything is cleared when the connection drops or the
/// user deselects.
#[derive(Debug, Clone, Default)]
pub struct ClientModel {
    /// All sessions, as of the last `list_sessions_response`
    pub sessions: Vec<Session>,
    /// Currently selected session, if any
    pub selected_session: Option<Session>,
    /// Windows of the selected session
    pub windows: Vec<Window>,
    /// Locally tracked window selection; may transiently disagree with the
    /// server while a switch is in flight
    pub selected_window_index: u32,
    /// Last raw output as received; diff basis, compared before truncation
    pub last_raw_output: Option<String>,
    /// Output as the view should render it (scrollback cap applied,
    /// optimistic command echoes included)
    pub rendered_output: String,
    /// Bumps only when `rendered_output` actually changes
    pub render_revision: u64,
    /// Invalidates in-flight captures made stale by a context switch;
    /// strictly monotonic
    pub output_generation: u64,
}

impl ClientModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the selected session, if any
    pub fn selected_name(&self) -> Option<&str> {
        self.selected_session.as_ref().map(|s| s.name.as_str())
    }

    /// Drop all server-derived state, keeping the generation monotonic
    pub(crate) fn clear(&mut self) {
        self.sessions.clear();
        self.selected_session = None;
        self.windows.clear();
        self.selected_window_index = 0;
        self.last_raw_output = None;
        self.output_generation += 1;
        if !self.rendered_output.is_empty() {
            self.rendered_output.clear();
            self.render_revision += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrollback_full_passthrough() {
        let mode = ScrollbackMode::Full;
        assert_eq!(mode.apply("a\nb\nc"), "a\nb\nc");
    }

    #[test]
    fn test_scrollback_tail_caps_lines() {
        let mode = ScrollbackMode::Tail(2);
        assert_eq!(mode.apply("a\nb\nc\nd"), "c\nd");
    }

    #[test]
    fn test_scrollback_tail_shorter_than_cap() {
        let mode = ScrollbackMode::Tail(10);
        assert_eq!(mode.apply("a\nb"), "a\nb");
    }

    #[test]
    fn test_scrollback_from_lines() {
        assert_eq!(ScrollbackMode::from_lines(None), ScrollbackMode::Full);
        assert_eq!(
            ScrollbackMode::from_lines(Some(200)),
            ScrollbackMode::Tail(200)
        );
    }

    #[test]
    fn test_clear_keeps_generation_monotonic() {
        let mut model = ClientModel::new();
        model.output_generation = 7;
        model.rendered_output = "stale".to_string();
        model.render_revision = 3;

        model.clear();
        assert!(model.output_generation > 7);
        assert!(model.rendered_output.is_empty());
        assert_eq!(model.render_revision, 4);

        // Clearing an already-empty transcript is not a render change
        let revision = model.render_revision;
        model.clear();
        assert_eq!(model.render_revision, revision);
    }
}
