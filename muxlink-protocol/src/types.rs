use serde::{Deserialize, Serialize};

/// Session information as reported by the server
///
/// The service derives `id` from `name`, so a rename changes identity.
/// Ids must always be re-derived from the current name via
/// [`Session::id_for_name`], never cached across a rename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub windows: Vec<Window>,
    pub created_at: u64, // Unix timestamp (ms)
    #[serde(default)]
    pub attached: bool,
}

impl Session {
    /// Derive the server-side identity for a session name
    pub fn id_for_name(name: &str) -> String {
        format!("session-{name}")
    }

    /// The window the server reports as active, if any
    pub fn active_window(&self) -> Option<&Window> {
        self.windows.iter().find(|w| w.active)
    }
}

/// Window information
///
/// `index` is unique within a session and provides stable ordering.
/// Exactly one window per session is active from the server's point of view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Window {
    pub id: String,
    pub name: String,
    pub index: u32,
    pub active: bool,
    pub pane_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(index: u32, active: bool) -> Window {
        Window {
            id: format!("@{index}"),
            name: format!("win-{index}"),
            index,
            active,
            pane_id: format!("%{index}"),
        }
    }

    #[test]
    fn test_id_for_name() {
        assert_eq!(Session::id_for_name("build"), "session-build");
        assert_eq!(Session::id_for_name("a b"), "session-a b");
    }

    #[test]
    fn test_id_changes_with_name() {
        // A renamed session gets a new identity
        assert_ne!(Session::id_for_name("old"), Session::id_for_name("new"));
    }

    #[test]
    fn test_active_window() {
        let session = Session {
            id: Session::id_for_name("test"),
            name: "test".to_string(),
            windows: vec![window(0, false), window(1, true), window(2, false)],
            created_at: 0,
            attached: false,
        };

        assert_eq!(session.active_window().map(|w| w.index), Some(1));
    }

    #[test]
    fn test_active_window_none() {
        let session = Session {
            id: Session::id_for_name("test"),
            name: "test".to_string(),
            windows: vec![],
            created_at: 0,
            attached: false,
        };

        assert!(session.active_window().is_none());
    }

    #[test]
    fn test_session_serde_roundtrip() {
        let session = Session {
            id: Session::id_for_name("dev"),
            name: "dev".to_string(),
            windows: vec![window(0, true)],
            created_at: 1704067200000,
            attached: true,
        };

        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(session, back);
    }

    #[test]
    fn test_session_defaults_for_missing_fields() {
        // Servers may omit windows/attached for lightweight listings
        let json = r#"{"id":"session-x","name":"x","created_at":0}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert!(session.windows.is_empty());
        assert!(!session.attached);
    }

    #[test]
    fn test_window_wire_field_names() {
        let w = window(3, false);
        let value = serde_json::to_value(&w).unwrap();
        assert!(value.get("pane_id").is_some());
        assert_eq!(value["index"], 3);
    }
}
