//! Current-session state threaded through submissions.

/// The session the next run continues, if any.
///
/// Owned by the submission controller. An empty state means "ask the backend
/// for a new session": the request then carries an empty `session_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    current: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known session id.
    #[must_use]
    pub fn with_session(session_id: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.init(session_id);
        state
    }

    /// Adopt `session_id` as the current session. Empty ids are ignored.
    pub fn init(&mut self, session_id: impl Into<String>) {
        let id = session_id.into();
        if id.trim().is_empty() {
            return;
        }
        if self.current.as_deref() != Some(id.as_str()) {
            tracing::debug!(session_id = %id, "Current session set");
        }
        self.current = Some(id);
    }

    /// Forget the current session. Returns the id that was dropped.
    pub fn clear(&mut self) -> Option<String> {
        self.current.take()
    }

    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Value for the request's `session_id` field.
    #[must_use]
    pub fn request_value(&self) -> &str {
        self.current.as_deref().unwrap_or("")
    }
}
