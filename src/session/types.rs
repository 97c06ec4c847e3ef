//! Session lifecycle types

use serde::Serialize;

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    /// Configured, workers not started
    #[default]
    Configured,
    /// Workers running, ticks accepted
    Running,
    /// Workers joined and the final rotation done
    Stopped,
}

impl SessionState {
    /// Check if the workers are running
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }

    /// Check if the session has been shut down
    pub fn is_stopped(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }

    /// Display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionState::Configured => "Configured",
            SessionState::Running => "Running",
            SessionState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}
