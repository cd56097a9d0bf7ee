//! Session lifecycle states.

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Excluded from runs by configuration or operator action
    Disabled,
    /// Enabled but no auth artefact; needs interactive enrolment
    NotLoggedIn,
    /// Login in progress (at most one session at a time)
    LoggingIn,
    /// Connected and authenticated; eligible for work
    LoggedIn,
    /// Login attempted and failed
    LoginFailed,
    /// Unrecoverable error mid-run; kept in the pool for inspection
    Error,
}

impl SessionState {
    /// Whether the session can be handed work.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::LoggedIn)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::NotLoggedIn => "not_logged_in",
            Self::LoggingIn => "logging_in",
            Self::LoggedIn => "logged_in",
            Self::LoginFailed => "login_failed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
