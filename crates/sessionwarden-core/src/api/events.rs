use std::fmt;

/// Events broadcast by the transport to whoever renders notifications or
/// owns navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A call failed in a way the user should be told about.
    Notice(Notice),
    /// A token refresh failed and the session was terminated. The receiver
    /// is expected to route the user back to the login entry point.
    SessionExpired,
}

/// User-visible failure classes, by response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    ServerError,
    PermissionDenied,
    NotFound,
    Network,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::ServerError => "Internal server error. Please try again later.",
            Notice::PermissionDenied => "Access denied. You don't have permission for this action.",
            Notice::NotFound => "Resource not found.",
            Notice::Network => "Connection error. Check your internet connection.",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
