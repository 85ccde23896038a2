//! Error taxonomy for the PlexSubSetter core
//!
//! Every failure that crosses a component boundary is one of these
//! variants. Each variant carries the raw underlying text so users see the
//! real cause next to the suggested remediation.

use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SubsetterError>;

/// Closed set of failures surfaced by the core
#[derive(Debug, thiserror::Error)]
pub enum SubsetterError {
    /// Transient network or server failure
    #[error("Failed to connect to Plex server{}: {message}", fmt_target(.server))]
    Connectivity { server: String, message: String },

    /// Credentials or session token rejected
    #[error("Plex authentication failed: {0}")]
    Authentication(String),

    /// Library, item or stream no longer exists
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// An operation did not finish within its deadline
    #[error("{operation} timed out after {}s", .timeout.as_secs_f64())]
    Timeout { operation: String, timeout: Duration },

    /// Subtitle provider search or download failure
    #[error("Subtitle provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

fn fmt_target(server: &str) -> String {
    if server.is_empty() {
        String::new()
    } else {
        format!(" {server}")
    }
}

impl SubsetterError {
    pub fn connectivity(server: impl Into<String>, message: impl Into<String>) -> Self {
        SubsetterError::Connectivity {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        SubsetterError::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Whether a retry policy may attempt the call again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubsetterError::Connectivity { .. } | SubsetterError::Timeout { .. }
        )
    }

    /// Short type tag used in logs and crash reports
    pub fn kind_name(&self) -> &'static str {
        match self {
            SubsetterError::Connectivity { .. } => "ConnectivityError",
            SubsetterError::Authentication(_) => "AuthenticationError",
            SubsetterError::NotFound { .. } => "NotFoundError",
            SubsetterError::Timeout { .. } => "TimeoutError",
            SubsetterError::Provider(_) => "ProviderError",
            SubsetterError::Io(_) => "IoError",
            SubsetterError::Json(_) => "JsonError",
            SubsetterError::Unexpected(_) => "UnexpectedError",
        }
    }

    /// Remediation hint shown next to the error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            SubsetterError::Connectivity { .. } => Some(
                "Check that Plex Media Server is running, the server URL is correct, \
                 the network connection is stable and no firewall blocks the connection.",
            ),
            SubsetterError::Authentication(_) => Some(
                "Your Plex token may have expired. Log out and log in again.",
            ),
            SubsetterError::NotFound { .. } => Some(
                "The item may have been deleted or moved. Try reloading the library.",
            ),
            SubsetterError::Timeout { .. } => Some(
                "The server is slow or unresponsive. Check your connection and try again.",
            ),
            SubsetterError::Provider(_) => Some(
                "The provider may be down or rate limiting. Wait a few minutes or try a different provider.",
            ),
            SubsetterError::Io(_) => Some(
                "Check that the path exists, you have permission to write there and the disk is not full.",
            ),
            SubsetterError::Json(_) | SubsetterError::Unexpected(_) => None,
        }
    }

    /// Failures with no known cause, worth a crash report
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            SubsetterError::Io(_) | SubsetterError::Json(_) | SubsetterError::Unexpected(_)
        )
    }

    /// Re-derive the category of an `Unexpected` error from its text
    ///
    /// Collaborators that cannot tell what went wrong report `Unexpected`
    /// with the raw message; a recognisable message gets its proper variant.
    pub fn refined(self, context: &str) -> Self {
        match self {
            SubsetterError::Unexpected(message) => match classify(context, &message) {
                SubsetterError::Unexpected(_) => SubsetterError::Unexpected(message),
                other => other,
            },
            other => other,
        }
    }

    /// Message, suggestion and raw error text bundled for display
    pub fn user_message(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{self}\n\nSuggestion: {suggestion}"),
            None => self.to_string(),
        }
    }
}

/// Map raw collaborator error text onto the taxonomy
pub fn classify(context: &str, message: &str) -> SubsetterError {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("401") {
        SubsetterError::Authentication(message.to_string())
    } else if lower.contains("not found") || lower.contains("404") {
        SubsetterError::not_found("Resource", format!("{context}: {message}"))
    } else if lower.contains("timed out") || lower.contains("timeout") {
        SubsetterError::Timeout {
            operation: format!("{context}: {message}"),
            timeout: Duration::ZERO,
        }
    } else if lower.contains("connection") || lower.contains("network") {
        SubsetterError::connectivity(context, message)
    } else {
        SubsetterError::Unexpected(format!("{context}: {message}"))
    }
}
