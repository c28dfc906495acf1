//! Errors surfaced to pipeline callers
//!
//! An expired access token never shows up here: the pipeline refreshes and
//! replays internally and only reports what happened after that.

use reqwest::StatusCode;

/// Failure of a request sent through the pipeline.
///
/// `Clone` because one refresh failure is delivered to every queued request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The session is gone. The credential store has been cleared and the
    /// host notified.
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// No response arrived (connect failure, timeout).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with a status the pipeline does not act on.
    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// Transport failure that is neither a missing response nor a status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The descriptor could not be turned into an HTTP request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request was queued behind a refresh that ended without answering it.
    #[error("request abandoned before a response was produced")]
    Abandoned,
}

impl Error {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Unreachable(_) => "unreachable",
            Error::Status { .. } => "status",
            Error::Transport(_) => "transport",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Abandoned => "abandoned",
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Error::Unauthenticated(_))
    }

    /// HTTP status when the backend answered, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_keeps_backend_body() {
        let err = Error::Status {
            status: StatusCode::NOT_FOUND,
            body: r#"{"error":"project not found"}"#.into(),
        };
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("project not found"), "got: {err}");
        assert_eq!(err.label(), "status");
    }

    #[test]
    fn only_unauthenticated_reports_as_such() {
        assert!(Error::Unauthenticated("401".into()).is_unauthenticated());
        assert!(!Error::Unreachable("timeout".into()).is_unauthenticated());
        assert!(!Error::Abandoned.is_unauthenticated());
    }

    #[test]
    fn transport_error_is_distinct_from_unreachable() {
        let err = Error::Transport("invalid refresh response: missing field `access_token`".into());
        assert_eq!(err.label(), "transport");
        assert_eq!(err.status(), None);
        assert!(!err.is_unauthenticated());
        assert!(err.to_string().starts_with("transport error:"), "got: {err}");
    }
}
