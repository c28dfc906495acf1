//! Error types for auth-service calls and credential storage

use reqwest::StatusCode;

/// Errors from auth-service operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced a response (connect failure, timeout).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The auth service answered with a non-success status.
    #[error("auth service returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    /// The auth service answered 2xx with a body we could not use.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
