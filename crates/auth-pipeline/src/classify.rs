//! Failure classification
//!
//! Maps a failed exchange plus the request's retry mark to one of four
//! outcomes. Pure: no I/O, no state. Every branch of the refresh machinery is
//! a match over `Outcome`.

use reqwest::StatusCode;

/// What went wrong with a single HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The backend answered with a non-success status.
    Status(StatusCode),
    /// No response arrived (connect failure, timeout, reset).
    NoResponse,
    /// The transport failed in a way that is neither of the above.
    Other,
}

impl Failure {
    /// Classify a `reqwest` send error. Builder errors are not failures of the
    /// exchange and are handled before this point.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Failure::Status(status)
        } else if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            Failure::NoResponse
        } else {
            Failure::Other
        }
    }
}

/// Pipeline reaction to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Credential permanently invalid. Terminal: the session ends.
    Unauthenticated,
    /// Credential stale. Recoverable through a refresh.
    Expired,
    /// Backend not reachable. Credentials are not at fault.
    Unreachable,
    /// Anything else. Passed to the caller untouched.
    Opaque,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Unauthenticated => "unauthenticated",
            Outcome::Expired => "expired",
            Outcome::Unreachable => "unreachable",
            Outcome::Opaque => "opaque",
        }
    }
}

/// Classify a failure.
///
/// 403 means "expired, refresh me" only on the first attempt. After one
/// replay with a fresh token it is treated like 401 so a request can never
/// trigger a second refresh cycle.
pub fn classify(failure: Failure, retried: bool) -> Outcome {
    match failure {
        Failure::Status(StatusCode::UNAUTHORIZED) => Outcome::Unauthenticated,
        Failure::Status(StatusCode::FORBIDDEN) if retried => Outcome::Unauthenticated,
        Failure::Status(StatusCode::FORBIDDEN) => Outcome::Expired,
        Failure::Status(_) => Outcome::Opaque,
        Failure::NoResponse => Outcome::Unreachable,
        Failure::Other => Outcome::Opaque,
    }
}
