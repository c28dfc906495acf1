//! Authenticated request pipeline for the Aletheia backends
//!
//! Sits in front of `reqwest` and hides token mechanics from callers:
//! - `RequestInterceptor` attaches `Authorization: Bearer` unless the path is bypassed
//! - `classify()` maps a failed exchange to an `Outcome`
//! - `RefreshCoordinator` runs at most one refresh at a time and queues the
//!   requests that hit an expired token while it runs
//! - `RetryDispatcher` replays each queued request once with the new token
//! - `SessionTerminator` clears the credential store and tells the host
//!
//! Request lifecycle:
//! 1. Caller hands a `RequestDescriptor` to `Pipeline::request()`
//! 2. 2xx → returned as-is
//! 3. 401 → session terminated, caller gets `Error::Unauthenticated`
//! 4. 403 → joins (or starts) a refresh, replayed once with the new token
//! 5. No response → `Error::Unreachable`, credentials kept unless configured otherwise
//! 6. Anything else → `Error::Status` with the backend's body

pub mod classify;
pub mod error;
pub mod intercept;
pub mod metrics;
pub mod pipeline;
pub mod refresh;
pub mod request;
pub mod retry;
pub mod session;

pub use classify::{Failure, Outcome, classify};
pub use error::{Error, Result};
pub use intercept::RequestInterceptor;
pub use pipeline::{Pipeline, PipelineConfig};
pub use refresh::RefreshCoordinator;
pub use request::RequestDescriptor;
pub use retry::RetryDispatcher;
pub use session::{SessionEvent, SessionTerminator, TerminationReason};
