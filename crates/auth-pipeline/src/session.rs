//! Session termination
//!
//! Ending a session means two things: the credential store is cleared, and
//! every subscriber (the host application) hears about it so it can drop back
//! to its logged-out entry point. Terminating twice is harmless.

use std::fmt;
use std::sync::Arc;

use aletheia_auth::CredentialStore;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Capacity of the session event channel. Hosts that fall this far behind
/// only miss duplicate termination notices.
const EVENT_CAPACITY: usize = 16;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A backend answered 401.
    Unauthenticated,
    /// A request still got 403 after being replayed with a fresh token.
    RetryRejected,
    /// The refresh endpoint rejected the refresh token.
    RefreshRejected,
    /// An access token expired and no refresh token was stored.
    MissingRefreshToken,
    /// A backend was unreachable and the host opted into logging out on that.
    Unreachable,
    /// The host asked to log out.
    Logout,
}

impl TerminationReason {
    pub fn label(&self) -> &'static str {
        match self {
            TerminationReason::Unauthenticated => "unauthenticated",
            TerminationReason::RetryRejected => "retry_rejected",
            TerminationReason::RefreshRejected => "refresh_rejected",
            TerminationReason::MissingRefreshToken => "missing_refresh_token",
            TerminationReason::Unreachable => "unreachable",
            TerminationReason::Logout => "logout",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::Unauthenticated => "backend rejected the access token",
            TerminationReason::RetryRejected => "access token rejected again after refresh",
            TerminationReason::RefreshRejected => "refresh token rejected",
            TerminationReason::MissingRefreshToken => "access token expired and no refresh token is stored",
            TerminationReason::Unreachable => "backend unreachable",
            TerminationReason::Logout => "logged out",
        };
        f.write_str(text)
    }
}

/// Notification delivered to hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Terminated { reason: TerminationReason },
}

/// Clears credentials and notifies the host.
///
/// Cheap to clone; clones share the store and the event channel, so every
/// pipeline built from one terminator reports to the same subscribers.
#[derive(Clone)]
pub struct SessionTerminator {
    store: Arc<CredentialStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionTerminator {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { store, events }
    }

    /// Receive future session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The credential store this terminator clears.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// End the session: clear the store, then notify subscribers.
    ///
    /// Never fails. A store write error is logged; the in-memory credential is
    /// gone either way, so no further request carries it.
    pub async fn terminate(&self, reason: TerminationReason) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to persist cleared credentials");
        }
        info!(reason = reason.label(), "session terminated");
        crate::metrics::record_termination(reason.label());
        // No subscribers is fine: nobody is waiting to be told.
        let _ = self.events.send(SessionEvent::Terminated { reason });
    }
}
