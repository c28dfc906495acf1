//! Single-flight credential refresh
//!
//! When a request comes back 403 the access token has expired. The first such
//! request moves the coordinator from `Idle` to `Refreshing` and starts the one
//! refresh call; every 403 that lands while the call runs joins a FIFO queue
//! instead of starting its own. The check and the state change happen under
//! one lock acquisition, so two refresh calls can never overlap.
//!
//! Transitions:
//! - Idle → Refreshing (403, refresh token stored; refresh task spawned)
//! - Idle → Idle (403, no refresh token; session terminated)
//! - Refreshing → Refreshing (403; request queued)
//! - Refreshing → Idle (refresh succeeded and queue drained, or refresh failed)
//!
//! The refresh runs in its own task so a caller dropping its future never
//! strands the rest of the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aletheia_auth::{CredentialStore, TokenResponse};
use reqwest::Response;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::classify::{Failure, Outcome, classify};
use crate::error::{Error, Result};
use crate::request::RequestDescriptor;
use crate::retry::{PendingRequest, RetryDispatcher};
use crate::session::{SessionTerminator, TerminationReason};

/// Refresh state. The queue only exists while a refresh is in flight.
enum RefreshState {
    Idle,
    Refreshing { queue: VecDeque<PendingRequest> },
}

/// Owns the refresh state machine for one pipeline.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    refresh_url: String,
    refresh_timeout: Duration,
    dispatcher: Arc<RetryDispatcher>,
    terminator: SessionTerminator,
}

impl RefreshCoordinator {
    pub fn new(
        client: reqwest::Client,
        refresh_url: impl Into<String>,
        refresh_timeout: Duration,
        dispatcher: Arc<RetryDispatcher>,
        terminator: SessionTerminator,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            store: Arc::clone(terminator.store()),
            client,
            refresh_url: refresh_url.into(),
            refresh_timeout,
            dispatcher,
            terminator,
        }
    }

    /// Whether a refresh call is in flight.
    pub async fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock().await, RefreshState::Refreshing { .. })
    }

    /// Park an expired request behind the refresh (starting one if needed)
    /// and wait for its replayed result.
    pub(crate) async fn submit(self: &Arc<Self>, descriptor: RequestDescriptor) -> Result<Response> {
        let (reply, answer) = oneshot::channel();
        let pending = PendingRequest { descriptor, reply };

        {
            let mut state = self.state.lock().await;
            match &mut *state {
                RefreshState::Refreshing { queue } => {
                    queue.push_back(pending);
                    debug!(queued = queue.len(), "joined in-flight refresh");
                }
                RefreshState::Idle => {
                    let Some(refresh) = self.store.refresh_token().await else {
                        drop(state);
                        let reason = TerminationReason::MissingRefreshToken;
                        warn!(reason = reason.label(), "cannot refresh, ending session");
                        self.terminator.terminate(reason).await;
                        return Err(Error::Unauthenticated(reason.to_string()));
                    };
                    *state = RefreshState::Refreshing {
                        queue: VecDeque::from([pending]),
                    };
                    debug!("access token expired, starting refresh");
                    let coordinator = Arc::clone(self);
                    tokio::spawn(async move { coordinator.run(refresh).await });
                }
            }
        }

        answer.await.unwrap_or(Err(Error::Abandoned))
    }

    /// The one refresh call, followed by draining or rejecting the queue.
    async fn run(&self, refresh: String) {
        let started = Instant::now();
        match self.call_refresh(&refresh).await {
            Ok(tokens) => {
                let access = tokens.access_token.clone();
                if let Err(e) = self
                    .store
                    .update_access(tokens.access_token, tokens.refresh_token)
                    .await
                {
                    warn!(error = %e, "failed to persist refreshed credential");
                }
                crate::metrics::record_refresh("success");
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "credential refreshed"
                );
                self.drain(&access).await;
            }
            Err((outcome, error)) => {
                crate::metrics::record_refresh(outcome.label());
                match outcome {
                    Outcome::Unauthenticated => {
                        warn!(error = %error, "refresh token rejected, ending session");
                        self.terminator
                            .terminate(TerminationReason::RefreshRejected)
                            .await;
                    }
                    Outcome::Expired | Outcome::Unreachable | Outcome::Opaque => {
                        warn!(
                            outcome = outcome.label(),
                            error = %error,
                            "refresh failed, keeping credentials"
                        );
                    }
                }
                self.reject_all(error).await;
            }
        }
    }

    /// Issue the refresh call and classify any failure.
    ///
    /// The call goes straight through `reqwest`, never through the
    /// interceptor, and is classified as already retried: a 403 from the
    /// refresh endpoint is terminal, not another refresh.
    async fn call_refresh(&self, refresh: &str) -> std::result::Result<TokenResponse, (Outcome, Error)> {
        let call = aletheia_auth::refresh_token(
            &self.client,
            &self.refresh_url,
            refresh,
            self.refresh_timeout,
        );
        let result = match tokio::time::timeout(self.refresh_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                return Err((
                    Outcome::Unreachable,
                    Error::Unreachable(format!(
                        "refresh timed out after {}s",
                        self.refresh_timeout.as_secs_f64()
                    )),
                ));
            }
        };

        result.map_err(|e| match e {
            aletheia_auth::Error::Http(message) => (
                classify(Failure::NoResponse, true),
                Error::Unreachable(message),
            ),
            aletheia_auth::Error::Rejected { status, body } => {
                match classify(Failure::Status(status), true) {
                    Outcome::Unauthenticated => (
                        Outcome::Unauthenticated,
                        Error::Unauthenticated(format!(
                            "{} ({status})",
                            TerminationReason::RefreshRejected
                        )),
                    ),
                    outcome => (outcome, Error::Status { status, body }),
                }
            }
            other => (Outcome::Opaque, Error::Transport(other.to_string())),
        })
    }

    /// Replay queued requests one at a time in arrival order. Requests that
    /// join while the queue drains are replayed too; the coordinator goes
    /// Idle only once the queue is empty.
    async fn drain(&self, token: &str) {
        let mut replayed = 0usize;
        loop {
            let next = {
                let mut state = self.state.lock().await;
                let next = match &mut *state {
                    RefreshState::Refreshing { queue } => queue.pop_front(),
                    RefreshState::Idle => None,
                };
                if next.is_none() {
                    *state = RefreshState::Idle;
                }
                next
            };
            let Some(pending) = next else { break };
            self.dispatcher.replay(pending, token).await;
            replayed += 1;
        }
        debug!(replayed, "refresh queue drained");
    }

    /// Fail every queued request with `error` and go Idle.
    async fn reject_all(&self, error: Error) {
        let queue = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { queue } => queue,
                RefreshState::Idle => VecDeque::new(),
            }
        };
        debug!(rejected = queue.len(), "rejecting queued requests");
        for pending in queue {
            let _ = pending.reply.send(Err(error.clone()));
        }
    }
}
