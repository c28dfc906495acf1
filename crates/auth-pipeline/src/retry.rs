//! Sending and replaying requests
//!
//! `RetryDispatcher` is the pipeline's only door to the network. It sends a
//! descriptor once, classifies the result, and applies the side effects of
//! terminal outcomes (session termination). An `Expired` outcome is handed
//! back to the caller so the refresh coordinator can take over.
//!
//! Replays after a refresh go through the same door with the retry mark set,
//! which is what stops a second 403 from starting another refresh.

use std::time::Duration;

use reqwest::Response;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::classify::{Failure, Outcome, classify};
use crate::error::{Error, Result};
use crate::request::RequestDescriptor;
use crate::session::{SessionTerminator, TerminationReason};

/// Result of a single send.
pub(crate) enum Settled {
    /// Final answer for the caller.
    Done(Result<Response>),
    /// 403 on a first attempt; the descriptor goes to the refresh coordinator.
    Expired(RequestDescriptor),
}

/// A request parked behind an in-flight refresh.
pub(crate) struct PendingRequest {
    pub(crate) descriptor: RequestDescriptor,
    pub(crate) reply: oneshot::Sender<Result<Response>>,
}

/// Sends descriptors to one backend and replays them after a refresh.
pub struct RetryDispatcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    terminator: SessionTerminator,
    logout_on_unreachable: bool,
}

impl RetryDispatcher {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
        terminator: SessionTerminator,
        logout_on_unreachable: bool,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
            terminator,
            logout_on_unreachable,
        }
    }

    /// Send `descriptor` once and settle the result.
    pub(crate) async fn dispatch(&self, descriptor: RequestDescriptor) -> Settled {
        let url = aletheia_auth::endpoint(&self.base_url, descriptor.path());
        let mut request = self
            .client
            .request(descriptor.method().clone(), &url)
            .headers(descriptor.headers().clone())
            .timeout(self.timeout);
        if let Some(body) = descriptor.body_bytes() {
            request = request.body(body.clone());
        }

        let (failure, response) = match request.send().await {
            Ok(response) if response.status().is_success() => {
                return Settled::Done(Ok(response));
            }
            Ok(response) => (Failure::Status(response.status()), Ok(response)),
            Err(e) if e.is_builder() => {
                return Settled::Done(Err(Error::InvalidRequest(e.to_string())));
            }
            Err(e) => (Failure::from_transport(&e), Err(e.to_string())),
        };

        let outcome = classify(failure, descriptor.is_retried());
        debug!(
            outcome = outcome.label(),
            retried = descriptor.is_retried(),
            "request failed"
        );

        match outcome {
            Outcome::Expired => Settled::Expired(descriptor),
            Outcome::Unauthenticated => {
                let reason = if descriptor.is_retried() {
                    TerminationReason::RetryRejected
                } else {
                    TerminationReason::Unauthenticated
                };
                warn!(reason = reason.label(), "credential rejected, ending session");
                self.terminator.terminate(reason).await;
                Settled::Done(Err(Error::Unauthenticated(reason.to_string())))
            }
            Outcome::Unreachable => {
                // Only a transport error classifies as unreachable.
                let message = response.err().unwrap_or_default();
                if self.logout_on_unreachable {
                    warn!(error = %message, "backend unreachable, ending session by policy");
                    self.terminator
                        .terminate(TerminationReason::Unreachable)
                        .await;
                }
                Settled::Done(Err(Error::Unreachable(message)))
            }
            Outcome::Opaque => Settled::Done(Err(match response {
                Ok(r) => {
                    let status = r.status();
                    let body = r.text().await.unwrap_or_default();
                    Error::Status { status, body }
                }
                Err(message) => Error::Transport(message),
            })),
        }
    }

    /// Replay a queued request with a fresh access token and deliver the
    /// result to whoever is waiting on it.
    ///
    /// A caller that stopped waiting gets no replay.
    pub(crate) async fn replay(&self, pending: PendingRequest, token: &str) {
        let PendingRequest {
            mut descriptor,
            reply,
        } = pending;
        if reply.is_closed() {
            debug!(request_id = %descriptor.id(), "caller went away, skipping replay");
            return;
        }

        descriptor.mark_retried();
        if !descriptor.set_bearer(token) {
            warn!(request_id = %descriptor.id(), "refreshed token is not a valid header value");
        }
        debug!(
            request_id = %descriptor.id(),
            method = %descriptor.method(),
            path = descriptor.path(),
            "replaying with refreshed token"
        );

        let result = match self.dispatch(descriptor).await {
            Settled::Done(result) => result,
            // The retry mark makes this unreachable through `classify`; treat
            // it like the 403-after-retry it would be.
            Settled::Expired(_) => {
                self.terminator
                    .terminate(TerminationReason::RetryRejected)
                    .await;
                Err(Error::Unauthenticated(
                    TerminationReason::RetryRejected.to_string(),
                ))
            }
        };

        crate::metrics::record_replay(if result.is_ok() { "ok" } else { "error" });
        // The receiver may have been dropped while the replay ran.
        let _ = reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use aletheia_auth::{Credential, CredentialStore};
    use reqwest::StatusCode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn terminator(dir: &tempfile::TempDir) -> SessionTerminator {
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();
        store
            .set(Credential::new("T1", Some("R1".into())))
            .await
            .unwrap();
        SessionTerminator::new(Arc::new(store))
    }

    fn dispatcher(base_url: &str, terminator: SessionTerminator, logout_on_unreachable: bool) -> RetryDispatcher {
        RetryDispatcher::new(
            reqwest::Client::new(),
            base_url,
            Duration::from_secs(2),
            terminator,
            logout_on_unreachable,
        )
    }

    #[tokio::test]
    async fn first_forbidden_is_handed_back_as_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let terminator = terminator(&dir).await;
        let dispatcher = dispatcher(&server.uri(), terminator.clone(), false);

        let settled = dispatcher
            .dispatch(RequestDescriptor::get("/projects"))
            .await;
        assert!(matches!(settled, Settled::Expired(_)));
        assert!(!terminator.store().is_empty().await, "403 must not log out");
    }

    #[tokio::test]
    async fn replay_sets_mark_and_bearer_then_delivers_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .and(header("authorization", "Bearer T2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(&server.uri(), terminator(&dir).await, false);

        let (reply, rx) = oneshot::channel();
        let mut descriptor = RequestDescriptor::get("/projects");
        descriptor.set_bearer("T1");
        dispatcher
            .replay(PendingRequest { descriptor, reply }, "T2")
            .await;

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.text().await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn replay_forbidden_again_is_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rules"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let terminator = terminator(&dir).await;
        let mut events = terminator.subscribe();
        let dispatcher = dispatcher(&server.uri(), terminator.clone(), false);

        let (reply, rx) = oneshot::channel();
        dispatcher
            .replay(
                PendingRequest {
                    descriptor: RequestDescriptor::get("/rules"),
                    reply,
                },
                "T2",
            )
            .await;

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_unauthenticated(), "got: {err:?}");
        assert!(terminator.store().is_empty().await);
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn replay_skipped_when_caller_is_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(&server.uri(), terminator(&dir).await, false);

        let (reply, rx) = oneshot::channel();
        drop(rx);
        dispatcher
            .replay(
                PendingRequest {
                    descriptor: RequestDescriptor::get("/events"),
                    reply,
                },
                "T2",
            )
            .await;
    }

    #[tokio::test]
    async fn other_status_passes_body_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/9"))
            .respond_with(ResponseTemplate::new(404).set_body_string("project not found"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(&server.uri(), terminator(&dir).await, false);

        match dispatcher.dispatch(RequestDescriptor::get("/projects/9")).await {
            Settled::Done(Err(Error::Status { status, body })) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "project not found");
            }
            _ => panic!("expected a status error"),
        }
    }

    #[tokio::test]
    async fn unreachable_keeps_credentials_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let terminator = terminator(&dir).await;
        let dispatcher = dispatcher("http://127.0.0.1:9", terminator.clone(), false);

        match dispatcher.dispatch(RequestDescriptor::get("/me")).await {
            Settled::Done(Err(Error::Unreachable(message))) => {
                assert!(message.contains("127.0.0.1:9"), "got: {message}");
            }
            _ => panic!("expected Unreachable"),
        }
        assert!(!terminator.store().is_empty().await);
    }

    #[tokio::test]
    async fn unreachable_logs_out_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let terminator = terminator(&dir).await;
        let mut events = terminator.subscribe();
        let dispatcher = dispatcher("http://127.0.0.1:9", terminator.clone(), true);

        match dispatcher.dispatch(RequestDescriptor::get("/me")).await {
            Settled::Done(Err(Error::Unreachable(_))) => {}
            _ => panic!("expected Unreachable"),
        }
        assert!(terminator.store().is_empty().await);
        assert_eq!(
            events.try_recv().unwrap(),
            crate::session::SessionEvent::Terminated {
                reason: TerminationReason::Unreachable
            }
        );
    }
}
