//! The caller-facing request function
//!
//! A `Pipeline` is one configured instance of the machinery for one backend:
//! base URL, bypass list, refresh endpoint. Hosts build one per backend from a
//! shared `SessionTerminator`, so all pipelines read the same credential store
//! and report to the same subscribers, while each keeps its own refresh state.

use std::sync::Arc;
use std::time::Duration;

use aletheia_auth::{DEFAULT_TIMEOUT, REFRESH_PATH, endpoint};
use reqwest::Response;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::intercept::RequestInterceptor;
use crate::refresh::RefreshCoordinator;
use crate::request::RequestDescriptor;
use crate::retry::{RetryDispatcher, Settled};
use crate::session::SessionTerminator;

/// Configuration for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Name used in log spans ("auth", "api").
    pub name: String,
    pub base_url: String,
    /// Paths that never carry a bearer token.
    pub bypass_paths: Vec<String>,
    /// Absolute URL of the refresh endpoint.
    pub refresh_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Upper bound on the refresh call.
    pub refresh_timeout: Duration,
    /// End the session when a backend is unreachable.
    pub logout_on_unreachable: bool,
}

impl PipelineConfig {
    /// Defaults: no bypass paths, refresh at `<base_url>/refresh`, 5 second
    /// timeouts, credentials kept when the backend is unreachable.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            name: name.into(),
            refresh_url: endpoint(&base_url, REFRESH_PATH),
            base_url,
            bypass_paths: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            refresh_timeout: DEFAULT_TIMEOUT,
            logout_on_unreachable: false,
        }
    }

    pub fn bypass_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bypass_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn refresh_url(mut self, url: impl Into<String>) -> Self {
        self.refresh_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn logout_on_unreachable(mut self, enabled: bool) -> Self {
        self.logout_on_unreachable = enabled;
        self
    }
}

/// Authenticated request pipeline for one backend.
pub struct Pipeline {
    name: String,
    interceptor: RequestInterceptor,
    dispatcher: Arc<RetryDispatcher>,
    coordinator: Arc<RefreshCoordinator>,
    terminator: SessionTerminator,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, client: reqwest::Client, terminator: SessionTerminator) -> Self {
        let interceptor =
            RequestInterceptor::new(Arc::clone(terminator.store()), &config.bypass_paths);
        let dispatcher = Arc::new(RetryDispatcher::new(
            client.clone(),
            config.base_url.clone(),
            config.timeout,
            terminator.clone(),
            config.logout_on_unreachable,
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            client,
            config.refresh_url.clone(),
            config.refresh_timeout,
            Arc::clone(&dispatcher),
            terminator.clone(),
        ));
        debug!(
            pipeline = %config.name,
            base_url = %config.base_url,
            refresh_url = %config.refresh_url,
            bypass = config.bypass_paths.len(),
            "pipeline configured"
        );
        Self {
            name: config.name,
            interceptor,
            dispatcher,
            coordinator,
            terminator,
        }
    }

    /// Send a request. Token attachment, refresh and replay are invisible to
    /// the caller; only the final response or error comes back.
    #[instrument(
        skip_all,
        fields(
            pipeline = %self.name,
            request_id = %descriptor.id(),
            method = %descriptor.method(),
            path = descriptor.path(),
        )
    )]
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Response> {
        let descriptor = self.interceptor.apply(descriptor).await;
        debug!(has_bearer = descriptor.bearer().is_some(), "sending");

        let result = match self.dispatcher.dispatch(descriptor).await {
            Settled::Done(result) => result,
            Settled::Expired(descriptor) => self.coordinator.submit(descriptor).await,
        };

        crate::metrics::record_request(match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        });
        result
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(RequestDescriptor::get(path)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        self.request(RequestDescriptor::post(path).json(body)?).await
    }

    /// Whether this pipeline has a refresh call in flight.
    pub async fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing().await
    }

    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }
}
