//! Bearer token injection
//!
//! Every outgoing request picks up the current access token from the
//! credential store, except requests to bypassed paths (login, register,
//! refresh and similar token-issuing endpoints).

use std::sync::Arc;

use aletheia_auth::CredentialStore;
use tracing::{debug, warn};

use crate::request::RequestDescriptor;

/// Attaches `Authorization: Bearer <access>` to non-bypassed requests.
pub struct RequestInterceptor {
    store: Arc<CredentialStore>,
    bypass: Vec<String>,
}

impl RequestInterceptor {
    pub fn new<I, S>(store: Arc<CredentialStore>, bypass_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bypass = bypass_paths
            .into_iter()
            .map(|p| normalize(p.as_ref()).to_string())
            .collect();
        Self { store, bypass }
    }

    /// Whether `path` skips token injection. Leading slashes and the query
    /// string are ignored, so `login`, `/login` and `/login?next=x` match.
    pub fn is_bypassed(&self, path: &str) -> bool {
        let route = normalize(path.split('?').next().unwrap_or_default());
        self.bypass.iter().any(|b| b == route)
    }

    /// Decorate a request. Never fails: without a stored credential, or with a
    /// token that is not a valid header value, the request goes out bare and
    /// the backend's rejection is classified downstream.
    pub async fn apply(&self, mut descriptor: RequestDescriptor) -> RequestDescriptor {
        if self.is_bypassed(descriptor.route()) {
            debug!(path = descriptor.path(), "bypassed path, no bearer token");
            return descriptor;
        }

        match self.store.access_token().await {
            Some(token) => {
                if !descriptor.set_bearer(&token) {
                    warn!("stored access token is not a valid header value, sending without it");
                }
            }
            None => debug!(path = descriptor.path(), "no stored credential, sending without bearer"),
        }
        descriptor
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches('/').trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use aletheia_auth::{AUTH_BYPASS_PATHS, Credential};
    use reqwest::header::{AUTHORIZATION, HeaderValue};

    async fn store_with(dir: &tempfile::TempDir, access: Option<&str>) -> Arc<CredentialStore> {
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();
        if let Some(access) = access {
            store
                .set(Credential::new(access, Some("rt_1".into())))
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn attaches_bearer_to_regular_paths() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = RequestInterceptor::new(store_with(&dir, Some("T1")).await, AUTH_BYPASS_PATHS);

        let req = interceptor.apply(RequestDescriptor::get("/me")).await;
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer T1");
    }

    #[tokio::test]
    async fn bypassed_paths_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = RequestInterceptor::new(store_with(&dir, Some("T1")).await, AUTH_BYPASS_PATHS);

        for path in ["/login", "register", "/refresh", "/login?next=/dashboard"] {
            let req = interceptor.apply(RequestDescriptor::post(path)).await;
            assert!(req.headers().get(AUTHORIZATION).is_none(), "path {path}");
        }
    }

    #[tokio::test]
    async fn bypass_does_not_match_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = RequestInterceptor::new(store_with(&dir, Some("T1")).await, ["/auth"]);

        assert!(interceptor.is_bypassed("/auth"));
        assert!(!interceptor.is_bypassed("/authors"));
        assert!(!interceptor.is_bypassed("/auth/keys"));
    }

    #[tokio::test]
    async fn missing_credential_sends_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = RequestInterceptor::new(store_with(&dir, None).await, AUTH_BYPASS_PATHS);

        let req = interceptor.apply(RequestDescriptor::get("/me")).await;
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn stored_token_overrides_caller_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = RequestInterceptor::new(store_with(&dir, Some("T1")).await, AUTH_BYPASS_PATHS);

        let req = RequestDescriptor::get("/me")
            .header(AUTHORIZATION, HeaderValue::from_static("Bearer caller"));
        let req = interceptor.apply(req).await;
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer T1");
    }
}
