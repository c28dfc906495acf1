//! Auth-service token endpoints
//!
//! Three calls, all JSON over POST and none of them carrying a bearer token:
//! 1. `/login` exchanges username and password for a token pair
//! 2. `/register` creates an account and issues nothing
//! 3. `/refresh` exchanges a refresh token for a new access token
//!
//! These calls are the bypassed endpoints of the request pipeline, so they go
//! straight through `reqwest` instead of through the interceptor.

use std::time::Duration;

use common::Secret;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{LOGIN_PATH, REGISTER_PATH};
use crate::error::{Error, Result};

/// Token pair returned by `/login` and `/refresh`.
///
/// `/refresh` may omit `refresh_token`, meaning the current one stays valid.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize)]
struct AccountRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Join a base URL and an endpoint path with exactly one slash between them.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Exchange username and password for a token pair.
pub async fn login(
    client: &reqwest::Client,
    base_url: &str,
    username: &str,
    password: &Secret<String>,
    timeout: Duration,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint(base_url, LOGIN_PATH))
        .timeout(timeout)
        .json(&AccountRequest {
            username,
            password: password.expose(),
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let response = ensure_success(response).await?;
    debug!(username, "login accepted");
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid login response: {e}")))
}

/// Create an account. The auth service issues no tokens on registration.
pub async fn register(
    client: &reqwest::Client,
    base_url: &str,
    username: &str,
    password: &Secret<String>,
    timeout: Duration,
) -> Result<()> {
    let response = client
        .post(endpoint(base_url, REGISTER_PATH))
        .timeout(timeout)
        .json(&AccountRequest {
            username,
            password: password.expose(),
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("register request failed: {e}")))?;

    ensure_success(response).await?;
    debug!(username, "registration accepted");
    Ok(())
}

/// Exchange a refresh token for a new access token.
///
/// `refresh_url` is the absolute URL of the refresh endpoint. Every call here
/// carries its own `timeout`, so the client's default never caps it. A rejected
/// refresh token comes back as `Error::Rejected` carrying the status, so the
/// caller can tell a revoked token (401/403) from a server fault.
pub async fn refresh_token(
    client: &reqwest::Client,
    refresh_url: &str,
    refresh: &str,
    timeout: Duration,
) -> Result<TokenResponse> {
    let response = client
        .post(refresh_url)
        .timeout(timeout)
        .json(&RefreshRequest {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let response = ensure_success(response).await?;
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Err(Error::Rejected { status, body })
}
