//! Command execution
//!
//! `Session` wires one credential store, one terminator and two pipelines
//! (auth service and public API) from the config, then runs a single command.
//! Login and register talk to the auth service directly; everything else goes
//! through a pipeline.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use aletheia_auth::{Credential, CredentialStore, ME_PATH, SDK_TOKEN_PATH};
use anyhow::{Context, Result, bail};
use auth_pipeline::{
    Pipeline, RequestDescriptor, SessionEvent, SessionTerminator, TerminationReason,
};
use common::Secret;
use reqwest::Method;
use tokio::sync::broadcast;
use tracing::info;

use crate::cli::{Backend, Command};
use crate::config::Config;

pub struct Session {
    client: reqwest::Client,
    auth_base_url: String,
    auth_timeout: Duration,
    store: Arc<CredentialStore>,
    terminator: SessionTerminator,
    auth: Pipeline,
    api: Pipeline,
}

impl Session {
    pub async fn open(config: &Config) -> Result<Self> {
        let store = CredentialStore::load(config.credentials.path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to load credentials from {}",
                    config.credentials.path.display()
                )
            })?;
        let store = Arc::new(store);
        let terminator = SessionTerminator::new(Arc::clone(&store));
        // No client-wide timeout: every call sets the one configured for it.
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            auth: Pipeline::new(config.auth_pipeline(), client.clone(), terminator.clone()),
            api: Pipeline::new(config.api_pipeline(), client.clone(), terminator.clone()),
            auth_base_url: config.auth_base_url().to_string(),
            auth_timeout: config.auth_timeout(),
            client,
            store,
            terminator,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.terminator.subscribe()
    }

    /// Run one command, returning what should be printed on stdout.
    pub async fn execute(&self, command: Command) -> Result<Option<String>> {
        match command {
            Command::Login { username, password } => {
                let password = read_password(password)?;
                self.login(&username, &password).await?;
                Ok(Some(format!("logged in as {username}")))
            }
            Command::Register { username, password } => {
                let password = read_password(password)?;
                aletheia_auth::register(
                    &self.client,
                    &self.auth_base_url,
                    &username,
                    &password,
                    self.auth_timeout,
                )
                .await
                .context("registration failed")?;
                Ok(Some(format!("registered {username}, you can now log in")))
            }
            Command::Logout => {
                self.terminator.terminate(TerminationReason::Logout).await;
                Ok(Some("logged out".into()))
            }
            Command::Me => self.send(Backend::Auth, RequestDescriptor::get(ME_PATH)).await,
            Command::SdkToken => {
                self.send(Backend::Auth, RequestDescriptor::post(SDK_TOKEN_PATH))
                    .await
            }
            Command::Request {
                backend,
                method,
                path,
                data,
            } => {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .with_context(|| format!("invalid HTTP method: {method}"))?;
                let mut descriptor = RequestDescriptor::new(method, path);
                if let Some(data) = data {
                    let body: serde_json::Value =
                        serde_json::from_str(&data).context("--data is not valid JSON")?;
                    descriptor = descriptor.json(&body)?;
                }
                self.send(backend, descriptor).await
            }
        }
    }

    /// Exchange credentials for a token pair and persist it.
    pub async fn login(&self, username: &str, password: &Secret<String>) -> Result<()> {
        let tokens = aletheia_auth::login(
            &self.client,
            &self.auth_base_url,
            username,
            password,
            self.auth_timeout,
        )
        .await
        .context("login failed")?;
        self.store
            .set(Credential::new(tokens.access_token, tokens.refresh_token))
            .await
            .context("failed to store credentials")?;
        info!(username, "logged in");
        Ok(())
    }

    async fn send(&self, backend: Backend, descriptor: RequestDescriptor) -> Result<Option<String>> {
        let pipeline = match backend {
            Backend::Api => &self.api,
            Backend::Auth => &self.auth,
        };
        let response = pipeline.request(descriptor).await?;
        let body = response.text().await.context("failed to read response body")?;
        Ok(Some(pretty_json(&body)))
    }
}

/// Pretty-print JSON bodies; anything else is returned as-is.
fn pretty_json(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| body.to_string())
}

fn read_password(password: Option<String>) -> Result<Secret<String>> {
    if let Some(password) = password {
        return Ok(Secret::new(password));
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok(Secret::new(password))
}

/// The termination that should end the process, if any. A user-requested
/// logout is not a failure.
pub fn forced_termination(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> Option<TerminationReason> {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Terminated {
                reason: TerminationReason::Logout,
            } => continue,
            SessionEvent::Terminated { reason } => return Some(reason),
        }
    }
    None
}
