//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `ALETHEIA_CONFIG` env var >
//! `aletheia.toml`. A missing file at the implicit default path means "use
//! built-in defaults"; a missing file that was asked for explicitly is an error.
//! `ALETHEIA_CREDENTIALS` overrides the credential file location.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aletheia_auth::{
    API_BYPASS_PATHS, AUTH_BYPASS_PATHS, DEFAULT_API_BASE_URL, DEFAULT_AUTH_BASE_URL,
    REFRESH_PATH, endpoint,
};
use auth_pipeline::PipelineConfig;
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "aletheia.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub auth: BackendConfig,
    #[serde(default)]
    pub api: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Where the token pair is persisted
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_credentials_path")]
    pub path: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: default_credentials_path(),
        }
    }
}

/// One backend. Unset fields fall back to per-backend defaults.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: Option<String>,
    pub bypass_paths: Option<Vec<String>>,
    pub refresh_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            bypass_paths: None,
            refresh_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Session policy
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// End the session when a backend cannot be reached at all.
    #[serde(default)]
    pub logout_on_unreachable: bool,
    #[serde(default = "default_timeout")]
    pub refresh_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            logout_on_unreachable: false,
            refresh_timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    5
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("aletheia-credentials.json")
}

impl Config {
    /// Load and validate the file at `path`.
    ///
    /// When `explicit` is false and the file does not exist, defaults are used.
    pub fn load(path: &Path, explicit: bool) -> common::Result<Self> {
        let mut config = if !explicit && !path.exists() {
            Config::default()
        } else {
            let contents = std::fs::read_to_string(path)?;
            Self::parse(&contents)?
        };

        if let Ok(p) = std::env::var("ALETHEIA_CREDENTIALS") {
            config.credentials.path = PathBuf::from(p);
        }

        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> common::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        for (name, backend) in [("auth", &self.auth), ("api", &self.api)] {
            if let Some(url) = &backend.base_url {
                require_http(&format!("{name}.base_url"), url)?;
            }
            if let Some(url) = &backend.refresh_url {
                require_http(&format!("{name}.refresh_url"), url)?;
            }
            if backend.timeout_secs == 0 {
                return Err(common::Error::Config(format!(
                    "{name}.timeout_secs must be greater than 0"
                )));
            }
        }
        if self.session.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "session.refresh_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn auth_base_url(&self) -> &str {
        self.auth
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_AUTH_BASE_URL)
    }

    pub fn api_base_url(&self) -> &str {
        self.api.base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    /// Per-request timeout for calls to the auth service, login and register
    /// included.
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.timeout_secs)
    }

    /// Refresh endpoint shared by both backends unless overridden: tokens are
    /// issued by the auth service.
    fn default_refresh_url(&self) -> String {
        endpoint(self.auth_base_url(), REFRESH_PATH)
    }

    pub fn auth_pipeline(&self) -> PipelineConfig {
        self.pipeline("auth", self.auth_base_url(), &self.auth, AUTH_BYPASS_PATHS)
    }

    pub fn api_pipeline(&self) -> PipelineConfig {
        self.pipeline("api", self.api_base_url(), &self.api, API_BYPASS_PATHS)
    }

    fn pipeline(
        &self,
        name: &str,
        base_url: &str,
        backend: &BackendConfig,
        default_bypass: &[&str],
    ) -> PipelineConfig {
        let bypass = match &backend.bypass_paths {
            Some(paths) => paths.clone(),
            None => default_bypass.iter().map(|p| p.to_string()).collect(),
        };
        PipelineConfig::new(name, base_url)
            .bypass_paths(bypass)
            .refresh_url(
                backend
                    .refresh_url
                    .clone()
                    .unwrap_or_else(|| self.default_refresh_url()),
            )
            .timeout(Duration::from_secs(backend.timeout_secs))
            .refresh_timeout(Duration::from_secs(self.session.refresh_timeout_secs))
            .logout_on_unreachable(self.session.logout_on_unreachable)
    }

    /// Resolve the config path from the CLI arg or `ALETHEIA_CONFIG`.
    ///
    /// Returns the path and whether it was given explicitly.
    pub fn resolve_path(cli_path: Option<&Path>) -> (PathBuf, bool) {
        if let Some(p) = cli_path {
            return (p.to_path_buf(), true);
        }
        if let Ok(p) = std::env::var("ALETHEIA_CONFIG") {
            return (PathBuf::from(p), true);
        }
        (PathBuf::from(DEFAULT_CONFIG_PATH), false)
    }
}

fn require_http(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}
