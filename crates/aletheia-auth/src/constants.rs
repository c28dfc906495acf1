//! Endpoint paths and defaults for the Aletheia backends

use std::time::Duration;

/// Auth service base URL used when the config does not override it
pub const DEFAULT_AUTH_BASE_URL: &str = "https://de6igz.ru/auth-service";

/// Aletheia public API base URL used when the config does not override it
pub const DEFAULT_API_BASE_URL: &str = "https://de6igz.ru/aletheia/v1";

pub const LOGIN_PATH: &str = "/login";
pub const REGISTER_PATH: &str = "/register";
pub const REFRESH_PATH: &str = "/refresh";
pub const ME_PATH: &str = "/me";
pub const SDK_TOKEN_PATH: &str = "/sdk-token";

/// Auth-service paths that must never carry a bearer token.
pub const AUTH_BYPASS_PATHS: &[&str] = &[LOGIN_PATH, REGISTER_PATH, REFRESH_PATH];

/// Public API paths that must never carry a bearer token.
pub const API_BYPASS_PATHS: &[&str] = &["/auth"];

/// Per-request timeout applied by both backends
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
