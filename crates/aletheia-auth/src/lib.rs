//! Aletheia auth-service client library
//!
//! Owns the durable credential file and the three token endpoints of the auth
//! service. It knows nothing about request pipelines; `auth-pipeline` builds
//! the refresh/replay machinery on top of it.
//!
//! Credential lifecycle:
//! 1. `token::login()` exchanges username/password for a token pair
//! 2. The pair is persisted via `credentials::CredentialStore::set()`
//! 3. On an expired access token the pipeline calls `token::refresh_token()`
//! 4. The new pair is persisted via `CredentialStore::update_access()`
//! 5. Logout or session termination calls `CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, CredentialStore};
pub use error::{Error, Result};
pub use token::{TokenResponse, endpoint, login, refresh_token, register};
