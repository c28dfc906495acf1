//! Types shared by the Aletheia client crates and the CLI

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
