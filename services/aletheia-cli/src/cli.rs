//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "aletheia", version, about = "Aletheia command-line client")]
pub struct Args {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and store the token pair
    Login {
        #[arg(long)]
        username: String,
        /// Password; read from stdin when not set
        #[arg(long, env = "ALETHEIA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(long)]
        username: String,
        #[arg(long, env = "ALETHEIA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored tokens
    Logout,
    /// Show the signed-in user
    Me,
    /// Issue an SDK token for the signed-in user
    SdkToken,
    /// Send an authenticated request and print the response body
    Request {
        #[arg(long, value_enum, default_value_t = Backend::Api)]
        backend: Backend,
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        method: String,
        /// Path relative to the backend base URL, query string allowed
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Api,
    Auth,
}
