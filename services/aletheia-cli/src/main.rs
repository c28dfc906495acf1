//! Aletheia command-line client
//!
//! Thin host around the authenticated request pipeline:
//! 1. Loads config and the persisted token pair
//! 2. Runs one command against the auth service or the public API
//! 3. Exits 2 when the session was ended underneath it, so scripts can
//!    prompt for a fresh login

mod cli;
mod commands;
mod config;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Args;
use crate::commands::{Session, forced_termination};
use crate::config::Config;

/// Exit status when the session ended and the user has to log in again.
const EXIT_SESSION_ENDED: u8 = 2;

fn init_tracing(json: bool) {
    // Logs go to stderr so command output on stdout stays pipeable
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn run(args: Args) -> Result<ExitCode> {
    let (config_path, explicit) = Config::resolve_path(args.config.as_deref());
    let config = Config::load(&config_path, explicit)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    debug!(
        config = %config_path.display(),
        credentials = %config.credentials.path.display(),
        "config loaded"
    );

    let session = Session::open(&config).await?;
    let mut events = session.subscribe();
    let result = session.execute(args.command).await;

    if let Some(reason) = forced_termination(&mut events) {
        warn!(reason = reason.label(), "session ended");
        eprintln!("session ended: {reason}. Run `aletheia login` to sign in again.");
        return Ok(ExitCode::from(EXIT_SESSION_ENDED));
    }

    if let Some(output) = result? {
        println!("{output}");
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_json);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
