//! Cairn CLI - git-synchronized task tracking from the command line
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Allow for tests"
    )
)]

use std::io;
use std::process::ExitCode;

use clap::Parser as _;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

use cli::Cli;

mod cli;
mod handlers;

#[tokio::main]
#[allow(clippy::print_stderr, reason = "Error reporting at the process boundary")]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match handlers::dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            if let Some(hint) = error.remediation() {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so command output on stdout stays scriptable.
fn init_logging() {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "cairn_core=warn,cairn_storage=warn,cairn_backends=warn,cairn_cli=warn".into()
        }))
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(false)
                .with_target(true)
                .with_level(true),
        )
        .init();
}
