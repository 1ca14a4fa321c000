//! Pi Chat CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Configuration error
//! - 4: Request rejected by the Pi API

use std::process::ExitCode;

use clap::Parser;
use pi_chat::ChatError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONFIG_ERROR: u8 = 3;
    pub const REQUEST_ERROR: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "pi_chat=debug,pi=debug,warn"
    } else if cli.quiet {
        "error"
    } else {
        "pi_chat=info,pi=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let scope = cli.scope();
    let result = match cli.command {
        Commands::Ask(args) => commands::ask::execute(args, scope).await,
        Commands::Show(args) => commands::show::execute(args, scope).await,
        Commands::Threads(args) => commands::threads::execute(args, scope).await,
        Commands::Favorite(args) => commands::manage::favorite(args, scope).await,
        Commands::Unfavorite(args) => commands::manage::unfavorite(args, scope).await,
        Commands::Rename(args) => commands::manage::rename(args, scope).await,
        Commands::Delete(args) => commands::manage::delete(args, scope).await,
        Commands::Feedback(args) => commands::manage::feedback(args, scope).await,
        Commands::Execute(args) => commands::execute::execute(args, scope).await,
        Commands::Models(args) => commands::models::execute(args, scope).await,
        Commands::Prompts(args) => commands::prompts::execute(args, scope).await,
        Commands::Page(args) => commands::page::execute(args, scope).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<ChatError>() {
        Some(ChatError::Config(_)) => ExitCodes::CONFIG_ERROR,
        Some(ChatError::Validation(_)) | Some(ChatError::NotFound(_)) => ExitCodes::INVALID_ARGS,
        Some(ChatError::Request { .. }) | Some(ChatError::Http(_)) | Some(ChatError::Transport(_)) => {
            ExitCodes::REQUEST_ERROR
        }
        Some(_) => ExitCodes::GENERAL_ERROR,
        None => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("argument") || msg.contains("not found") {
                ExitCodes::INVALID_ARGS
            } else {
                ExitCodes::GENERAL_ERROR
            }
        }
    }
}
