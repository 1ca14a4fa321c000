//! CLI command definitions.
//!
//! This module defines the command structure for the Pi Chat CLI. Every
//! subcommand talks to the Pi API through one `ChatRegistry`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pi_chat::{ChatRegistry, HttpBackend, PiConfig};
use tracing::debug;

pub mod ask;
pub mod execute;
pub mod manage;
pub mod models;
pub mod page;
pub mod prompts;
pub mod show;
pub mod threads;

/// Pi Chat - conversational assistant for the Pi workspace
#[derive(Parser)]
#[command(name = "pi")]
#[command(version, about = "Pi Chat - ask questions and act on your workspace")]
#[command(long_about = r#"
Pi Chat answers questions about a Pi workspace and proposes actions
(issues, cycles, modules) that can be reviewed and executed.

COMMANDS:
  ask         → Ask a question and stream the answer
  show        → Print a chat's history
  threads     → List chat threads
  favorite    → Mark a chat as favorite
  unfavorite  → Remove a chat from favorites
  rename      → Rename a chat
  delete      → Delete a chat
  feedback    → Rate an answer
  execute     → Execute the actions proposed in an answer
  models      → List available models
  prompts     → List preset prompts for a new chat
  page        → Save an answer as a page

CONFIGURATION:
  Settings are read from .pi/settings.json under the workspace root, with
  PI_BASE_URL, PI_API_TOKEN, PI_WORKSPACE_ID, PI_WORKSPACE_SLUG and
  PI_LLM_MODEL filling unset values.

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Configuration error
  4 - Request rejected by the Pi API
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding .pi/settings.json (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Workspace id, overriding the configured one
    #[arg(long, global = true, env = "PI_WORKSPACE_ID")]
    pub workspace_id: Option<String>,

    /// Workspace slug, overriding the configured one
    #[arg(long, global = true, env = "PI_WORKSPACE_SLUG")]
    pub workspace_slug: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn scope(&self) -> Scope {
        Scope {
            root: self.root.clone(),
            workspace_id: self.workspace_id.clone(),
            workspace_slug: self.workspace_slug.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a question and stream the answer
    Ask(ask::AskArgs),

    /// Print a chat's history
    Show(show::ShowArgs),

    /// List chat threads
    Threads(threads::ThreadsArgs),

    /// Mark a chat as favorite
    Favorite(manage::ChatArgs),

    /// Remove a chat from favorites
    Unfavorite(manage::ChatArgs),

    /// Rename a chat
    Rename(manage::RenameArgs),

    /// Delete a chat
    Delete(manage::ChatArgs),

    /// Rate an answer
    Feedback(manage::FeedbackArgs),

    /// Execute the actions proposed in an answer
    Execute(execute::ExecuteArgs),

    /// List available models
    Models(models::ModelsArgs),

    /// List preset prompts for a new chat
    Prompts(prompts::PromptsArgs),

    /// Save an answer as a page
    Page(page::PageArgs),
}

/// Workspace scoping shared by every command
#[derive(Debug, Clone)]
pub struct Scope {
    pub root: Option<PathBuf>,
    pub workspace_id: Option<String>,
    pub workspace_slug: Option<String>,
}

/// A connected registry plus the resolved workspace scope
pub struct Connection {
    pub registry: ChatRegistry,
    pub workspace_id: Option<String>,
    pub workspace_slug: Option<String>,
    pub default_model: Option<String>,
}

impl Connection {
    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    /// Workspace id for calls that cannot run without one
    pub fn require_workspace_id(&self) -> Result<&str> {
        self.workspace_id
            .as_deref()
            .context("a workspace id is required (use --workspace-id or PI_WORKSPACE_ID)")
    }

    pub fn require_workspace_slug(&self) -> Result<&str> {
        self.workspace_slug
            .as_deref()
            .context("a workspace slug is required (use --workspace-slug or PI_WORKSPACE_SLUG)")
    }
}

/// Load configuration and build a registry over the HTTP backend.
pub fn connect(scope: Scope) -> Result<Connection> {
    let root = match scope.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let config = PiConfig::from_settings(&root)?;
    debug!("Using Pi API at {}", config.base_url);

    let workspace_id = scope.workspace_id.or_else(|| config.workspace_id.clone());
    let workspace_slug = scope.workspace_slug.or_else(|| config.workspace_slug.clone());
    let default_model = config.default_model.clone();

    let backend = HttpBackend::new(config)?;
    let registry = ChatRegistry::new(Arc::new(backend));
    if let Some(model) = &default_model {
        registry.set_active_model(None, model);
    }

    Ok(Connection {
        registry,
        workspace_id,
        workspace_slug,
        default_model,
    })
}
