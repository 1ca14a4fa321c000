//! Prompts command - List preset prompts for a new chat.

use anyhow::Result;
use clap::Args;

use pi_chat::{PromptsRequest, DEFAULT_MODE};

use super::{connect, Scope};

#[derive(Args)]
pub struct PromptsArgs {
    /// Answer mode the prompts are for
    #[arg(short, long, default_value = DEFAULT_MODE)]
    mode: String,

    /// Scope the prompts to a project
    #[arg(short, long)]
    project: Option<String>,
}

pub async fn execute(args: PromptsArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    let workspace_id = conn.require_workspace_id()?;

    let mut request = PromptsRequest::new(workspace_id, args.mode);
    request.project_id = args.project;
    let templates = conn.registry.fetch_prompts(&request).await?;

    if templates.is_empty() {
        println!("No prompts available");
        return Ok(());
    }
    for template in &templates {
        println!("💡 {}", template.text);
    }
    Ok(())
}
