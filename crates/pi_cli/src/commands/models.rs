//! Models command - List available models.

use anyhow::Result;
use clap::Args;

use super::{connect, Scope};

#[derive(Args)]
pub struct ModelsArgs {
    /// Print the catalogue as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: ModelsArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    let models = conn.registry.fetch_models(conn.workspace_id()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    if models.is_empty() {
        println!("No models available");
        return Ok(());
    }

    let active = conn.registry.active_model();
    for model in &models {
        let marker = if active.as_deref() == Some(model.id.as_str()) { "▶" } else { " " };
        let default = if model.is_default { " (default)" } else { "" };
        println!("{} {}  {}{}", marker, model.id, model.name, default);
    }
    if let Some(configured) = &conn.default_model {
        if !models.iter().any(|m| &m.id == configured) {
            println!();
            println!("⚠️  Configured model {} is not offered by this workspace", configured);
        }
    }
    Ok(())
}
