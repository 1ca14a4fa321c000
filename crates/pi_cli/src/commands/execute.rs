//! Execute command - Execute the actions proposed in an answer.

use anyhow::Result;
use clap::Args;

use pi_chat::Token;

use super::{connect, Scope};

#[derive(Args)]
pub struct ExecuteArgs {
    /// Chat holding the proposal
    #[arg(short, long)]
    chat: String,

    /// Message token of the answer that proposed the actions
    #[arg(short, long)]
    message: String,
}

pub async fn execute(args: ExecuteArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    let registry = &conn.registry;
    let workspace_id = conn.require_workspace_id()?.to_string();
    registry.fetch_chat_by_id(&args.chat, Some(&workspace_id)).await?;

    let token = Token::new(args.message);
    println!("🛠️  Executing actions...");
    let result = registry.execute_action(&workspace_id, &args.chat, &token).await;

    let grouped = registry.grouped_artifacts_by_dialogue(&args.chat, &token);
    for record in &grouped.successful {
        println!("   ✅ {}", describe(record));
    }
    for record in &grouped.failed {
        println!("   ❌ {}", describe(record));
    }

    let succeeded = result?;
    println!();
    println!(
        "{} of {} action(s) succeeded",
        succeeded.len(),
        grouped.successful.len() + grouped.failed.len()
    );
    Ok(())
}

fn describe(record: &serde_json::Map<String, serde_json::Value>) -> String {
    let field = |key: &str| record.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let mut line = format!("{} {}", field("action"), field("artifact_type"));
    let name = field("entity_name");
    if !name.is_empty() {
        line.push_str(&format!(" {}", name));
    }
    let url = field("entity_url");
    if !url.is_empty() {
        line.push_str(&format!(" <{}>", url));
    }
    let error = field("error");
    if !error.is_empty() {
        line.push_str(&format!(": {}", error));
    }
    line
}
