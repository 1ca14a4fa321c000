//! Show command - Print a chat's history.

use anyhow::Result;
use clap::Args;

use pi_chat::ExecutionStatus;

use super::{connect, Scope};

#[derive(Args)]
pub struct ShowArgs {
    /// Chat to print
    chat: String,

    /// Print the raw history as JSON
    #[arg(long)]
    json: bool,

    /// Also list the chat's attachments and artifacts
    #[arg(long)]
    files: bool,
}

pub async fn execute(args: ShowArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    let registry = &conn.registry;
    if let Err(e) = registry.fetch_chat_by_id(&args.chat, conn.workspace_id()).await {
        if !registry.is_authorized(&args.chat) {
            return Err(anyhow::Error::from(e).context(format!("Access denied to chat {}", args.chat)));
        }
        return Err(e.into());
    }

    let Some(session) = registry.chat(&args.chat) else {
        anyhow::bail!("Chat not found: {}", args.chat);
    };
    let dialogue = registry.dialogue(&args.chat);

    if args.json {
        let entries: Vec<_> = dialogue.iter().map(|(_, entry)| entry).collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let star = if session.is_favorite { "⭐ " } else { "" };
    println!("{}{} ({})", star, session.title, session.chat_id);
    println!("   mode: {}", session.mode());
    if let Some(llm) = &session.llm {
        println!("   model: {}", llm);
    }

    for (index, (key, entry)) in dialogue.iter().enumerate() {
        println!();
        println!("[{}] ❓ {}", index, entry.query);
        println!("    {}", entry.answer.replace('\n', "\n    "));
        if !entry.actions.is_empty() {
            let status = match entry.execution_status {
                Some(ExecutionStatus::Pending) => "pending",
                Some(ExecutionStatus::Executing) => "executing",
                Some(ExecutionStatus::Completed) => "completed",
                None => "proposed",
            };
            println!("    🛠️  {} action(s), {} (message {})", entry.actions.len(), status, key);
            for action in &entry.actions {
                let outcome = if entry.execution_status == Some(ExecutionStatus::Completed) {
                    if action.success {
                        "✅"
                    } else {
                        "❌"
                    }
                } else {
                    "•"
                };
                println!("      {} {} {}", outcome, action.action, action.artifact_type);
            }
        }
        if let Some(error) = &entry.action_error {
            println!("    ⚠️  {}", error);
        }
    }

    if args.files {
        let attachments = registry.fetch_attachments(&args.chat).await?;
        let artifacts = registry.fetch_artifacts(&args.chat).await?;
        println!();
        println!("📎 {} attachment(s)", attachments.len());
        for attachment in &attachments {
            let name = attachment.filename.as_deref().unwrap_or("unnamed");
            match attachment.file_size {
                Some(size) => println!("   {}  {} ({} bytes)", attachment.id, name, size),
                None => println!("   {}  {}", attachment.id, name),
            }
        }
        println!("📦 {} artifact(s)", artifacts.len());
        for artifact in &artifacts {
            let name = artifact.data.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            println!("   {}  {}", artifact.artifact_id, name);
        }
    }
    Ok(())
}
