//! Page command - Save an answer as a page.

use anyhow::Result;
use clap::Args;

use super::{connect, Scope};

#[derive(Args)]
pub struct PageArgs {
    /// Chat holding the answer
    chat: String,

    /// Position of the answer in the chat, starting at 0
    index: usize,

    /// Create the page in this project instead of the workspace
    #[arg(short, long)]
    project: Option<String>,
}

pub async fn execute(args: PageArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    let slug = conn.require_workspace_slug()?.to_string();
    let registry = &conn.registry;
    registry.fetch_chat_by_id(&args.chat, conn.workspace_id()).await?;

    let dialogue = registry.dialogue(&args.chat);
    let Some((_, entry)) = dialogue.get(args.index) else {
        anyhow::bail!("Invalid argument: chat {} has no answer {}", args.chat, args.index);
    };

    let url = registry
        .convert_to_page(&args.chat, &to_html(&entry.answer), &slug, args.project.as_deref())
        .await?;
    println!("📄 Saved as {}", url);
    Ok(())
}

/// One paragraph per blank-line separated block
fn to_html(answer: &str) -> String {
    answer
        .split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let escaped = block
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
                .replace('\n', "<br/>");
            format!("<p>{}</p>", escaped)
        })
        .collect()
}
