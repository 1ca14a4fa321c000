//! Thread management commands - favorite, rename, delete and rate chats.

use anyhow::Result;
use clap::{Args, ValueEnum};
use tracing::info;

use pi_chat::Feedback;

use super::{connect, Scope};

#[derive(Args)]
pub struct ChatArgs {
    /// Chat to act on
    chat: String,
}

#[derive(Args)]
pub struct RenameArgs {
    /// Chat to rename
    chat: String,

    /// New title
    title: String,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Rating {
    Up,
    Down,
}

#[derive(Args)]
pub struct FeedbackArgs {
    /// Chat holding the answer
    chat: String,

    /// Position of the answer in the chat, starting at 0
    index: usize,

    /// Whether the answer was helpful
    #[arg(value_enum)]
    rating: Rating,

    /// Optional comment
    #[arg(short, long)]
    message: Option<String>,
}

pub async fn favorite(args: ChatArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    conn.registry.fetch_chat_by_id(&args.chat, conn.workspace_id()).await?;
    conn.registry.favorite_chat(&args.chat, conn.workspace_id()).await?;
    println!("⭐ Added {} to favorites", args.chat);
    Ok(())
}

pub async fn unfavorite(args: ChatArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    conn.registry.fetch_chat_by_id(&args.chat, conn.workspace_id()).await?;
    conn.registry.unfavorite_chat(&args.chat, conn.workspace_id()).await?;
    println!("Removed {} from favorites", args.chat);
    Ok(())
}

pub async fn rename(args: RenameArgs, scope: Scope) -> Result<()> {
    if args.title.trim().is_empty() {
        anyhow::bail!("Invalid argument: title must not be empty");
    }
    let conn = connect(scope)?;
    conn.registry.fetch_chat_by_id(&args.chat, conn.workspace_id()).await?;
    conn.registry
        .rename_chat(&args.chat, args.title.trim(), conn.workspace_id())
        .await?;
    println!("✏️  Renamed {} to \"{}\"", args.chat, args.title.trim());
    Ok(())
}

pub async fn delete(args: ChatArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    let slug = conn.require_workspace_slug()?.to_string();
    conn.registry.delete_chat(&args.chat, &slug).await?;
    info!("Deleted chat {}", args.chat);
    println!("🗑️  Deleted {}", args.chat);
    Ok(())
}

pub async fn feedback(args: FeedbackArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    conn.registry.fetch_chat_by_id(&args.chat, conn.workspace_id()).await?;

    let feedback = match args.rating {
        Rating::Up => Feedback::Positive,
        Rating::Down => Feedback::Negative,
    };
    conn.registry
        .send_feedback(
            &args.chat,
            args.index,
            feedback,
            conn.workspace_id(),
            args.message.as_deref(),
        )
        .await?;
    println!("Thanks for the feedback");
    Ok(())
}
