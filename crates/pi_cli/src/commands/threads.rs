//! Threads command - List chat threads.

use anyhow::Result;
use clap::Args;

use pi_chat::ChatSession;

use super::{connect, Scope};

#[derive(Args)]
pub struct ThreadsArgs {
    /// List project chats instead of personal ones
    #[arg(long)]
    project: bool,

    /// List favorites only
    #[arg(long, conflicts_with = "project")]
    favorites: bool,

    /// Follow cursors until every page is loaded
    #[arg(long)]
    all: bool,

    /// Also merge recently active chats
    #[arg(long)]
    recent: bool,
}

pub async fn execute(args: ThreadsArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    let registry = &conn.registry;
    let workspace_id = conn.workspace_id();

    if args.favorites {
        registry.fetch_favorite_chats(workspace_id).await?;
        print_sessions(&registry.favorite_chats());
        return Ok(());
    }

    let mut cursor = registry.fetch_user_threads(workspace_id, args.project, None).await?;
    while args.all {
        let Some(next) = cursor.clone() else {
            break;
        };
        if !registry.thread_listing(args.project).next_page_results {
            break;
        }
        cursor = registry
            .fetch_user_threads(workspace_id, args.project, Some(&next))
            .await?;
    }
    if args.recent {
        registry.fetch_recent_chats(workspace_id, args.project).await?;
    }

    let sessions = match (args.project, workspace_id) {
        (true, Some(workspace)) => registry.user_threads_by_workspace(workspace),
        _ => registry.user_threads(args.project),
    };
    print_sessions(&sessions);

    let listing = registry.thread_listing(args.project);
    if listing.next_page_results {
        if let Some(next) = &listing.next_cursor {
            println!();
            println!("More threads available (next cursor {}); pass --all to load them", next);
        }
    }
    Ok(())
}

fn print_sessions(sessions: &[ChatSession]) {
    if sessions.is_empty() {
        println!("No chats found");
        return;
    }
    for session in sessions {
        let star = if session.is_favorite { "⭐" } else { "  " };
        println!(
            "{} {}  {}  ({})",
            star,
            session.chat_id,
            session.title,
            session.last_modified.format("%Y-%m-%d %H:%M")
        );
    }
}
