//! Ask command - Ask a question and stream the answer.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use pi_chat::{ChatEvent, DialogueEntry, DialogueKey, Focus, QueryParams, FALLBACK_ANSWER};

use super::{connect, Scope};

#[derive(Args)]
pub struct AskArgs {
    /// The question to ask
    query: String,

    /// Continue an existing chat instead of starting a new one
    #[arg(short, long)]
    chat: Option<String>,

    /// Focus the answer on a project
    #[arg(long, conflicts_with = "workspace_focus")]
    project: Option<String>,

    /// Focus the answer on the whole workspace
    #[arg(long)]
    workspace_focus: bool,

    /// Answer mode
    #[arg(long)]
    mode: Option<String>,

    /// Model to answer with
    #[arg(short, long)]
    model: Option<String>,

    /// Attachment ids to send with the question
    #[arg(long = "attachment")]
    attachments: Vec<String>,

    /// Print reasoning steps to stderr while the answer streams
    #[arg(long)]
    reasoning: bool,

    /// Execute proposed actions once the answer completes
    #[arg(long)]
    execute: bool,
}

pub async fn execute(args: AskArgs, scope: Scope) -> Result<()> {
    let conn = connect(scope)?;
    let registry = &conn.registry;

    let focus = match (&args.project, args.workspace_focus, conn.workspace_id()) {
        (Some(project), _, _) => Focus::project(project.clone()),
        (None, true, Some(workspace)) => Focus::workspace(workspace),
        _ => Focus::none(),
    };
    if let Some(model) = &args.model {
        registry.set_active_model(args.chat.as_deref(), model);
    }

    let chat_id = match &args.chat {
        Some(chat_id) => {
            registry.fetch_chat_by_id(chat_id, conn.workspace_id()).await?;
            chat_id.clone()
        }
        None => {
            let chat_id = registry
                .create_new_chat(&focus, args.mode.as_deref(), false, conn.workspace_id())
                .await?;
            info!("Started chat {}", chat_id);
            chat_id
        }
    };

    let params = QueryParams {
        focus,
        is_project_chat: false,
        workspace_slug: conn.workspace_slug.clone().unwrap_or_default(),
        workspace_id: conn.workspace_id.clone(),
        attachment_ids: args.attachments.clone(),
        mode: args.mode.clone(),
    };

    let mut events = registry.subscribe();
    let key = registry.get_answer(&chat_id, &args.query, params).await?;

    if !key.is_provisional() {
        let mut printer = AnswerPrinter::new(args.reasoning);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(ChatEvent::DialogueUpdated { chat_id: c, key: k }) if c == chat_id && k == key => {
                        if let Some(entry) = registry.entry(&chat_id, &key) {
                            printer.update(&entry);
                        }
                    }
                    Ok(ChatEvent::StreamClosed { chat_id: c, .. }) if c == chat_id => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Skipped {} updates", skipped);
                        if let Some(entry) = registry.entry(&chat_id, &key) {
                            printer.update(&entry);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    registry.abort_stream(&chat_id);
                    eprintln!();
                    eprintln!("⏹️  Stopped");
                    break;
                }
            }
        }
        if let Some(entry) = registry.entry(&chat_id, &key) {
            printer.update(&entry);
        }
        println!();
    }

    let Some(entry) = registry.entry(&chat_id, &key) else {
        anyhow::bail!("Answer for chat {} was not found", chat_id);
    };
    if entry.answer == FALLBACK_ANSWER {
        if key.is_provisional() {
            println!("{}", entry.answer);
        }
        anyhow::bail!("Pi could not answer this question");
    }

    if !entry.actions.is_empty() {
        println!();
        println!("🛠️  Proposed actions:");
        for action in &entry.actions {
            println!("   - {} {} ({})", action.action, action.artifact_type, action.artifact_id);
        }
        if let DialogueKey::Confirmed(token) = &key {
            if args.execute {
                let succeeded = registry
                    .execute_action(conn.require_workspace_id()?, &chat_id, token)
                    .await?;
                println!("✅ {} action(s) succeeded", succeeded.len());
            } else {
                println!("   Run `pi execute --chat {} --message {}` to apply them", chat_id, token);
            }
        }
    }

    println!();
    println!("💬 Chat: {}", chat_id);
    Ok(())
}

/// Prints the growing answer incrementally
struct AnswerPrinter {
    shown: String,
    tick: String,
    show_reasoning: bool,
}

impl AnswerPrinter {
    fn new(show_reasoning: bool) -> Self {
        Self {
            shown: String::new(),
            tick: String::new(),
            show_reasoning,
        }
    }

    fn update(&mut self, entry: &DialogueEntry) {
        if self.show_reasoning && !entry.current_tick.is_empty() && entry.current_tick != self.tick {
            self.tick = entry.current_tick.clone();
            eprintln!("💭 {}", self.tick);
        }

        // A fallback answer replaces, rather than extends, what was shown
        if !entry.answer.starts_with(&self.shown) {
            println!();
            self.shown.clear();
        }
        let fresh = &entry.answer[self.shown.len()..];
        if !fresh.is_empty() {
            print!("{}", fresh);
            if let Err(e) = std::io::stdout().flush() {
                debug!("Could not flush stdout: {}", e);
            }
            self.shown = entry.answer.clone();
        }
    }
}
