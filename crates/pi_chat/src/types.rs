//! Core types for the Pi Chat engine.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a chat session
pub type ChatId = String;

/// Title given to a chat before the backend generates one
pub const NEW_CHAT_TITLE: &str = "New Chat";

/// Mode used when a chat does not carry one
pub const DEFAULT_MODE: &str = "ask";

/// Opaque per-query token issued by the backend.
///
/// Doubles as the dialogue-map key and the stream path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Key of a dialogue entry within a chat.
///
/// An entry is `Provisional` from the moment the query is shown until the
/// backend issues its token, then it is rekeyed to `Confirmed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DialogueKey {
    Provisional(Uuid),
    Confirmed(Token),
}

impl DialogueKey {
    pub fn provisional() -> Self {
        Self::Provisional(Uuid::new_v4())
    }

    pub fn token(&self) -> Option<&Token> {
        match self {
            Self::Confirmed(token) => Some(token),
            Self::Provisional(_) => None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl From<Token> for DialogueKey {
    fn from(token: Token) -> Self {
        Self::Confirmed(token)
    }
}

impl fmt::Display for DialogueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisional(id) => write!(f, "provisional:{}", id),
            Self::Confirmed(token) => write!(f, "{}", token),
        }
    }
}

/// Execution progress of the actions proposed in one dialogue entry.
///
/// Ordered so that a valid transition never moves to a smaller value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
}

/// User feedback on an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

/// Entity created or touched by an executed action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_identifier: Option<String>,
}

/// One assistant-proposed operation on an artifact.
///
/// Same shape on the `actions` stream event and in execution results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub artifact_id: String,
    /// Verb, e.g. `create_issue`
    pub action: String,
    pub artifact_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<ActionEntity>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One query/answer exchange within a chat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueEntry {
    pub query: String,
    /// Token this entry was issued under, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub reasoning: String,
    /// Last reasoning header seen
    #[serde(default)]
    pub current_tick: String,
    #[serde(skip)]
    pub is_pi_thinking: bool,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_summary: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
}

impl DialogueEntry {
    /// A fresh entry waiting for its first frame.
    pub fn pending(query: impl Into<String>, llm: Option<String>, attachment_ids: Vec<String>) -> Self {
        Self {
            query: query.into(),
            llm,
            is_pi_thinking: true,
            attachment_ids,
            ..Self::default()
        }
    }

    /// Clear streamed content so the same entry can be answered again.
    pub fn reset_for_regeneration(&mut self, llm: Option<String>) {
        self.llm = llm;
        self.answer.clear();
        self.reasoning.clear();
        self.current_tick.clear();
        self.actions.clear();
        self.execution_status = None;
        self.action_error = None;
        self.action_summary = None;
        self.is_pi_thinking = true;
    }

    /// Terminal state after a failed stream or token request.
    pub fn fail_with_fallback(&mut self) {
        self.is_pi_thinking = false;
        self.answer = crate::error::FALLBACK_ANSWER.to_string();
    }
}

/// Which kind of entity a chat is focused on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusEntity {
    ProjectId,
    WorkspaceId,
}

impl FocusEntity {
    /// Field name used on the wire
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::ProjectId => "project_id",
            Self::WorkspaceId => "workspace_id",
        }
    }
}

/// Focus scoping of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Focus {
    pub is_in_workspace_context: bool,
    pub entity_type: FocusEntity,
    pub entity_identifier: String,
}

impl Focus {
    /// No workspace context.
    pub fn none() -> Self {
        Self {
            is_in_workspace_context: false,
            entity_type: FocusEntity::WorkspaceId,
            entity_identifier: String::new(),
        }
    }

    pub fn workspace(workspace_id: impl Into<String>) -> Self {
        Self {
            is_in_workspace_context: true,
            entity_type: FocusEntity::WorkspaceId,
            entity_identifier: workspace_id.into(),
        }
    }

    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            is_in_workspace_context: true,
            entity_type: FocusEntity::ProjectId,
            entity_identifier: project_id.into(),
        }
    }
}

/// An in-memory chat session
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub chat_id: ChatId,
    pub dialogue: crate::dialogue::DialogueBuilder,
    pub title: String,
    pub llm: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub is_favorite: bool,
    pub is_focus_enabled: bool,
    pub focus_workspace_id: String,
    pub focus_project_id: String,
    pub workspace_id: Option<String>,
    pub mode: Option<String>,
}

impl ChatSession {
    /// Create an empty session
    pub fn new(chat_id: impl Into<ChatId>) -> Self {
        Self {
            chat_id: chat_id.into(),
            dialogue: crate::dialogue::DialogueBuilder::new(),
            title: String::new(),
            llm: None,
            last_modified: Utc::now(),
            is_favorite: false,
            is_focus_enabled: false,
            focus_workspace_id: String::new(),
            focus_project_id: String::new(),
            workspace_id: None,
            mode: None,
        }
    }

    /// Focus derived from the session's scoping fields
    pub fn focus(&self) -> Focus {
        if !self.focus_project_id.is_empty() {
            Focus {
                is_in_workspace_context: self.is_focus_enabled,
                entity_type: FocusEntity::ProjectId,
                entity_identifier: self.focus_project_id.clone(),
            }
        } else {
            Focus {
                is_in_workspace_context: self.is_focus_enabled,
                entity_type: FocusEntity::WorkspaceId,
                entity_identifier: self.focus_workspace_id.clone(),
            }
        }
    }

    pub fn mode(&self) -> &str {
        self.mode.as_deref().unwrap_or(DEFAULT_MODE)
    }

    /// Merge listing metadata without touching the dialogue.
    pub fn apply_summary(&mut self, summary: &ThreadSummary) {
        self.title = summary.title.clone();
        if let Some(last_modified) = summary.last_modified {
            self.last_modified = last_modified;
        }
        if let Some(is_favorite) = summary.is_favorite {
            self.is_favorite = is_favorite;
        }
        if summary.workspace_id.is_some() {
            self.workspace_id = summary.workspace_id.clone();
        }
        if summary.llm.is_some() {
            self.llm = summary.llm.clone();
        }
    }
}

/// Thread listing entry as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub chat_id: ChatId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,
}

/// A model offered by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Artifacts of one dialogue entry split by action outcome
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedArtifacts {
    pub successful: Vec<serde_json::Map<String, serde_json::Value>>,
    pub failed: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Chat history payload from the backend
#[derive(Debug, Clone, Deserialize)]
pub struct ChatHistory {
    pub chat_id: ChatId,
    #[serde(default)]
    pub dialogue: Vec<DialogueEntry>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_focus_enabled: bool,
    #[serde(default)]
    pub focus_workspace_id: String,
    #[serde(default)]
    pub focus_project_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub llm: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Map of chat id to session
pub type ChatMap = HashMap<ChatId, ChatSession>;
