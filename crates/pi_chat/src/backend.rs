//! Backend collaborator trait and wire types.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactData;
use crate::error::ChatResult;
use crate::frame::WireFrame;
use crate::types::{Action, AiModel, ChatHistory, ChatId, Feedback, Focus, FocusEntity, ThreadSummary, Token};

/// Source tag sent with every query
pub const QUERY_SOURCE: &str = "web";

/// Model used when none has been selected
pub const DEFAULT_LLM: &str = "gpt-4.1";

/// Page size used for thread listings
pub const THREADS_PER_PAGE: u32 = 100;

/// Decoded answer stream for one token
pub type FrameStream = BoxStream<'static, ChatResult<WireFrame>>;

/// Body of `initialize-chat`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitChatRequest {
    pub workspace_in_context: bool,
    pub is_project_chat: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl InitChatRequest {
    pub fn new(focus: &Focus, is_project_chat: bool, workspace_id: Option<String>) -> Self {
        let project_id = (focus.is_in_workspace_context && focus.entity_type == FocusEntity::ProjectId)
            .then(|| focus.entity_identifier.clone());
        Self {
            workspace_in_context: focus.is_in_workspace_context,
            is_project_chat,
            workspace_id,
            project_id,
        }
    }
}

/// Body of `queue-answer`, answered with a stream token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenRequest {
    pub chat_id: ChatId,
    pub query: String,
    pub is_new: bool,
    pub is_temp: bool,
    pub workspace_in_context: bool,
    pub source: String,
    pub llm: String,
    pub context: serde_json::Value,
    pub is_project_chat: bool,
    pub workspace_slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub attachment_ids: Vec<String>,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl TokenRequest {
    /// Put the focus entity into its wire field.
    pub fn with_focus(mut self, focus: &Focus) -> Self {
        if focus.is_in_workspace_context {
            match focus.entity_type {
                FocusEntity::ProjectId => self.project_id = Some(focus.entity_identifier.clone()),
                FocusEntity::WorkspaceId => self.workspace_id = Some(focus.entity_identifier.clone()),
            }
        }
        self
    }
}

/// One artifact in an execution batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactPayload {
    pub artifact_id: String,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_data: Option<ArtifactData>,
}

/// Body of `execute-action`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteActionRequest {
    pub workspace_id: String,
    pub chat_id: ChatId,
    pub message_id: String,
    pub artifact_data: Vec<ArtifactPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecuteActionResponse {
    #[serde(default)]
    pub action_summary: Option<serde_json::Value>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Body of `follow-up`: asks for a revision of one artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowUpRequest {
    pub query: String,
    pub workspace_id: String,
    pub chat_id: ChatId,
    pub artifact_id: String,
    #[serde(rename = "current_artifact_data")]
    pub artifact_data: ArtifactData,
    #[serde(rename = "user_message_id")]
    pub message_id: String,
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FollowUpResponse {
    pub success: bool,
    #[serde(default)]
    pub artifact_data: ArtifactData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRequest {
    pub message_index: usize,
    pub chat_id: ChatId,
    pub feedback: Feedback,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

/// One page of a thread listing
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThreadPage {
    #[serde(default)]
    pub results: Vec<ThreadSummary>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub prev_cursor: Option<String>,
    #[serde(default)]
    pub next_page_results: bool,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: Option<u64>,
}

/// Body of `set-prompts`: preset questions for a new chat
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptsRequest {
    pub workspace_id: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl PromptsRequest {
    pub fn new(workspace_id: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            mode: mode.into(),
            project_id: None,
            entity_id: None,
            entity_type: None,
        }
    }
}

/// A preset prompt. Fields the engine does not read are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An artifact as listed for a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatArtifact {
    pub artifact_id: String,
    #[serde(flatten)]
    pub data: ArtifactData,
}

/// A file attached to a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Body of `save-as-page`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertToPageRequest {
    pub chat_id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub description_html: String,
    pub workspace_slug: String,
    pub page_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl ConvertToPageRequest {
    /// A project page when `project_id` is set, a workspace page otherwise.
    pub fn new(chat_id: &str, description_html: &str, workspace_slug: &str, project_id: Option<&str>) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            name: None,
            description_html: description_html.to_string(),
            workspace_slug: workspace_slug.to_string(),
            page_type: if project_id.is_some() { "project" } else { "workspace" }.to_string(),
            project_id: project_id.map(str::to_string),
        }
    }
}

/// The Pi API as seen by the engine
#[async_trait]
pub trait PiChatBackend: Send + Sync {
    /// Create a chat and return its id.
    async fn create_chat(&self, request: &InitChatRequest) -> ChatResult<ChatId>;

    /// Queue a query and return the token to stream its answer.
    async fn retrieve_token(&self, request: &TokenRequest) -> ChatResult<Token>;

    /// Open the answer stream for a token.
    async fn stream_answer(&self, token: &Token) -> ChatResult<FrameStream>;

    /// Generate a title for a chat after its first exchange.
    async fn retrieve_title(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<String>;

    async fn execute_action(&self, request: &ExecuteActionRequest) -> ChatResult<ExecuteActionResponse>;

    async fn follow_up(&self, request: &FollowUpRequest) -> ChatResult<FollowUpResponse>;

    async fn retrieve_chat(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<ChatHistory>;

    async fn list_user_threads(
        &self,
        workspace_id: Option<&str>,
        is_project_chat: bool,
        cursor: &str,
    ) -> ChatResult<ThreadPage>;

    async fn list_recent_chats(&self, workspace_id: Option<&str>) -> ChatResult<ThreadPage>;

    async fn list_favorite_chats(&self, workspace_id: Option<&str>) -> ChatResult<Vec<ThreadSummary>>;

    async fn list_models(&self, workspace_id: Option<&str>) -> ChatResult<Vec<AiModel>>;

    async fn favorite_chat(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<()>;

    async fn unfavorite_chat(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<()>;

    async fn rename_chat(&self, chat_id: &str, title: &str, workspace_id: Option<&str>) -> ChatResult<()>;

    async fn destroy_chat(&self, chat_id: &str, workspace_slug: &str) -> ChatResult<()>;

    async fn post_feedback(&self, request: &FeedbackRequest) -> ChatResult<()>;

    /// Preset prompts for starting a chat.
    async fn fetch_prompts(&self, request: &PromptsRequest) -> ChatResult<Vec<PromptTemplate>>;

    async fn list_artifacts(&self, chat_id: &str) -> ChatResult<Vec<ChatArtifact>>;

    async fn list_attachments(&self, chat_id: &str) -> ChatResult<Vec<Attachment>>;

    /// Save content as a page and return its URL.
    async fn convert_to_page(&self, request: &ConvertToPageRequest) -> ChatResult<String>;
}
