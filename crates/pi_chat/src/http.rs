//! reqwest implementation of the Pi API.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::backend::{
    Attachment, ChatArtifact, ConvertToPageRequest, ExecuteActionRequest, ExecuteActionResponse, FeedbackRequest,
    FollowUpRequest, FollowUpResponse, FrameStream, InitChatRequest, PiChatBackend, PromptTemplate, PromptsRequest,
    ThreadPage, TokenRequest, THREADS_PER_PAGE,
};
use crate::config::PiConfig;
use crate::error::{ChatError, ChatResult};
use crate::sse::decode_frames;
use crate::types::{AiModel, ChatHistory, ChatId, ThreadSummary, Token};

/// HTTP client for the Pi API
pub struct HttpBackend {
    config: PiConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct InitChatResponse {
    chat_id: ChatId,
}

#[derive(Deserialize)]
struct TokenResponse {
    stream_token: String,
}

#[derive(Deserialize)]
struct TitleResponse {
    title: String,
}

#[derive(Deserialize)]
struct HistoryResponse {
    results: ChatHistory,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<AiModel>,
}

#[derive(Deserialize)]
struct PromptsResponse {
    #[serde(default)]
    templates: Vec<PromptTemplate>,
}

#[derive(Deserialize)]
struct ArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<ChatArtifact>,
}

#[derive(Deserialize)]
struct AttachmentsResponse {
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Deserialize)]
struct PageResponse {
    page_url: String,
}

#[derive(Serialize)]
struct ChatRef<'a> {
    chat_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    workspace_id: Option<&'a str>,
}

impl HttpBackend {
    pub fn new(config: PiConfig) -> ChatResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &PiConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.config.endpoint(path);
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.config.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Non-streaming request with the configured timeout.
    async fn send(&self, builder: RequestBuilder) -> ChatResult<Response> {
        let response = builder.timeout(self.config.request_timeout()).send().await?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ChatResult<T> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ChatError::Serialization(format!("Failed to parse response: {}", e)))
    }
}

/// Turn a non-success response into a request error carrying its message.
async fn check_status(response: Response) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<serde_json::Value>(&body)
        .unwrap_or_else(|_| json!({ "message": format!("HTTP {}: {}", status, body) }));
    warn!("Pi API error {}: {}", status, body);
    Err(ChatError::from_body(Some(status.as_u16()), &parsed))
}

fn workspace_query(workspace_id: Option<&str>) -> Vec<(&'static str, String)> {
    workspace_id
        .map(|id| vec![("workspace_id", id.to_string())])
        .unwrap_or_default()
}

#[async_trait]
impl PiChatBackend for HttpBackend {
    async fn create_chat(&self, request: &InitChatRequest) -> ChatResult<ChatId> {
        let response: InitChatResponse = self
            .send_json(self.request(Method::POST, "/api/v1/chat/initialize-chat/").json(request))
            .await?;
        Ok(response.chat_id)
    }

    async fn retrieve_token(&self, request: &TokenRequest) -> ChatResult<Token> {
        let response: TokenResponse = self
            .send_json(self.request(Method::POST, "/api/v1/chat/queue-answer/").json(request))
            .await?;
        Ok(Token::new(response.stream_token))
    }

    async fn stream_answer(&self, token: &Token) -> ChatResult<FrameStream> {
        let path = format!("/api/v1/chat/stream-answer/{}", token);
        // No overall timeout: answers stream for as long as the model writes.
        let response = self
            .request(Method::GET, &path)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(decode_frames(response.bytes_stream().boxed()))
    }

    async fn retrieve_title(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<String> {
        let body = ChatRef { chat_id, workspace_id };
        let response: TitleResponse = self
            .send_json(self.request(Method::POST, "/api/v1/chat/generate-title/").json(&body))
            .await?;
        Ok(response.title)
    }

    async fn execute_action(&self, request: &ExecuteActionRequest) -> ChatResult<ExecuteActionResponse> {
        self.send_json(self.request(Method::POST, "/api/v1/chat/execute-action/").json(request))
            .await
    }

    async fn follow_up(&self, request: &FollowUpRequest) -> ChatResult<FollowUpResponse> {
        let path = format!("/api/v1/artifacts/{}/followup/", request.artifact_id);
        self.send_json(self.request(Method::POST, &path).json(request)).await
    }

    async fn retrieve_chat(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<ChatHistory> {
        let mut query = workspace_query(workspace_id);
        query.push(("chat_id", chat_id.to_string()));
        let response: HistoryResponse = self
            .send_json(
                self.request(Method::GET, "/api/v1/chat/get-chat-history-object/")
                    .query(&query),
            )
            .await?;
        Ok(response.results)
    }

    async fn list_user_threads(
        &self,
        workspace_id: Option<&str>,
        is_project_chat: bool,
        cursor: &str,
    ) -> ChatResult<ThreadPage> {
        let mut query = workspace_query(workspace_id);
        query.push(("per_page", THREADS_PER_PAGE.to_string()));
        query.push(("is_project_chat", is_project_chat.to_string()));
        query.push(("cursor", cursor.to_string()));
        self.send_json(self.request(Method::GET, "/api/v1/chat/get-user-threads/").query(&query))
            .await
    }

    async fn list_recent_chats(&self, workspace_id: Option<&str>) -> ChatResult<ThreadPage> {
        self.send_json(
            self.request(Method::GET, "/api/v1/chat/get-recent-user-threads/")
                .query(&workspace_query(workspace_id)),
        )
        .await
    }

    async fn list_favorite_chats(&self, workspace_id: Option<&str>) -> ChatResult<Vec<ThreadSummary>> {
        self.send_json(
            self.request(Method::GET, "/api/v1/chat/get-favorite-chats/")
                .query(&workspace_query(workspace_id)),
        )
        .await
    }

    async fn list_models(&self, workspace_id: Option<&str>) -> ChatResult<Vec<AiModel>> {
        let response: ModelsResponse = self
            .send_json(
                self.request(Method::GET, "/api/v1/chat/get-models/")
                    .query(&workspace_query(workspace_id)),
            )
            .await?;
        Ok(response.models)
    }

    async fn favorite_chat(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<()> {
        let body = ChatRef { chat_id, workspace_id };
        self.send(self.request(Method::POST, "/api/v1/chat/favorite-chat/").json(&body))
            .await?;
        Ok(())
    }

    async fn unfavorite_chat(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<()> {
        let body = ChatRef { chat_id, workspace_id };
        self.send(self.request(Method::POST, "/api/v1/chat/unfavorite-chat/").json(&body))
            .await?;
        Ok(())
    }

    async fn rename_chat(&self, chat_id: &str, title: &str, workspace_id: Option<&str>) -> ChatResult<()> {
        let mut body = json!({ "chat_id": chat_id, "title": title });
        if let Some(workspace_id) = workspace_id {
            body["workspace_id"] = json!(workspace_id);
        }
        self.send(self.request(Method::POST, "/api/v1/chat/rename-chat/").json(&body))
            .await?;
        Ok(())
    }

    async fn destroy_chat(&self, chat_id: &str, workspace_slug: &str) -> ChatResult<()> {
        let body = json!({ "chat_id": chat_id, "workspace_slug": workspace_slug });
        self.send(self.request(Method::DELETE, "/api/v1/chat/delete-chat/").json(&body))
            .await?;
        Ok(())
    }

    async fn post_feedback(&self, request: &FeedbackRequest) -> ChatResult<()> {
        self.send(self.request(Method::POST, "/api/v1/chat/feedback/").json(request))
            .await?;
        Ok(())
    }

    async fn fetch_prompts(&self, request: &PromptsRequest) -> ChatResult<Vec<PromptTemplate>> {
        let response: PromptsResponse = self
            .send_json(self.request(Method::POST, "/api/v1/chat/start/set-prompts/").json(request))
            .await?;
        Ok(response.templates)
    }

    async fn list_artifacts(&self, chat_id: &str) -> ChatResult<Vec<ChatArtifact>> {
        let path = format!("/api/v1/artifacts/chat/{}/", chat_id);
        let response: ArtifactsResponse = self.send_json(self.request(Method::GET, &path)).await?;
        Ok(response.artifacts)
    }

    async fn list_attachments(&self, chat_id: &str) -> ChatResult<Vec<Attachment>> {
        let response: AttachmentsResponse = self
            .send_json(
                self.request(Method::GET, "/api/v1/attachments/chat/")
                    .query(&[("chat_id", chat_id)]),
            )
            .await?;
        Ok(response.attachments)
    }

    async fn convert_to_page(&self, request: &ConvertToPageRequest) -> ChatResult<String> {
        let response: PageResponse = self
            .send_json(self.request(Method::POST, "/api/v1/chat-ctas/save-as-page/").json(request))
            .await?;
        Ok(response.page_url)
    }
}
