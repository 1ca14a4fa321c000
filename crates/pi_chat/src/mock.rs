//! Mock Pi backend for testing.
//!
//! Provides a scriptable implementation of the `PiChatBackend` trait so the
//! engine can be exercised without a running Pi API. Every call is captured
//! for later verification.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Semaphore};

use crate::backend::{
    Attachment, ChatArtifact, ConvertToPageRequest, ExecuteActionRequest, ExecuteActionResponse, FeedbackRequest,
    FollowUpRequest, FollowUpResponse, FrameStream, InitChatRequest, PiChatBackend, PromptTemplate, PromptsRequest,
    ThreadPage, TokenRequest,
};
use crate::error::{ChatError, ChatResult};
use crate::frame::WireFrame;
use crate::types::{AiModel, ChatHistory, ChatId, ThreadSummary, Token};

/// Sender half of a live mock stream
pub type FrameSender = mpsc::UnboundedSender<ChatResult<WireFrame>>;

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub chat_id: Option<String>,
    pub body: Option<serde_json::Value>,
}

/// Holds calls to one mock method until released.
///
/// The call is captured before it waits, so tests can observe it in flight.
#[derive(Clone)]
pub struct CallGate(Arc<Semaphore>);

impl CallGate {
    /// Let held and future calls through.
    pub fn release(&self) {
        self.0.add_permits(1);
    }
}

enum ScriptedStream {
    Frames(Vec<ChatResult<WireFrame>>),
    Live(mpsc::UnboundedReceiver<ChatResult<WireFrame>>),
}

/// Mock Pi backend for testing.
#[derive(Clone, Default)]
pub struct MockBackend {
    /// Tokens handed out by `retrieve_token`, in order.
    tokens: Arc<RwLock<VecDeque<Token>>>,
    /// Counter for generated tokens and chat ids.
    counter: Arc<AtomicUsize>,
    /// Scripted streams per token.
    streams: Arc<RwLock<HashMap<Token, ScriptedStream>>>,
    /// Methods that fail with the given message and status.
    failures: Arc<RwLock<HashMap<String, (String, u16)>>>,
    gates: Arc<RwLock<HashMap<String, Arc<Semaphore>>>>,
    title: Arc<RwLock<String>>,
    execute_responses: Arc<RwLock<VecDeque<ExecuteActionResponse>>>,
    follow_up_responses: Arc<RwLock<VecDeque<FollowUpResponse>>>,
    histories: Arc<RwLock<HashMap<ChatId, ChatHistory>>>,
    thread_pages: Arc<RwLock<HashMap<String, ThreadPage>>>,
    recent: Arc<RwLock<ThreadPage>>,
    favorites: Arc<RwLock<Vec<ThreadSummary>>>,
    models: Arc<RwLock<Vec<AiModel>>>,
    templates: Arc<RwLock<Vec<PromptTemplate>>>,
    artifacts: Arc<RwLock<HashMap<ChatId, Vec<ChatArtifact>>>>,
    attachments: Arc<RwLock<HashMap<ChatId, Vec<Attachment>>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            title: Arc::new(RwLock::new("Generated title".to_string())),
            ..Self::default()
        }
    }

    /// Queue a token for the next `retrieve_token` call.
    pub fn add_token(self, token: impl Into<Token>) -> Self {
        self.tokens.write().push_back(token.into());
        self
    }

    /// Script the complete frame sequence for a token.
    pub fn with_stream(self, token: impl Into<Token>, frames: Vec<WireFrame>) -> Self {
        self.streams.write().insert(
            token.into(),
            ScriptedStream::Frames(frames.into_iter().map(Ok).collect()),
        );
        self
    }

    /// Script a frame sequence that may include transport errors.
    pub fn with_stream_results(self, token: impl Into<Token>, frames: Vec<ChatResult<WireFrame>>) -> Self {
        self.streams
            .write()
            .insert(token.into(), ScriptedStream::Frames(frames));
        self
    }

    /// Register a stream driven by the test; frames are delivered as sent.
    pub fn live_stream(&self, token: impl Into<Token>) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.write().insert(token.into(), ScriptedStream::Live(rx));
        tx
    }

    /// Make every call to `method` fail with `message`.
    pub fn fail(&self, method: &str, message: &str) {
        self.fail_with_status(method, message, 500);
    }

    pub fn fail_with_status(&self, method: &str, message: &str, status: u16) {
        self.failures
            .write()
            .insert(method.to_string(), (message.to_string(), status));
    }

    /// Hold calls to `method` until the returned gate is released.
    pub fn hold(&self, method: &str) -> CallGate {
        let permits = Arc::new(Semaphore::new(0));
        self.gates.write().insert(method.to_string(), permits.clone());
        CallGate(permits)
    }

    pub fn recover(&self, method: &str) {
        self.failures.write().remove(method);
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        *self.title.write() = title.into();
        self
    }

    pub fn add_execute_response(self, response: ExecuteActionResponse) -> Self {
        self.execute_responses.write().push_back(response);
        self
    }

    pub fn add_follow_up_response(self, response: FollowUpResponse) -> Self {
        self.follow_up_responses.write().push_back(response);
        self
    }

    pub fn with_history(self, history: ChatHistory) -> Self {
        self.histories.write().insert(history.chat_id.clone(), history);
        self
    }

    /// Serve `page` for the given cursor.
    pub fn with_thread_page(self, cursor: impl Into<String>, page: ThreadPage) -> Self {
        self.thread_pages.write().insert(cursor.into(), page);
        self
    }

    pub fn with_recent(self, page: ThreadPage) -> Self {
        *self.recent.write() = page;
        self
    }

    pub fn with_favorites(self, favorites: Vec<ThreadSummary>) -> Self {
        *self.favorites.write() = favorites;
        self
    }

    pub fn with_models(self, models: Vec<AiModel>) -> Self {
        *self.models.write() = models;
        self
    }

    pub fn with_templates(self, templates: Vec<PromptTemplate>) -> Self {
        *self.templates.write() = templates;
        self
    }

    pub fn with_artifacts(self, chat_id: impl Into<ChatId>, artifacts: Vec<ChatArtifact>) -> Self {
        self.artifacts.write().insert(chat_id.into(), artifacts);
        self
    }

    pub fn with_attachments(self, chat_id: impl Into<ChatId>, attachments: Vec<Attachment>) -> Self {
        self.attachments.write().insert(chat_id.into(), attachments);
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get captured calls for a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.get_method_calls(method).len()
    }

    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Capture a call, wait at its gate if one is set, then apply any scripted failure.
    fn record<B: serde::Serialize>(
        &self,
        method: &str,
        chat_id: Option<&str>,
        body: Option<&B>,
    ) -> impl Future<Output = ChatResult<()>> + Send + '_ {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            chat_id: chat_id.map(str::to_string),
            body: body.and_then(|b| serde_json::to_value(b).ok()),
        });
        let method = method.to_string();
        async move {
            let gate = self.gates.read().get(&method).cloned();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
            match self.failures.read().get(&method) {
                Some((message, status)) => Err(ChatError::Request {
                    message: message.clone(),
                    status: Some(*status),
                }),
                None => Ok(()),
            }
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

const NO_BODY: Option<&()> = None;

#[async_trait]
impl PiChatBackend for MockBackend {
    async fn create_chat(&self, request: &InitChatRequest) -> ChatResult<ChatId> {
        self.record("create_chat", None, Some(request)).await?;
        Ok(self.next_id("chat"))
    }

    async fn retrieve_token(&self, request: &TokenRequest) -> ChatResult<Token> {
        self.record("retrieve_token", Some(&request.chat_id), Some(request)).await?;
        let queued = self.tokens.write().pop_front();
        Ok(queued.unwrap_or_else(|| Token::new(self.next_id("token"))))
    }

    async fn stream_answer(&self, token: &Token) -> ChatResult<FrameStream> {
        self.record("stream_answer", None, Some(&token.to_string())).await?;
        let scripted = self.streams.write().remove(token);
        let stream = match scripted {
            Some(ScriptedStream::Frames(frames)) => stream::iter(frames).boxed(),
            Some(ScriptedStream::Live(rx)) => {
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|frame| (frame, rx)) })
                    .boxed()
            }
            None => stream::iter(vec![Ok(WireFrame::Done)]).boxed(),
        };
        Ok(stream)
    }

    async fn retrieve_title(&self, chat_id: &str, _workspace_id: Option<&str>) -> ChatResult<String> {
        self.record("retrieve_title", Some(chat_id), NO_BODY).await?;
        Ok(self.title.read().clone())
    }

    async fn execute_action(&self, request: &ExecuteActionRequest) -> ChatResult<ExecuteActionResponse> {
        self.record("execute_action", Some(&request.chat_id), Some(request)).await?;
        Ok(self.execute_responses.write().pop_front().unwrap_or_default())
    }

    async fn follow_up(&self, request: &FollowUpRequest) -> ChatResult<FollowUpResponse> {
        self.record("follow_up", Some(&request.chat_id), Some(request)).await?;
        self.follow_up_responses
            .write()
            .pop_front()
            .ok_or_else(|| ChatError::request("no follow-up response scripted"))
    }

    async fn retrieve_chat(&self, chat_id: &str, _workspace_id: Option<&str>) -> ChatResult<ChatHistory> {
        self.record("retrieve_chat", Some(chat_id), NO_BODY).await?;
        self.histories
            .read()
            .get(chat_id)
            .cloned()
            .ok_or_else(|| ChatError::Request {
                message: format!("chat {} not found", chat_id),
                status: Some(404),
            })
    }

    async fn list_user_threads(
        &self,
        _workspace_id: Option<&str>,
        is_project_chat: bool,
        cursor: &str,
    ) -> ChatResult<ThreadPage> {
        let body = serde_json::json!({ "is_project_chat": is_project_chat, "cursor": cursor });
        self.record("list_user_threads", None, Some(&body)).await?;
        Ok(self.thread_pages.read().get(cursor).cloned().unwrap_or_default())
    }

    async fn list_recent_chats(&self, _workspace_id: Option<&str>) -> ChatResult<ThreadPage> {
        self.record("list_recent_chats", None, NO_BODY).await?;
        Ok(self.recent.read().clone())
    }

    async fn list_favorite_chats(&self, _workspace_id: Option<&str>) -> ChatResult<Vec<ThreadSummary>> {
        self.record("list_favorite_chats", None, NO_BODY).await?;
        Ok(self.favorites.read().clone())
    }

    async fn list_models(&self, _workspace_id: Option<&str>) -> ChatResult<Vec<AiModel>> {
        self.record("list_models", None, NO_BODY).await?;
        Ok(self.models.read().clone())
    }

    async fn favorite_chat(&self, chat_id: &str, _workspace_id: Option<&str>) -> ChatResult<()> {
        self.record("favorite_chat", Some(chat_id), NO_BODY).await
    }

    async fn unfavorite_chat(&self, chat_id: &str, _workspace_id: Option<&str>) -> ChatResult<()> {
        self.record("unfavorite_chat", Some(chat_id), NO_BODY).await
    }

    async fn rename_chat(&self, chat_id: &str, title: &str, _workspace_id: Option<&str>) -> ChatResult<()> {
        self.record("rename_chat", Some(chat_id), Some(&title)).await
    }

    async fn destroy_chat(&self, chat_id: &str, workspace_slug: &str) -> ChatResult<()> {
        self.record("destroy_chat", Some(chat_id), Some(&workspace_slug)).await
    }

    async fn post_feedback(&self, request: &FeedbackRequest) -> ChatResult<()> {
        self.record("post_feedback", Some(&request.chat_id), Some(request)).await
    }

    async fn fetch_prompts(&self, request: &PromptsRequest) -> ChatResult<Vec<PromptTemplate>> {
        self.record("fetch_prompts", None, Some(request)).await?;
        Ok(self.templates.read().clone())
    }

    async fn list_artifacts(&self, chat_id: &str) -> ChatResult<Vec<ChatArtifact>> {
        self.record("list_artifacts", Some(chat_id), NO_BODY).await?;
        Ok(self.artifacts.read().get(chat_id).cloned().unwrap_or_default())
    }

    async fn list_attachments(&self, chat_id: &str) -> ChatResult<Vec<Attachment>> {
        self.record("list_attachments", Some(chat_id), NO_BODY).await?;
        Ok(self.attachments.read().get(chat_id).cloned().unwrap_or_default())
    }

    async fn convert_to_page(&self, request: &ConvertToPageRequest) -> ChatResult<String> {
        self.record("convert_to_page", Some(&request.chat_id), Some(request)).await?;
        Ok(format!("https://pi.example.com/{}/pages/{}", request.workspace_slug, self.next_id("page")))
    }
}
