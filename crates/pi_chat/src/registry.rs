//! Chat registry.
//!
//! This module provides the main entry point for chat operations,
//! coordinating the backend, live answer streams, thread listings and the
//! artifact store. All mutable state sits behind one lock; frame
//! application, stream registration and aborts are serialized on it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactData, ArtifactStore, ArtifactVersion};
use crate::backend::{
    Attachment, ChatArtifact, ConvertToPageRequest, ExecuteActionRequest, FeedbackRequest, FollowUpRequest,
    FollowUpResponse, InitChatRequest, PiChatBackend, PromptTemplate, PromptsRequest, TokenRequest, DEFAULT_LLM,
    QUERY_SOURCE,
};
use crate::dialogue::DialogueBuilder;
use crate::error::{ChatError, ChatResult};
use crate::events::{ChatEvent, EventBus};
use crate::executor::{self, ActionExecutor};
use crate::frame::{self, WireFrame};
use crate::stream::{spawn_pump, FrameSink, StreamBinding, StreamController};
use crate::threads::{first_page_cursor, PagedThreads, Placement, ThreadIndex};
use crate::types::{
    AiModel, ChatId, ChatMap, ChatSession, DialogueEntry, DialogueKey, ExecutionStatus, Feedback, Focus,
    FocusEntity, GroupedArtifacts, Token, DEFAULT_MODE, NEW_CHAT_TITLE,
};

/// Scoping of one query
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub focus: Focus,
    pub is_project_chat: bool,
    pub workspace_slug: String,
    pub workspace_id: Option<String>,
    pub attachment_ids: Vec<String>,
    /// Answer mode; the chat's mode is used when unset
    pub mode: Option<String>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            focus: Focus::none(),
            is_project_chat: false,
            workspace_slug: String::new(),
            workspace_id: None,
            attachment_ids: Vec::new(),
            mode: None,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    chats: ChatMap,
    threads: ThreadIndex,
    streams: StreamController,
    /// Queries waiting for their stream token, by chat
    queued: HashMap<ChatId, DialogueKey>,
    /// Chats the backend refused with 403
    unauthorized: HashSet<ChatId>,
    attachments: HashMap<ChatId, Vec<Attachment>>,
    models: Vec<AiModel>,
    active_model: Option<String>,
}

struct Shared {
    backend: Arc<dyn PiChatBackend>,
    state: Mutex<RegistryState>,
    artifacts: ArtifactStore,
    events: EventBus,
}

/// State captured before an optimistic mutation
enum Rollback {
    Favorite {
        chat_id: ChatId,
        was_favorite: bool,
        position: Option<usize>,
    },
    Title {
        chat_id: ChatId,
        title: String,
    },
    Delete {
        chat_id: ChatId,
        session: Option<ChatSession>,
        placement: Placement,
    },
    Feedback {
        chat_id: ChatId,
        key: DialogueKey,
        feedback: Option<Feedback>,
    },
}

impl Rollback {
    fn restore(self, state: &mut RegistryState) {
        match self {
            Self::Favorite {
                chat_id,
                was_favorite,
                position,
            } => {
                if let Some(session) = state.chats.get_mut(&chat_id) {
                    session.is_favorite = was_favorite;
                }
                match position {
                    Some(index) => state.threads.reinsert_favorite(&chat_id, index),
                    None => state.threads.remove_favorite(&chat_id),
                }
            }
            Self::Title { chat_id, title } => {
                if let Some(session) = state.chats.get_mut(&chat_id) {
                    session.title = title;
                }
            }
            Self::Delete {
                chat_id,
                session,
                placement,
            } => {
                state.threads.restore(&chat_id, placement);
                if let Some(session) = session {
                    state.chats.entry(chat_id).or_insert(session);
                }
            }
            Self::Feedback { chat_id, key, feedback } => {
                let entry = state
                    .chats
                    .get_mut(&chat_id)
                    .and_then(|session| session.dialogue.get(&key).cloned().map(|entry| (session, entry)));
                if let Some((session, mut entry)) = entry {
                    entry.feedback = feedback;
                    if let Err(e) = session.dialogue.update_dialogue(&key, entry) {
                        debug!("Could not restore feedback on {}: {}", key, e);
                    }
                }
            }
        }
    }
}

/// Main chat registry
#[derive(Clone)]
pub struct ChatRegistry {
    shared: Arc<Shared>,
}

/// Pump-side view of the registry
struct StreamSink(ChatRegistry);

impl FrameSink for StreamSink {
    fn deliver(&self, binding: &StreamBinding, frame: WireFrame) -> bool {
        self.0.apply_frame(binding, frame)
    }
}

impl ChatRegistry {
    /// Create a registry over a backend
    pub fn new(backend: Arc<dyn PiChatBackend>) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                state: Mutex::new(RegistryState::default()),
                artifacts: ArtifactStore::new(),
                events: EventBus::new(),
            }),
        }
    }

    /// Subscribe to state change notifications
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChatEvent> {
        self.shared.events.subscribe()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.shared.artifacts
    }

    fn emit(&self, event: ChatEvent) {
        self.shared.events.emit(event);
    }

    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    /// Create a chat on the backend and put it at the top of its thread list
    pub async fn create_new_chat(
        &self,
        focus: &Focus,
        mode: Option<&str>,
        is_project_chat: bool,
        workspace_id: Option<&str>,
    ) -> ChatResult<ChatId> {
        let request = InitChatRequest::new(focus, is_project_chat, workspace_id.map(str::to_string));
        let chat_id = self.shared.backend.create_chat(&request).await?;
        info!("Created chat {}", chat_id);

        {
            let mut state = self.shared.state.lock();
            let mut session = ChatSession::new(chat_id.clone());
            session.title = NEW_CHAT_TITLE.to_string();
            session.llm = state.active_model.clone();
            session.is_focus_enabled = focus.is_in_workspace_context;
            match focus.entity_type {
                FocusEntity::WorkspaceId => session.focus_workspace_id = focus.entity_identifier.clone(),
                FocusEntity::ProjectId => session.focus_project_id = focus.entity_identifier.clone(),
            }
            session.workspace_id = workspace_id.map(str::to_string);
            session.mode = mode.map(str::to_string);

            state.chats.insert(chat_id.clone(), session);
            state.threads.threads_mut(is_project_chat).prepend(chat_id.clone());
        }

        self.emit(ChatEvent::ChatLoaded {
            chat_id: chat_id.clone(),
        });
        self.emit(ChatEvent::ThreadsChanged);
        Ok(chat_id)
    }

    /// Load a chat's history and rebuild its dialogue.
    ///
    /// A 403 marks the chat unauthorized until a later load succeeds.
    pub async fn fetch_chat_by_id(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<()> {
        if chat_id.is_empty() {
            return Err(ChatError::Validation("chat id is required".to_string()));
        }
        let history = match self.shared.backend.retrieve_chat(chat_id, workspace_id).await {
            Ok(history) => history,
            Err(e) if e.status() == Some(403) => {
                warn!("Access to chat {} denied: {}", chat_id, e);
                self.shared.state.lock().unauthorized.insert(chat_id.to_string());
                self.emit(ChatEvent::AccessDenied {
                    chat_id: chat_id.to_string(),
                });
                return Err(e);
            }
            Err(e) => {
                error!("Failed to load chat {}: {}", chat_id, e);
                return Err(e);
            }
        };

        // Register proposed artifacts so they can be shown after a reload
        for entry in &history.dialogue {
            for action in &entry.actions {
                self.shared.artifacts.init_from_action(chat_id, action);
                if entry.execution_status == Some(ExecutionStatus::Completed) {
                    let mut patch = ArtifactData::new();
                    patch.insert("is_executed".to_string(), true.into());
                    patch.insert("is_editable".to_string(), false.into());
                    self.shared
                        .artifacts
                        .update_artifact(chat_id, &action.artifact_id, ArtifactVersion::Original, patch);
                }
            }
        }

        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            state.unauthorized.remove(chat_id);
            let streaming = state.streams.is_streaming(chat_id);
            let session = state
                .chats
                .entry(chat_id.to_string())
                .or_insert_with(|| ChatSession::new(chat_id));

            if streaming {
                debug!("Chat {} is streaming; keeping its live dialogue", chat_id);
            } else {
                session.dialogue = DialogueBuilder::from_history(history.dialogue);
            }
            session.title = history.title;
            if let Some(last_modified) = history.last_modified {
                session.last_modified = last_modified;
            }
            session.is_favorite = history.is_favorite;
            session.is_focus_enabled = history.is_focus_enabled;
            session.focus_workspace_id = history.focus_workspace_id;
            session.focus_project_id = history.focus_project_id;
            if history.workspace_id.is_some() {
                session.workspace_id = history.workspace_id;
            }
            if history.llm.is_some() {
                session.llm = history.llm;
            }
            if history.mode.is_some() {
                session.mode = history.mode;
            }
        }

        self.emit(ChatEvent::ChatLoaded {
            chat_id: chat_id.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Answers
    // ------------------------------------------------------------------

    /// Ask a question in a chat.
    ///
    /// The query is shown immediately under a provisional key. Once the
    /// backend issues a token the entry is rekeyed and its answer streamed.
    /// A failed token request is folded into the entry as the fallback
    /// answer and the provisional key is returned.
    pub async fn get_answer(&self, chat_id: &str, query: &str, params: QueryParams) -> ChatResult<DialogueKey> {
        if chat_id.is_empty() {
            return Err(ChatError::Validation("chat id is required".to_string()));
        }

        let (provisional, request, is_new) = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let session = state
                .chats
                .entry(chat_id.to_string())
                .or_insert_with(|| ChatSession::new(chat_id));

            let is_new = session.dialogue.is_empty();
            let llm = state
                .active_model
                .clone()
                .or_else(|| session.llm.clone())
                .unwrap_or_else(|| DEFAULT_LLM.to_string());
            if session.workspace_id.is_none() {
                session.workspace_id = params.workspace_id.clone();
            }
            if params.mode.is_some() {
                session.mode = params.mode.clone();
            }

            let entry = DialogueEntry::pending(query, Some(llm.clone()), params.attachment_ids.clone());
            let provisional = session.dialogue.push_provisional(entry);

            let request = TokenRequest {
                chat_id: chat_id.to_string(),
                query: query.to_string(),
                is_new,
                is_temp: false,
                workspace_in_context: params.focus.is_in_workspace_context,
                source: QUERY_SOURCE.to_string(),
                llm,
                context: serde_json::json!({}),
                is_project_chat: params.is_project_chat,
                workspace_slug: params.workspace_slug.clone(),
                workspace_id: params.workspace_id.clone(),
                attachment_ids: params.attachment_ids.clone(),
                mode: session.mode().to_string(),
                project_id: None,
            }
            .with_focus(&params.focus);

            state.queued.insert(chat_id.to_string(), provisional.clone());
            (provisional, request, is_new)
        };
        self.emit(ChatEvent::DialogueUpdated {
            chat_id: chat_id.to_string(),
            key: provisional.clone(),
        });

        let token = match self.shared.backend.retrieve_token(&request).await {
            Ok(token) => token,
            Err(e) => {
                error!("Failed to queue query for chat {}: {}", chat_id, e);
                if self.take_queued(chat_id, &provisional) {
                    self.fail_entry(chat_id, &provisional);
                }
                return Ok(provisional);
            }
        };
        debug!("Chat {} issued token {}", chat_id, token);

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let live = state.queued.get(chat_id) == Some(&provisional);
        if live {
            state.queued.remove(chat_id);
        }
        let Some(session) = state.chats.get_mut(chat_id) else {
            warn!("Chat {} was removed before its answer started", chat_id);
            return Err(ChatError::NotFound(format!("chat {}", chat_id)));
        };
        let confirmed = match session.dialogue.confirm(&provisional, &token) {
            Ok(key) => key,
            Err(e) => {
                error!("Cannot bind token {} in chat {}: {}", token, chat_id, e);
                if let Some(mut entry) = session.dialogue.get(&provisional).cloned() {
                    entry.fail_with_fallback();
                    self.write_entry(session, &provisional, entry)?;
                }
                return Err(e);
            }
        };
        self.emit(ChatEvent::DialogueConfirmed {
            chat_id: chat_id.to_string(),
            provisional,
            confirmed: confirmed.clone(),
        });

        if !live {
            info!("Query {} in chat {} was cancelled before its answer started", token, chat_id);
            if let Some(mut entry) = session.dialogue.get(&confirmed).cloned() {
                entry.is_pi_thinking = false;
                self.write_entry(session, &confirmed, entry)?;
            }
            return Ok(confirmed);
        }

        self.open_stream(state, chat_id, confirmed.clone(), token, is_new)?;
        Ok(confirmed)
    }

    /// Answer an existing query again, in place, under its original token
    pub fn regenerate_answer(&self, chat_id: &str, token: &Token, workspace_id: Option<&str>) -> ChatResult<()> {
        if chat_id.is_empty() {
            return Err(ChatError::Validation("chat id is required".to_string()));
        }
        if token.is_empty() {
            return Err(ChatError::Validation("token is required".to_string()));
        }

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let active_model = state.active_model.clone();
        let session = state
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))?;
        let key = DialogueKey::Confirmed(token.clone());
        let mut entry = session
            .dialogue
            .get(&key)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("dialogue entry {} in chat {}", token, chat_id)))?;

        let llm = active_model.or_else(|| entry.llm.clone());
        entry.reset_for_regeneration(llm);
        self.write_entry(session, &key, entry)?;
        if session.workspace_id.is_none() {
            session.workspace_id = workspace_id.map(str::to_string);
        }

        info!("Regenerating answer {} in chat {}", token, chat_id);
        self.open_stream(state, chat_id, key, token.clone(), false)
    }

    /// Replace one dialogue entry
    pub fn update_dialogue(&self, chat_id: &str, key: &DialogueKey, entry: DialogueEntry) -> ChatResult<()> {
        let mut state = self.shared.state.lock();
        let session = state
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))?;
        self.write_entry(session, key, entry)
    }

    /// Stop the chat's answer stream, or the query still waiting for one.
    ///
    /// The partial answer is kept. Returns whether anything was stopped.
    pub fn abort_stream(&self, chat_id: &str) -> bool {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let streamed = state.streams.abort(chat_id);
        let queued = state.queued.remove(chat_id);
        if streamed.is_none() && queued.is_none() {
            return false;
        }

        if let Some(session) = state.chats.get_mut(chat_id) {
            let keys = streamed.iter().map(|binding| binding.key.clone()).chain(queued);
            for key in keys {
                let Some(mut entry) = session.dialogue.get(&key).cloned() else {
                    continue;
                };
                if entry.is_pi_thinking {
                    entry.is_pi_thinking = false;
                    if let Err(e) = self.write_entry(session, &key, entry) {
                        debug!("Could not settle aborted entry {}: {}", key, e);
                    }
                }
            }
        }

        warn!("Answer for chat {} aborted", chat_id);
        if streamed.is_some() {
            self.emit(ChatEvent::StreamClosed {
                chat_id: chat_id.to_string(),
                aborted: true,
            });
        }
        true
    }

    /// Abort every live stream and queued query
    pub fn dispose(&self) {
        let closed = {
            let mut state = self.shared.state.lock();
            state.queued.clear();
            state.streams.abort_all()
        };
        for binding in closed {
            self.emit(ChatEvent::StreamClosed {
                chat_id: binding.chat_id,
                aborted: true,
            });
        }
    }

    pub fn is_streaming(&self, chat_id: &str) -> bool {
        self.shared.state.lock().streams.is_streaming(chat_id)
    }

    /// Number of registered streams
    pub fn active_stream_count(&self) -> usize {
        self.shared.state.lock().streams.active_count()
    }

    fn write_entry(&self, session: &mut ChatSession, key: &DialogueKey, entry: DialogueEntry) -> ChatResult<()> {
        session.dialogue.update_dialogue(key, entry)?;
        self.emit(ChatEvent::DialogueUpdated {
            chat_id: session.chat_id.clone(),
            key: key.clone(),
        });
        Ok(())
    }

    /// Clear the chat's queued query if it is still `key`
    fn take_queued(&self, chat_id: &str, key: &DialogueKey) -> bool {
        let mut state = self.shared.state.lock();
        if state.queued.get(chat_id) == Some(key) {
            state.queued.remove(chat_id);
            return true;
        }
        false
    }

    fn fail_entry(&self, chat_id: &str, key: &DialogueKey) {
        let mut state = self.shared.state.lock();
        let Some(session) = state.chats.get_mut(chat_id) else {
            return;
        };
        if let Some(mut entry) = session.dialogue.get(key).cloned() {
            entry.fail_with_fallback();
            if let Err(e) = self.write_entry(session, key, entry) {
                debug!("Could not record failed query {}: {}", key, e);
            }
        }
    }

    /// Register a stream and start its pump; caller holds the state lock.
    fn open_stream(
        &self,
        state: &mut RegistryState,
        chat_id: &str,
        key: DialogueKey,
        token: Token,
        is_first_exchange: bool,
    ) -> ChatResult<()> {
        let (binding, replaced) = state.streams.register(chat_id, key.clone(), token, is_first_exchange)?;

        if let Some(old) = replaced {
            if old.key != key {
                if let Some(session) = state.chats.get_mut(chat_id) {
                    if let Some(mut entry) = session.dialogue.get(&old.key).cloned() {
                        entry.is_pi_thinking = false;
                        if let Err(e) = self.write_entry(session, &old.key, entry) {
                            debug!("Could not settle replaced entry {}: {}", old.key, e);
                        }
                    }
                }
            }
            self.emit(ChatEvent::StreamClosed {
                chat_id: chat_id.to_string(),
                aborted: true,
            });
        }

        let task = spawn_pump(
            self.shared.backend.clone(),
            Arc::new(StreamSink(self.clone())),
            binding.clone(),
        );
        state.streams.attach(&binding, task);
        self.emit(ChatEvent::StreamOpened {
            chat_id: chat_id.to_string(),
            key,
        });
        Ok(())
    }

    /// Apply one frame from a pump; returns whether the pump should go on.
    fn apply_frame(&self, binding: &StreamBinding, frame: WireFrame) -> bool {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if !state.streams.is_current(binding) {
            debug!("Dropping {} frame from stale stream {}", frame.name(), binding.token);
            return false;
        }

        let entry = state
            .chats
            .get_mut(&binding.chat_id)
            .and_then(|session| session.dialogue.get(&binding.key).cloned().map(|entry| (session, entry)));
        let Some((session, entry)) = entry else {
            warn!("Stream {} lost its dialogue entry", binding.token);
            state.streams.release(binding);
            self.emit(ChatEvent::StreamClosed {
                chat_id: binding.chat_id.clone(),
                aborted: false,
            });
            return false;
        };

        match &frame {
            WireFrame::Actions(action) => self.shared.artifacts.init_from_action(&binding.chat_id, action),
            WireFrame::Error(message) => warn!("Stream {} failed: {}", binding.token, message),
            _ => {}
        }
        let next = frame::apply(entry, &frame);
        if let Err(e) = self.write_entry(session, &binding.key, next) {
            debug!("Dropping {} frame for {}: {}", frame.name(), binding.key, e);
        }

        if !frame.is_terminal() {
            return true;
        }

        state.streams.release(binding);
        debug!("Stream {} closed after {}", binding.token, frame.name());
        self.emit(ChatEvent::StreamClosed {
            chat_id: binding.chat_id.clone(),
            aborted: false,
        });
        if frame == WireFrame::Done && binding.is_first_exchange {
            let workspace_id = session.workspace_id.clone();
            self.spawn_title_fetch(binding.chat_id.clone(), workspace_id);
        }
        false
    }

    fn spawn_title_fetch(&self, chat_id: ChatId, workspace_id: Option<String>) {
        let registry = self.clone();
        tokio::spawn(async move {
            match registry
                .shared
                .backend
                .retrieve_title(&chat_id, workspace_id.as_deref())
                .await
            {
                Ok(title) => {
                    {
                        let mut state = registry.shared.state.lock();
                        let Some(session) = state.chats.get_mut(&chat_id) else {
                            return;
                        };
                        session.title = title.clone();
                        session.last_modified = Utc::now();
                    }
                    registry.emit(ChatEvent::TitleUpdated { chat_id, title });
                }
                Err(e) => warn!("Failed to retrieve title for chat {}: {}", chat_id, e),
            }
        });
    }

    // ------------------------------------------------------------------
    // Actions and artifacts
    // ------------------------------------------------------------------

    /// Execute the actions proposed in one dialogue entry.
    ///
    /// Returns the artifact types of the actions that succeeded.
    pub async fn execute_action(&self, workspace_id: &str, chat_id: &str, action_id: &Token) -> ChatResult<Vec<String>> {
        let key = DialogueKey::Confirmed(action_id.clone());

        let actions = {
            let mut state = self.shared.state.lock();
            let session = state
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))?;
            let entry = session
                .dialogue
                .get(&key)
                .ok_or_else(|| ChatError::NotFound(format!("dialogue entry {} in chat {}", action_id, chat_id)))?;
            let started = ActionExecutor::begin(entry)?;
            let actions = started.actions.clone();
            self.write_entry(session, &key, started)?;
            actions
        };

        let runner = ActionExecutor::new(self.shared.backend.as_ref(), &self.shared.artifacts);
        let request = ExecuteActionRequest {
            workspace_id: workspace_id.to_string(),
            chat_id: chat_id.to_string(),
            message_id: action_id.to_string(),
            artifact_data: runner.build_batch(&actions),
        };

        match runner.submit(&request).await {
            Ok(response) => {
                let succeeded = runner.record_results(chat_id, &response);
                self.finish_execution(chat_id, &key, |entry| executor::complete(entry, &response));
                info!(
                    "Executed actions for {}: {}/{} succeeded",
                    action_id,
                    succeeded.len(),
                    response.actions.len()
                );
                Ok(succeeded)
            }
            Err(e) => {
                error!("Action execution for {} failed: {}", action_id, e);
                self.finish_execution(chat_id, &key, |entry| executor::fail(entry, &e));
                Err(e)
            }
        }
    }

    fn finish_execution(&self, chat_id: &str, key: &DialogueKey, finish: impl FnOnce(&DialogueEntry) -> DialogueEntry) {
        let mut state = self.shared.state.lock();
        let Some(session) = state.chats.get_mut(chat_id) else {
            return;
        };
        match session.dialogue.get(key) {
            Some(entry) if entry.execution_status == Some(ExecutionStatus::Executing) => {
                let next = finish(entry);
                if let Err(e) = self.write_entry(session, key, next) {
                    debug!("Could not record execution result on {}: {}", key, e);
                }
            }
            _ => debug!("Entry {} moved on during execution; leaving it untouched", key),
        }
    }

    /// Ask the backend to revise an artifact; the revision becomes its draft
    pub async fn follow_up(&self, request: &FollowUpRequest) -> ChatResult<FollowUpResponse> {
        let response = self.shared.backend.follow_up(request).await.map_err(|e| {
            error!("Follow-up on artifact {} failed: {}", request.artifact_id, e);
            e
        })?;
        if !response.success {
            return Err(ChatError::request("Failed to follow up"));
        }
        self.shared.artifacts.update_artifact(
            &request.chat_id,
            &request.artifact_id,
            ArtifactVersion::Updated,
            response.artifact_data.clone(),
        );
        Ok(response)
    }

    /// Load every artifact of a chat into the store
    pub async fn fetch_artifacts(&self, chat_id: &str) -> ChatResult<Vec<ChatArtifact>> {
        let artifacts = self.shared.backend.list_artifacts(chat_id).await.map_err(|e| {
            error!("Failed to list artifacts of chat {}: {}", chat_id, e);
            e
        })?;
        for artifact in &artifacts {
            self.shared.artifacts.update_artifact(
                chat_id,
                &artifact.artifact_id,
                ArtifactVersion::Original,
                artifact.data.clone(),
            );
        }
        debug!("Loaded {} artifacts for chat {}", artifacts.len(), chat_id);
        Ok(artifacts)
    }

    /// Artifacts of one dialogue entry split by action outcome
    pub fn grouped_artifacts_by_dialogue(&self, chat_id: &str, token: &Token) -> GroupedArtifacts {
        let actions = {
            let state = self.shared.state.lock();
            state
                .chats
                .get(chat_id)
                .and_then(|session| session.dialogue.get_by_token(token))
                .map(|entry| entry.actions.clone())
                .unwrap_or_default()
        };

        let mut grouped = GroupedArtifacts::default();
        for action in &actions {
            let Some(record) = self.shared.artifacts.display_record(action) else {
                continue;
            };
            if action.success {
                grouped.successful.push(record);
            } else {
                grouped.failed.push(record);
            }
        }
        grouped
    }

    // ------------------------------------------------------------------
    // Attachments, prompts and pages
    // ------------------------------------------------------------------

    /// Refresh the chat's attachment list
    pub async fn fetch_attachments(&self, chat_id: &str) -> ChatResult<Vec<Attachment>> {
        let attachments = self.shared.backend.list_attachments(chat_id).await.map_err(|e| {
            error!("Failed to list attachments of chat {}: {}", chat_id, e);
            e
        })?;
        self.shared
            .state
            .lock()
            .attachments
            .insert(chat_id.to_string(), attachments.clone());
        self.emit(ChatEvent::ChatLoaded {
            chat_id: chat_id.to_string(),
        });
        Ok(attachments)
    }

    pub fn attachments(&self, chat_id: &str) -> Vec<Attachment> {
        self.shared
            .state
            .lock()
            .attachments
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Preset prompts for a new chat
    pub async fn fetch_prompts(&self, request: &PromptsRequest) -> ChatResult<Vec<PromptTemplate>> {
        self.shared.backend.fetch_prompts(request).await.map_err(|e| {
            error!("Failed to fetch prompts: {}", e);
            e
        })
    }

    /// Save an answer as a page; returns the page URL.
    pub async fn convert_to_page(
        &self,
        chat_id: &str,
        description_html: &str,
        workspace_slug: &str,
        project_id: Option<&str>,
    ) -> ChatResult<String> {
        if workspace_slug.is_empty() {
            return Err(ChatError::Validation("workspace slug is required".to_string()));
        }
        let request = ConvertToPageRequest::new(chat_id, description_html, workspace_slug, project_id);
        let url = self.shared.backend.convert_to_page(&request).await.map_err(|e| {
            error!("Failed to save chat {} as a page: {}", chat_id, e);
            e
        })?;
        info!("Saved chat {} as {} page {}", chat_id, request.page_type, url);
        Ok(url)
    }

    // ------------------------------------------------------------------
    // Thread listings
    // ------------------------------------------------------------------

    /// Fetch one page of the user's threads.
    ///
    /// `None` requests the first page, which replaces the listing. Returns
    /// the cursor of the next page.
    pub async fn fetch_user_threads(
        &self,
        workspace_id: Option<&str>,
        is_project_chat: bool,
        cursor: Option<&str>,
    ) -> ChatResult<Option<String>> {
        let first_page = cursor.is_none();
        let cursor = cursor.map(str::to_string).unwrap_or_else(first_page_cursor);
        let page = self
            .shared
            .backend
            .list_user_threads(workspace_id, is_project_chat, &cursor)
            .await
            .map_err(|e| {
                error!("Failed to list threads: {}", e);
                e
            })?;

        {
            let mut state = self.shared.state.lock();
            for summary in &page.results {
                state
                    .chats
                    .entry(summary.chat_id.clone())
                    .or_insert_with(|| ChatSession::new(summary.chat_id.clone()))
                    .apply_summary(summary);
            }
            state.threads.threads_mut(is_project_chat).apply_page(&page, first_page);
        }

        debug!("Listed {} threads", page.results.len());
        self.emit(ChatEvent::ThreadsChanged);
        Ok(page.next_cursor)
    }

    /// Append recent chats not yet listed
    pub async fn fetch_recent_chats(&self, workspace_id: Option<&str>, is_project_chat: bool) -> ChatResult<()> {
        let page = self.shared.backend.list_recent_chats(workspace_id).await.map_err(|e| {
            error!("Failed to list recent chats: {}", e);
            e
        })?;

        {
            let mut state = self.shared.state.lock();
            for summary in &page.results {
                state
                    .chats
                    .entry(summary.chat_id.clone())
                    .or_insert_with(|| ChatSession::new(summary.chat_id.clone()))
                    .apply_summary(summary);
            }
            state
                .threads
                .threads_mut(is_project_chat)
                .append_unseen(page.results.iter().map(|t| t.chat_id.clone()));
        }

        self.emit(ChatEvent::ThreadsChanged);
        Ok(())
    }

    /// Replace favorites with the backend's list
    pub async fn fetch_favorite_chats(&self, workspace_id: Option<&str>) -> ChatResult<()> {
        let favorites = self.shared.backend.list_favorite_chats(workspace_id).await?;

        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            for previous in state.threads.favorites() {
                if let Some(session) = state.chats.get_mut(previous) {
                    session.is_favorite = false;
                }
            }
            for summary in &favorites {
                let session = state
                    .chats
                    .entry(summary.chat_id.clone())
                    .or_insert_with(|| ChatSession::new(summary.chat_id.clone()));
                session.title = summary.title.clone();
                session.is_favorite = true;
            }
            state
                .threads
                .set_favorites(favorites.iter().map(|t| t.chat_id.clone()).collect());
        }

        self.emit(ChatEvent::ThreadsChanged);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    /// Load the model catalogue; picks the default model if none is active
    pub async fn fetch_models(&self, workspace_id: Option<&str>) -> ChatResult<Vec<AiModel>> {
        let models = self.shared.backend.list_models(workspace_id).await?;
        {
            let mut state = self.shared.state.lock();
            if state.active_model.is_none() {
                state.active_model = models.iter().find(|m| m.is_default).map(|m| m.id.clone());
            }
            state.models = models.clone();
        }
        self.emit(ChatEvent::ModelsChanged);
        Ok(models)
    }

    /// Select the model for new queries, and for a chat when given
    pub fn set_active_model(&self, chat_id: Option<&str>, model: &str) {
        {
            let mut state = self.shared.state.lock();
            state.active_model = Some(model.to_string());
            if let Some(session) = chat_id.and_then(|id| state.chats.get_mut(id)) {
                session.llm = Some(model.to_string());
            }
        }
        self.emit(ChatEvent::ModelsChanged);
    }

    pub fn active_model(&self) -> Option<String> {
        self.shared.state.lock().active_model.clone()
    }

    pub fn models(&self) -> Vec<AiModel> {
        self.shared.state.lock().models.clone()
    }

    // ------------------------------------------------------------------
    // Optimistic mutations
    // ------------------------------------------------------------------

    pub async fn favorite_chat(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<()> {
        let rollback = self.set_favorite(chat_id, true)?;
        self.optimistic(
            "favorite_chat",
            rollback,
            self.shared.backend.favorite_chat(chat_id, workspace_id),
        )
        .await
    }

    pub async fn unfavorite_chat(&self, chat_id: &str, workspace_id: Option<&str>) -> ChatResult<()> {
        let rollback = self.set_favorite(chat_id, false)?;
        self.optimistic(
            "unfavorite_chat",
            rollback,
            self.shared.backend.unfavorite_chat(chat_id, workspace_id),
        )
        .await
    }

    fn set_favorite(&self, chat_id: &str, favorite: bool) -> ChatResult<Rollback> {
        let rollback = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let session = state
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))?;
            let rollback = Rollback::Favorite {
                chat_id: chat_id.to_string(),
                was_favorite: session.is_favorite,
                position: state.threads.favorite_position(chat_id),
            };
            session.is_favorite = favorite;
            if favorite {
                state.threads.add_favorite(chat_id);
            } else {
                state.threads.remove_favorite(chat_id);
            }
            rollback
        };
        self.emit(ChatEvent::ThreadsChanged);
        Ok(rollback)
    }

    pub async fn rename_chat(&self, chat_id: &str, title: &str, workspace_id: Option<&str>) -> ChatResult<()> {
        let rollback = {
            let mut state = self.shared.state.lock();
            let session = state
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))?;
            let previous = std::mem::replace(&mut session.title, title.to_string());
            Rollback::Title {
                chat_id: chat_id.to_string(),
                title: previous,
            }
        };
        self.emit(ChatEvent::TitleUpdated {
            chat_id: chat_id.to_string(),
            title: title.to_string(),
        });
        self.optimistic(
            "rename_chat",
            rollback,
            self.shared.backend.rename_chat(chat_id, title, workspace_id),
        )
        .await
    }

    /// Remove a chat everywhere; restored if the backend refuses
    pub async fn delete_chat(&self, chat_id: &str, workspace_slug: &str) -> ChatResult<()> {
        if chat_id.is_empty() {
            return Err(ChatError::Validation("chat id is required".to_string()));
        }
        if self.abort_stream(chat_id) {
            debug!("Stopped answer stream of deleted chat {}", chat_id);
        }

        let rollback = {
            let mut state = self.shared.state.lock();
            let rollback = Rollback::Delete {
                chat_id: chat_id.to_string(),
                session: state.chats.get(chat_id).cloned(),
                placement: state.threads.placement(chat_id),
            };
            state.chats.remove(chat_id);
            state.threads.remove_everywhere(chat_id);
            rollback
        };
        self.emit(ChatEvent::ThreadsChanged);

        self.optimistic(
            "delete_chat",
            rollback,
            self.shared.backend.destroy_chat(chat_id, workspace_slug),
        )
        .await?;

        self.shared.artifacts.remove_chat(chat_id);
        {
            let mut state = self.shared.state.lock();
            state.attachments.remove(chat_id);
            state.unauthorized.remove(chat_id);
        }
        info!("Deleted chat {}", chat_id);
        self.emit(ChatEvent::ChatDeleted {
            chat_id: chat_id.to_string(),
        });
        Ok(())
    }

    /// Record feedback on the answer at `message_index`
    pub async fn send_feedback(
        &self,
        chat_id: &str,
        message_index: usize,
        feedback: Feedback,
        workspace_id: Option<&str>,
        feedback_message: Option<&str>,
    ) -> ChatResult<()> {
        let rollback = {
            let mut state = self.shared.state.lock();
            let session = state
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))?;
            let key = session
                .dialogue
                .key_at(message_index)
                .cloned()
                .ok_or_else(|| ChatError::NotFound(format!("message {} in chat {}", message_index, chat_id)))?;
            let mut entry = session
                .dialogue
                .get(&key)
                .cloned()
                .ok_or_else(|| ChatError::NotFound(format!("dialogue entry {}", key)))?;

            let rollback = Rollback::Feedback {
                chat_id: chat_id.to_string(),
                key: key.clone(),
                feedback: entry.feedback,
            };
            entry.feedback = Some(feedback);
            self.write_entry(session, &key, entry)?;
            rollback
        };

        let request = FeedbackRequest {
            message_index,
            chat_id: chat_id.to_string(),
            feedback,
            feedback_message: feedback_message.map(str::to_string),
            workspace_id: workspace_id.map(str::to_string),
        };
        self.optimistic("send_feedback", rollback, self.shared.backend.post_feedback(&request))
            .await
    }

    /// Await a backend call; on rejection restore the snapshot, then return the error.
    async fn optimistic<T>(
        &self,
        operation: &str,
        rollback: Rollback,
        call: impl Future<Output = ChatResult<T>>,
    ) -> ChatResult<T> {
        match call.await {
            Ok(value) => Ok(value),
            Err(e) => {
                error!("{} failed, rolling back: {}", operation, e);
                let event = match &rollback {
                    Rollback::Feedback { chat_id, key, .. } => ChatEvent::DialogueUpdated {
                        chat_id: chat_id.clone(),
                        key: key.clone(),
                    },
                    _ => ChatEvent::ThreadsChanged,
                };
                rollback.restore(&mut self.shared.state.lock());
                self.emit(event);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn chat(&self, chat_id: &str) -> Option<ChatSession> {
        self.shared.state.lock().chats.get(chat_id).cloned()
    }

    /// False once the backend refused the chat with 403
    pub fn is_authorized(&self, chat_id: &str) -> bool {
        !self.shared.state.lock().unauthorized.contains(chat_id)
    }

    /// One dialogue entry of a chat
    pub fn entry(&self, chat_id: &str, key: &DialogueKey) -> Option<DialogueEntry> {
        self.shared
            .state
            .lock()
            .chats
            .get(chat_id)
            .and_then(|session| session.dialogue.get(key).cloned())
    }

    /// A chat's dialogue in order
    pub fn dialogue(&self, chat_id: &str) -> Vec<(DialogueKey, DialogueEntry)> {
        self.shared
            .state
            .lock()
            .chats
            .get(chat_id)
            .map(|session| {
                session
                    .dialogue
                    .entries()
                    .map(|(key, entry)| (key.clone(), entry.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sessions listed in the personal or project thread list
    pub fn user_threads(&self, is_project_chat: bool) -> Vec<ChatSession> {
        let state = self.shared.state.lock();
        state
            .threads
            .threads(is_project_chat)
            .ids()
            .iter()
            .filter_map(|id| state.chats.get(id).cloned())
            .collect()
    }

    /// Project threads belonging to a workspace
    pub fn user_threads_by_workspace(&self, workspace_id: &str) -> Vec<ChatSession> {
        if workspace_id.is_empty() {
            return Vec::new();
        }
        self.user_threads(true)
            .into_iter()
            .filter(|session| session.workspace_id.as_deref() == Some(workspace_id))
            .collect()
    }

    /// Pagination state of a thread list
    pub fn thread_listing(&self, is_project_chat: bool) -> PagedThreads {
        self.shared.state.lock().threads.threads(is_project_chat).clone()
    }

    pub fn favorite_chats(&self) -> Vec<ChatSession> {
        let state = self.shared.state.lock();
        state
            .threads
            .favorites()
            .iter()
            .filter_map(|id| state.chats.get(id).cloned())
            .collect()
    }

    pub fn chat_focus(&self, chat_id: &str) -> Option<Focus> {
        self.shared.state.lock().chats.get(chat_id).map(ChatSession::focus)
    }

    /// The chat's answer mode, `ask` when unknown
    pub fn chat_mode(&self, chat_id: &str) -> String {
        self.shared
            .state
            .lock()
            .chats
            .get(chat_id)
            .map(|session| session.mode().to_string())
            .unwrap_or_else(|| DEFAULT_MODE.to_string())
    }
}
