//! Action execution.
//!
//! Submits the actions proposed in one dialogue entry as a single batch and
//! folds the outcome back into the artifact store and the entry. Partial
//! failure is not an error: each returned action carries its own `success`.

use serde_json::Value;
use tracing::{info, warn};

use crate::artifacts::{ArtifactData, ArtifactStore, ArtifactVersion};
use crate::backend::{ArtifactPayload, ExecuteActionRequest, ExecuteActionResponse, PiChatBackend};
use crate::error::{ChatError, ChatResult};
use crate::types::{Action, DialogueEntry, ExecutionStatus};

/// Runs action batches against the backend
pub struct ActionExecutor<'a> {
    backend: &'a dyn PiChatBackend,
    artifacts: &'a ArtifactStore,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(backend: &'a dyn PiChatBackend, artifacts: &'a ArtifactStore) -> Self {
        Self { backend, artifacts }
    }

    /// Move a pending entry to `Executing`.
    ///
    /// A completed entry needs a new proposal first; an executing one is
    /// already in flight.
    pub fn begin(entry: &DialogueEntry) -> ChatResult<DialogueEntry> {
        match entry.execution_status {
            Some(ExecutionStatus::Pending) => {
                let mut next = entry.clone();
                next.execution_status = Some(ExecutionStatus::Executing);
                next.action_error = None;
                Ok(next)
            }
            other => Err(ChatError::InvalidState {
                operation: "execute_action".to_string(),
                reason: match other {
                    Some(ExecutionStatus::Executing) => "actions are already executing".to_string(),
                    Some(ExecutionStatus::Completed) => "actions were already executed".to_string(),
                    _ => "no actions were proposed".to_string(),
                },
            }),
        }
    }

    /// One payload per proposed action, in proposal order.
    ///
    /// A non-empty draft is sent as the edited data.
    pub fn build_batch(&self, actions: &[Action]) -> Vec<ArtifactPayload> {
        actions
            .iter()
            .map(|action| {
                let draft = self
                    .artifacts
                    .get_artifact_by_version(&action.artifact_id, ArtifactVersion::Updated)
                    .filter(|data| !data.is_empty());
                ArtifactPayload {
                    artifact_id: action.artifact_id.clone(),
                    is_edited: draft.is_some(),
                    action_data: draft,
                }
            })
            .collect()
    }

    pub async fn submit(&self, request: &ExecuteActionRequest) -> ChatResult<ExecuteActionResponse> {
        info!(
            "Executing {} action(s) for message {}",
            request.artifact_data.len(),
            request.message_id
        );
        self.backend.execute_action(request).await
    }

    /// Merge each returned action into its artifact's original version.
    ///
    /// Results are applied in response order, so the last result for a
    /// repeated artifact id wins. Returns the artifact types of the actions
    /// that succeeded. Artifacts first seen in the response are filed under
    /// `chat_id`.
    pub fn record_results(&self, chat_id: &str, response: &ExecuteActionResponse) -> Vec<String> {
        let mut succeeded = Vec::new();
        for action in &response.actions {
            self.artifacts.update_artifact(
                chat_id,
                &action.artifact_id,
                ArtifactVersion::Original,
                outcome_patch(action),
            );
            if action.success {
                succeeded.push(action.artifact_type.clone());
            } else {
                warn!(
                    "Action {} on artifact {} failed: {}",
                    action.action,
                    action.artifact_id,
                    action.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        succeeded
    }
}

/// Entry after a successful batch.
pub fn complete(entry: &DialogueEntry, response: &ExecuteActionResponse) -> DialogueEntry {
    let mut next = entry.clone();
    next.execution_status = Some(ExecutionStatus::Completed);
    next.action_error = None;
    next.action_summary = response.action_summary.clone();
    next.actions = response.actions.clone();
    next
}

/// Entry after a rejected batch.
pub fn fail(entry: &DialogueEntry, err: &ChatError) -> DialogueEntry {
    let mut next = entry.clone();
    next.execution_status = Some(ExecutionStatus::Completed);
    next.action_error = Some(err.action_message());
    next.action_summary = None;
    next
}

fn outcome_patch(action: &Action) -> ArtifactData {
    let entity = action.entity.clone().unwrap_or_default();
    let optional = |value: Option<String>| value.map(Value::String).unwrap_or(Value::Null);

    let mut patch = ArtifactData::new();
    patch.insert("entity_id".to_string(), optional(entity.entity_id));
    patch.insert("entity_url".to_string(), optional(entity.entity_url));
    patch.insert("entity_name".to_string(), optional(entity.entity_name));
    patch.insert("issue_identifier".to_string(), optional(entity.issue_identifier));
    patch.insert("is_executed".to_string(), Value::Bool(true));
    patch.insert("success".to_string(), Value::Bool(action.success));
    patch.insert("error".to_string(), optional(action.error.clone()));
    patch.insert("message".to_string(), optional(action.message.clone()));
    patch
}
