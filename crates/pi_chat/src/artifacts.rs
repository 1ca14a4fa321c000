//! Artifact store.
//!
//! Every artifact keeps an `original` version as last reported by the server
//! and an optional `updated` version holding the user's draft edits. Patches
//! only ever touch one version.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::types::{Action, ChatId};

/// JSON object holding one version of an artifact
pub type ArtifactData = Map<String, Value>;

/// Named artifact version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactVersion {
    Original,
    Updated,
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => f.write_str("original"),
            Self::Updated => f.write_str("updated"),
        }
    }
}

/// An assistant-proposed artifact
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub artifact_id: String,
    pub chat_id: ChatId,
    pub original: ArtifactData,
    pub updated: Option<ArtifactData>,
}

impl Artifact {
    pub fn version(&self, version: ArtifactVersion) -> Option<&ArtifactData> {
        match version {
            ArtifactVersion::Original => Some(&self.original),
            ArtifactVersion::Updated => self.updated.as_ref(),
        }
    }

    pub fn is_editable(&self) -> bool {
        self.flag("is_editable")
    }

    pub fn is_executed(&self) -> bool {
        self.flag("is_executed")
    }

    /// Whether the user has a non-empty draft
    pub fn has_edits(&self) -> bool {
        self.updated.as_ref().is_some_and(|u| !u.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.original.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Thread-safe store of artifacts keyed by id
#[derive(Debug, Default)]
pub struct ArtifactStore {
    artifacts: RwLock<HashMap<String, Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_artifact(&self, artifact_id: &str) -> Option<Artifact> {
        self.artifacts.read().get(artifact_id).cloned()
    }

    pub fn get_artifact_by_version(
        &self,
        artifact_id: &str,
        version: ArtifactVersion,
    ) -> Option<ArtifactData> {
        self.artifacts
            .read()
            .get(artifact_id)
            .and_then(|a| a.version(version).cloned())
    }

    /// Shallow-merge `patch` into one version of an artifact.
    ///
    /// An unknown artifact is created for `chat_id` with an empty original
    /// version.
    pub fn update_artifact(&self, chat_id: &str, artifact_id: &str, version: ArtifactVersion, patch: ArtifactData) {
        let mut artifacts = self.artifacts.write();
        let artifact = artifacts
            .entry(artifact_id.to_string())
            .or_insert_with(|| Artifact {
                artifact_id: artifact_id.to_string(),
                chat_id: chat_id.to_string(),
                original: ArtifactData::new(),
                updated: None,
            });
        if artifact.chat_id.is_empty() {
            artifact.chat_id = chat_id.to_string();
        }

        let target = match version {
            ArtifactVersion::Original => &mut artifact.original,
            ArtifactVersion::Updated => artifact.updated.get_or_insert_with(ArtifactData::new),
        };
        target.extend(patch);
        debug!("Updated {} version of artifact {}", version, artifact_id);
    }

    /// Register an artifact referenced by an `actions` frame.
    ///
    /// The first sighting creates it; later sightings merge into the
    /// original version and leave any draft alone.
    pub fn init_artifacts(&self, chat_id: &str, artifact_id: &str, data: ArtifactData) {
        let mut data = data;
        data.insert("is_editable".to_string(), Value::Bool(true));

        let mut artifacts = self.artifacts.write();
        match artifacts.get_mut(artifact_id) {
            Some(existing) => {
                existing.chat_id = chat_id.to_string();
                existing.original.extend(data);
            }
            None => {
                artifacts.insert(
                    artifact_id.to_string(),
                    Artifact {
                        artifact_id: artifact_id.to_string(),
                        chat_id: chat_id.to_string(),
                        original: data,
                        updated: None,
                    },
                );
            }
        }
    }

    /// Register the artifact behind a streamed action.
    pub fn init_from_action(&self, chat_id: &str, action: &Action) {
        if action.artifact_id.is_empty() {
            return;
        }
        let data = match serde_json::to_value(action) {
            Ok(Value::Object(map)) => map,
            _ => ArtifactData::new(),
        };
        self.init_artifacts(chat_id, &action.artifact_id, data);
    }

    /// Ids of every artifact registered for a chat, sorted.
    pub fn artifacts_for_chat(&self, chat_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .artifacts
            .read()
            .values()
            .filter(|a| a.chat_id == chat_id)
            .map(|a| a.artifact_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop every artifact belonging to a chat.
    pub fn remove_chat(&self, chat_id: &str) {
        self.artifacts.write().retain(|_, a| a.chat_id != chat_id);
    }

    /// Original version of an artifact with gaps filled from its action.
    ///
    /// History reloads may carry outcome details only on the action, so the
    /// action's fields act as fallbacks for display.
    pub fn display_record(&self, action: &Action) -> Option<ArtifactData> {
        let artifact = self.get_artifact(&action.artifact_id)?;
        let mut record = artifact.original;

        let entity = action.entity.clone().unwrap_or_default();
        fill_missing(&mut record, "action", Some(action.action.clone()));
        fill_missing(&mut record, "artifact_type", Some(action.artifact_type.clone()));
        fill_missing(&mut record, "entity_name", entity.entity_name);
        fill_missing(&mut record, "entity_url", entity.entity_url);
        fill_missing(&mut record, "error", action.error.clone());
        fill_missing(&mut record, "message", action.message.clone());
        Some(record)
    }
}

fn fill_missing(record: &mut ArtifactData, key: &str, fallback: Option<String>) {
    let missing = match record.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if missing {
        if let Some(value) = fallback {
            record.insert(key.to_string(), Value::String(value));
        }
    }
}
