//! Decoded stream frames and the reducer that folds them into a dialogue entry.
//!
//! The reducer is pure: side effects of a frame (artifact registration,
//! closing the connection, fetching a title) belong to the stream controller.

use serde::Deserialize;

use crate::error::{ChatError, ChatResult};
use crate::types::{Action, DialogueEntry, ExecutionStatus};

/// A frame received on the answer stream
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Answer text fragment
    Delta { chunk: String },
    /// Reasoning step; frames with an empty header carry nothing
    Reasoning {
        header: String,
        content: Option<String>,
    },
    /// Proposed action on an artifact
    Actions(Action),
    /// End of answer
    Done,
    /// Server-reported failure
    Error(String),
}

#[derive(Deserialize)]
struct DeltaPayload {
    chunk: String,
}

#[derive(Deserialize)]
struct ReasoningPayload {
    #[serde(default)]
    header: String,
    #[serde(default)]
    content: Option<String>,
}

impl WireFrame {
    /// Decode a named event.
    ///
    /// Returns `Ok(None)` for event names the engine does not know.
    pub fn decode(event: &str, data: &str) -> ChatResult<Option<Self>> {
        let frame = match event {
            "delta" => {
                let payload: DeltaPayload = serde_json::from_str(data)?;
                Self::Delta {
                    chunk: payload.chunk,
                }
            }
            "reasoning" => {
                let payload: ReasoningPayload = serde_json::from_str(data)?;
                Self::Reasoning {
                    header: payload.header,
                    content: payload.content,
                }
            }
            "actions" => Self::Actions(serde_json::from_str(data)?),
            "done" => Self::Done,
            "error" => Self::Error(data.to_string()),
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }

    /// Whether the frame ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }

    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::Reasoning { .. } => "reasoning",
            Self::Actions(_) => "actions",
            Self::Done => "done",
            Self::Error(_) => "error",
        }
    }
}

impl From<ChatError> for WireFrame {
    fn from(err: ChatError) -> Self {
        Self::Error(err.to_string())
    }
}

/// Fold one frame into an entry.
pub fn apply(mut entry: DialogueEntry, frame: &WireFrame) -> DialogueEntry {
    match frame {
        WireFrame::Delta { chunk } => {
            entry.is_pi_thinking = false;
            entry.answer.push_str(chunk);
        }
        WireFrame::Reasoning { header, content } => {
            if header.is_empty() {
                return entry;
            }
            entry.current_tick = header.clone();
            entry.reasoning.push_str(header);
            entry.reasoning.push_str(content.as_deref().unwrap_or(""));
        }
        WireFrame::Actions(action) => {
            entry.execution_status = Some(ExecutionStatus::Pending);
            entry.actions.push(action.clone());
        }
        WireFrame::Done => {
            entry.is_pi_thinking = false;
        }
        WireFrame::Error(_) => {
            entry.fail_with_fallback();
        }
    }
    entry
}
