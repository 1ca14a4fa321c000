//! State change notifications.
//!
//! Every state transition in the registry publishes a `ChatEvent`. Consumers
//! subscribe and re-read whatever they render.

use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{ChatId, DialogueKey};

/// Capacity of the notification channel
const EVENT_CAPACITY: usize = 256;

/// A state change in the chat engine
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A chat was created or loaded
    ChatLoaded { chat_id: ChatId },
    /// A chat was removed
    ChatDeleted { chat_id: ChatId },
    /// The backend refused access to a chat
    AccessDenied { chat_id: ChatId },
    /// A dialogue entry changed
    DialogueUpdated { chat_id: ChatId, key: DialogueKey },
    /// A provisional entry received its token
    DialogueConfirmed {
        chat_id: ChatId,
        provisional: DialogueKey,
        confirmed: DialogueKey,
    },
    StreamOpened { chat_id: ChatId, key: DialogueKey },
    /// A stream ended; `aborted` is set when the client cancelled it
    StreamClosed { chat_id: ChatId, aborted: bool },
    TitleUpdated { chat_id: ChatId, title: String },
    /// Thread lists, favorites or chat metadata changed
    ThreadsChanged,
    ModelsChanged,
}

/// Broadcast channel wrapper
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is fine.
    pub fn emit(&self, event: ChatEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!("No subscribers for {:?}", event);
        }
    }
}
