//! Stream controller.
//!
//! Tracks at most one live answer stream per chat. A stream is a spawned
//! pump task that pulls frames from the backend and hands each one to a
//! [`FrameSink`]. Every registration carries a generation number; the sink
//! only applies frames whose generation is still the registered one, so
//! frames from an aborted or replaced stream are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{FrameStream, PiChatBackend};
use crate::error::{ChatError, ChatResult};
use crate::frame::WireFrame;
use crate::types::{ChatId, DialogueKey, Token};

/// Identity of one registered stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBinding {
    pub chat_id: ChatId,
    pub key: DialogueKey,
    pub token: Token,
    pub generation: u64,
    /// Whether this answer is the chat's first exchange
    pub is_first_exchange: bool,
}

/// Receiver of frames from a pump task
pub trait FrameSink: Send + Sync + 'static {
    /// Apply one frame. Returning `false` stops the pump.
    fn deliver(&self, binding: &StreamBinding, frame: WireFrame) -> bool;
}

/// A registered stream
#[derive(Debug)]
pub struct StreamHandle {
    pub binding: StreamBinding,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Stop the pump task; frames already in flight are discarded by the
    /// generation check.
    pub fn cancel(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Registry of live streams keyed by chat id
#[derive(Debug, Default)]
pub struct StreamController {
    handles: HashMap<ChatId, StreamHandle>,
    next_generation: u64,
}

impl StreamController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream for `chat_id`.
    ///
    /// Any stream already registered for the chat is cancelled and returned.
    pub fn register(
        &mut self,
        chat_id: &str,
        key: DialogueKey,
        token: Token,
        is_first_exchange: bool,
    ) -> ChatResult<(StreamBinding, Option<StreamBinding>)> {
        if token.is_empty() {
            return Err(ChatError::Validation("stream token is empty".to_string()));
        }
        if chat_id.is_empty() {
            return Err(ChatError::Validation("chat id is required".to_string()));
        }

        let replaced = self.handles.remove(chat_id).map(|old| {
            debug!("Replacing stream {} for chat {}", old.binding.token, chat_id);
            let binding = old.binding.clone();
            old.cancel();
            binding
        });

        self.next_generation += 1;
        let binding = StreamBinding {
            chat_id: chat_id.to_string(),
            key,
            token,
            generation: self.next_generation,
            is_first_exchange,
        };
        self.handles.insert(
            chat_id.to_string(),
            StreamHandle {
                binding: binding.clone(),
                task: None,
            },
        );
        Ok((binding, replaced))
    }

    /// Attach the pump task to its registration.
    ///
    /// If the registration is gone the task is aborted.
    pub fn attach(&mut self, binding: &StreamBinding, task: JoinHandle<()>) {
        match self.handles.get_mut(&binding.chat_id) {
            Some(handle) if handle.binding.generation == binding.generation => {
                handle.task = Some(task);
            }
            _ => task.abort(),
        }
    }

    /// Whether `binding` is still the chat's registered stream
    pub fn is_current(&self, binding: &StreamBinding) -> bool {
        self.handles
            .get(&binding.chat_id)
            .is_some_and(|h| h.binding.generation == binding.generation)
    }

    /// Deregister `binding` if it is still current.
    ///
    /// Called from the pump itself, so the task is not aborted.
    pub fn release(&mut self, binding: &StreamBinding) -> bool {
        if self.is_current(binding) {
            self.handles.remove(&binding.chat_id);
            true
        } else {
            false
        }
    }

    /// Cancel and deregister the chat's stream.
    pub fn abort(&mut self, chat_id: &str) -> Option<StreamBinding> {
        self.handles.remove(chat_id).map(|handle| {
            let binding = handle.binding.clone();
            handle.cancel();
            binding
        })
    }

    /// Cancel every stream.
    pub fn abort_all(&mut self) -> Vec<StreamBinding> {
        self.handles
            .drain()
            .map(|(_, handle)| {
                let binding = handle.binding.clone();
                handle.cancel();
                binding
            })
            .collect()
    }

    pub fn is_streaming(&self, chat_id: &str) -> bool {
        self.handles.contains_key(chat_id)
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }

    pub fn binding(&self, chat_id: &str) -> Option<&StreamBinding> {
        self.handles.get(chat_id).map(|h| &h.binding)
    }
}

/// Spawn the pump task for a registered stream.
pub fn spawn_pump<S: FrameSink>(
    backend: Arc<dyn PiChatBackend>,
    sink: Arc<S>,
    binding: StreamBinding,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match backend.stream_answer(&binding.token).await {
            Ok(frames) => pump(frames, sink.as_ref(), &binding).await,
            Err(e) => {
                warn!("Failed to open stream {}: {}", binding.token, e);
                sink.deliver(&binding, WireFrame::from(e));
            }
        }
    })
}

/// Feed frames to the sink in delivery order until a terminal frame.
///
/// A stream that ends without `done` is reported as an error frame.
pub async fn pump<S: FrameSink + ?Sized>(mut frames: FrameStream, sink: &S, binding: &StreamBinding) {
    while let Some(item) = frames.next().await {
        let frame = match item {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Stream {} failed: {}", binding.token, e);
                WireFrame::from(e)
            }
        };
        let terminal = frame.is_terminal();
        if !sink.deliver(binding, frame) || terminal {
            return;
        }
    }

    warn!("Stream {} ended without done", binding.token);
    sink.deliver(
        binding,
        WireFrame::Error("stream ended before completion".to_string()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<WireFrame>>,
    }

    impl FrameSink for RecordingSink {
        fn deliver(&self, _binding: &StreamBinding, frame: WireFrame) -> bool {
            self.frames.lock().push(frame);
            true
        }
    }

    fn delta(chunk: &str) -> WireFrame {
        WireFrame::Delta {
            chunk: chunk.to_string(),
        }
    }

    fn binding(controller: &mut StreamController, chat_id: &str, token: &str) -> StreamBinding {
        controller
            .register(chat_id, DialogueKey::from(Token::new(token)), Token::new(token), false)
            .unwrap()
            .0
    }

    #[test]
    fn test_register_rejects_empty_token() {
        let mut controller = StreamController::new();
        let result = controller.register("c1", DialogueKey::provisional(), Token::new(""), false);
        assert!(matches!(result, Err(ChatError::Validation(_))));
        assert_eq!(controller.active_count(), 0);
    }

    #[test]
    fn test_second_register_replaces_first() {
        let mut controller = StreamController::new();
        let first = binding(&mut controller, "c1", "t1");
        let (second, replaced) = controller
            .register("c1", DialogueKey::from(Token::new("t2")), Token::new("t2"), false)
            .unwrap();

        assert_eq!(replaced, Some(first.clone()));
        assert!(!controller.is_current(&first));
        assert!(controller.is_current(&second));
        assert_eq!(controller.active_count(), 1);
    }

    #[test]
    fn test_release_ignores_stale_binding() {
        let mut controller = StreamController::new();
        let first = binding(&mut controller, "c1", "t1");
        let second = binding(&mut controller, "c1", "t2");

        assert!(!controller.release(&first));
        assert!(controller.is_streaming("c1"));
        assert!(controller.release(&second));
        assert!(!controller.is_streaming("c1"));
    }

    #[test]
    fn test_abort_all_empties_registry() {
        let mut controller = StreamController::new();
        binding(&mut controller, "c1", "t1");
        binding(&mut controller, "c2", "t2");
        assert_eq!(controller.abort_all().len(), 2);
        assert_eq!(controller.active_count(), 0);
    }

    #[tokio::test]
    async fn test_pump_stops_at_terminal_frame() {
        let mut controller = StreamController::new();
        let binding = binding(&mut controller, "c1", "t1");
        let sink = RecordingSink::default();
        let frames: FrameStream = stream::iter(vec![Ok(delta("a")), Ok(WireFrame::Done), Ok(delta("late"))]).boxed();

        pump(frames, &sink, &binding).await;
        assert_eq!(*sink.frames.lock(), vec![delta("a"), WireFrame::Done]);
    }

    #[tokio::test]
    async fn test_pump_reports_stream_without_done() {
        let mut controller = StreamController::new();
        let binding = binding(&mut controller, "c1", "t1");
        let sink = RecordingSink::default();
        let frames: FrameStream = stream::iter(vec![Ok(delta("a"))]).boxed();

        pump(frames, &sink, &binding).await;
        let frames = sink.frames.lock();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], WireFrame::Error(_)));
    }

    #[tokio::test]
    async fn test_pump_turns_transport_error_into_error_frame() {
        let mut controller = StreamController::new();
        let binding = binding(&mut controller, "c1", "t1");
        let sink = RecordingSink::default();
        let frames: FrameStream = stream::iter(vec![
            Ok(delta("a")),
            Err(ChatError::Transport("reset".to_string())),
        ])
        .boxed();

        pump(frames, &sink, &binding).await;
        let frames = sink.frames.lock();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_terminal());
    }
}
