//! # pi_chat - Pi Chat streaming engine
//!
//! This crate provides the conversational engine behind Pi Chat:
//! - Queries answered over a server-sent event stream keyed by a token
//! - Incremental answer and reasoning assembly
//! - Assistant-proposed actions on editable artifacts, executed in batches
//! - Cancellation and in-place regeneration of answers
//! - Optimistic thread list mutations with rollback
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  ChatRegistry   │────▶│ PiChatBackend   │────▶│  Pi HTTP API    │
//! └────────┬────────┘     └────────┬────────┘     └─────────────────┘
//!          │                       │ frames
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ DialogueBuilder │◀────│StreamController │     │ ActionExecutor  │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!          │                                               │
//!          ▼                                               ▼
//! ┌─────────────────┐                             ┌─────────────────┐
//! │  ThreadIndex    │                             │  ArtifactStore  │
//! └─────────────────┘                             └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pi_chat::{ChatRegistry, Focus, HttpBackend, PiConfig, QueryParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = HttpBackend::new(PiConfig::from_env()?)?;
//!     let registry = ChatRegistry::new(Arc::new(backend));
//!
//!     let chat_id = registry.create_new_chat(&Focus::none(), None, false, None).await?;
//!     registry.get_answer(&chat_id, "What is due this week?", QueryParams::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod backend;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod events;
pub mod executor;
pub mod frame;
pub mod http;
pub mod mock;
pub mod registry;
pub mod sse;
pub mod stream;
pub mod threads;
pub mod types;

pub use artifacts::{Artifact, ArtifactData, ArtifactStore, ArtifactVersion};
pub use backend::{
    ArtifactPayload, Attachment, ChatArtifact, ConvertToPageRequest, ExecuteActionRequest, ExecuteActionResponse,
    FeedbackRequest, FollowUpRequest, FollowUpResponse, FrameStream, InitChatRequest, PiChatBackend, PromptTemplate,
    PromptsRequest, ThreadPage, TokenRequest, DEFAULT_LLM,
};
pub use config::PiConfig;
pub use dialogue::DialogueBuilder;
pub use error::{ChatError, ChatResult, DEFAULT_ACTION_ERROR, FALLBACK_ANSWER};
pub use events::{ChatEvent, EventBus};
pub use executor::ActionExecutor;
pub use frame::WireFrame;
pub use http::HttpBackend;
pub use mock::{CallGate, CapturedCall, FrameSender, MockBackend};
pub use registry::{ChatRegistry, QueryParams};
pub use sse::decode_frames;
pub use stream::{StreamBinding, StreamController};
pub use threads::{PagedThreads, Placement, ThreadIndex};
pub use types::*;
