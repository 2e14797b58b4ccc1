//! parley-core: multi-conversation streaming orchestrator
//!
//! This crate owns the streaming send/receive flow of the chat client: it
//! multiplexes many concurrently streaming conversations, enforces the
//! per-conversation cancellation and idle-timeout contract, classifies the
//! incoming event stream into assistant-message mutations, and derives the
//! final-answer timeline and grouped task trace the UI renders.

pub mod classifier;
pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod session;
pub mod splitter;
pub mod truncation;

pub use classifier::Classifier;
pub use config::CoreConfig;
pub use conversation::{Conversation, ConversationSummary, STOPPED_MARKER};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use events::UiEvent;
pub use session::{AbortReason, IdleTimer, SessionHandles, StreamSessionManager};
pub use splitter::{SplitView, TaskMessage, split};
pub use truncation::{TruncationBuffer, TruncationNotice};
