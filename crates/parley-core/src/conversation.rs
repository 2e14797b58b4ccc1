//! Conversation state: messages, titles, and load status.

use parley_proto::{ConversationMeta, Message, Role};
use serde::{Deserialize, Serialize};

/// Literal content marker written when the user stops a stream.
/// The rendering layer recognizes it; it is not an error.
pub const STOPPED_MARKER: &str = "__stopped__";

/// One conversation owned by the coordinator.
///
/// The `streaming` and `completed_in_background` facts live with the session
/// manager and are merged in by [`ConversationSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Set when a history fetch failed; cleared by a successful retry
    #[serde(default)]
    pub load_error: Option<String>,
}

impl Conversation {
    /// Create a conversation from its server-side record
    pub fn new(meta: ConversationMeta) -> Self {
        Self {
            id: meta.id,
            title: meta.title,
            messages: vec![],
            load_error: None,
        }
    }

    /// The in-flight assistant message, when the last message is one
    pub fn live_assistant_mut(&mut self) -> Option<&mut Message> {
        self.messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant && !m.is_complete)
    }
}

/// Listing row for the conversation sidebar
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub streaming: bool,
    pub completed_in_background: bool,
}
