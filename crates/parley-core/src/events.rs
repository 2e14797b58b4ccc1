//! UI-facing event types

use serde::Serialize;

/// Events broadcast to the rendering layer during orchestration
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// A conversation entered the local registry
    ConversationCreated { id: String },

    /// A conversation's messages or metadata changed; re-derive its views
    ConversationUpdated { id: String },

    /// A conversation left the local registry
    ConversationRemoved { id: String },

    /// A stream session began
    StreamStarted { id: String },

    /// A stream session ended, on any path
    StreamEnded { id: String },

    /// A stream finished while the user was viewing another conversation
    BackgroundCompleted { id: String },

    /// The viewed conversation changed; `None` is the new-conversation view
    ViewChanged { id: Option<String> },

    /// Toast-equivalent notice for non-fatal failures
    Notice { message: String },
}
