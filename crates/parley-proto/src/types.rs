//! Core types for chat conversations

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::EventKind;

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Payload of a trace content item: plain text or a structured value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Structured(Value),
}

impl Payload {
    /// Get the text if this is a plain text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Structured(_) => None,
        }
    }

    /// Render for display: text verbatim, structured values as pretty JSON
    pub fn display(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Payload::Text(text),
            other => Payload::Structured(other),
        }
    }
}

/// One trace record inside a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub kind: EventKind,
    pub payload: Payload,
    /// Millisecond epoch of the last write
    pub timestamp: i64,
}

impl ContentItem {
    /// Create a content item, stamping it now
    pub fn new(kind: EventKind, payload: impl Into<Payload>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload: payload.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A trace unit within an assistant message, e.g. attachment preprocessing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Step {
    pub id: String,
    pub title: String,
    pub contents: Vec<ContentItem>,
    /// Reasoning text captured for this step
    #[serde(default)]
    pub thinking: Option<ContentItem>,
    /// Code the step ran
    #[serde(default)]
    pub code: Option<ContentItem>,
    /// Output the code produced
    #[serde(default)]
    pub output: Option<ContentItem>,
}

impl Step {
    /// Create an empty step with a title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Attachment descriptor carried on requests and user messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Storage object key
    pub object_name: String,
    /// Display filename
    pub name: String,
    /// MIME type or short kind tag
    #[serde(rename = "type")]
    pub kind: String,
    /// Size in bytes
    pub size: u64,
    pub url: String,
    /// Parse summary collected from `file_processed` events
    #[serde(default)]
    pub description: Option<String>,
}

/// One message in a conversation.
///
/// User messages are immutable once created. The assistant message of the
/// current turn is the only message mutated in place while its conversation
/// streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Raw accumulated text
    pub content: String,
    /// Millisecond epoch
    pub created_at: i64,
    pub is_complete: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Authoritative rendered answer, distinct from raw `content`
    #[serde(default)]
    pub final_answer: Option<String>,
    /// User-facing failure text; never the raw transport error
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Whether the thinking indicator is showing
    #[serde(default)]
    pub is_thinking: bool,
}

impl Message {
    /// Create a complete user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: text.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            is_complete: true,
            steps: vec![],
            final_answer: None,
            error: None,
            attachments: vec![],
            is_thinking: false,
        }
    }

    /// Create a user message carrying attachments
    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::user(text)
        }
    }

    /// Create the empty, incomplete assistant message for a new turn
    pub fn assistant_pending() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
            is_complete: false,
            steps: vec![],
            final_answer: None,
            error: None,
            attachments: vec![],
            is_thinking: true,
        }
    }

    /// The text a reader should see: the rendered answer when present,
    /// otherwise the raw content
    pub fn resolved_text(&self) -> &str {
        self.final_answer.as_deref().unwrap_or(&self.content)
    }

    /// Whether this message has anything worth placing on the final timeline
    pub fn has_renderable_content(&self) -> bool {
        !self.content.trim().is_empty() || self.final_answer.is_some() || self.error.is_some()
    }
}

/// A turn of prior history sent back to the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

/// Outbound chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: String,
    /// Raw or preprocessed query text
    pub query: String,
    /// Whether this is the conversation's first turn
    pub is_first_turn: bool,
    /// Prior turns, role plus resolved text
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Server-side conversation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub id: String,
    pub title: String,
    /// Millisecond epoch
    pub created_at: i64,
}
