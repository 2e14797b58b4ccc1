//! Streamed event vocabulary
//!
//! The chat service emits line-delimited JSON objects, one per event, each
//! carrying a `type` tag. The vocabulary is closed here as a tagged union;
//! tags this client does not know about land in [`StreamEvent::Unknown`] so
//! they can still be rendered instead of dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Tag vocabulary shared by streamed events and trace content items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Progress,
    Error,
    FileProcessed,
    Complete,
    Truncation,
    Card,
    SearchContent,
    SearchContentPlaceholder,
    ModelOutput,
    Execution,
    MemorySearch,
    Virtual,
    /// Any tag outside the fixed vocabulary
    Other(String),
}

impl EventKind {
    /// Whether this kind belongs to the preprocessing status family whose
    /// rendering shares one overwritten content slot
    pub fn is_preprocessing(&self) -> bool {
        matches!(
            self,
            EventKind::Progress
                | EventKind::Error
                | EventKind::FileProcessed
                | EventKind::Complete
                | EventKind::Truncation
        )
    }

    /// The wire tag for this kind
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Error => "error",
            EventKind::FileProcessed => "file_processed",
            EventKind::Complete => "complete",
            EventKind::Truncation => "truncation",
            EventKind::Card => "card",
            EventKind::SearchContent => "search_content",
            EventKind::SearchContentPlaceholder => "search_content_placeholder",
            EventKind::ModelOutput => "model_output",
            EventKind::Execution => "execution",
            EventKind::MemorySearch => "memory_search",
            EventKind::Virtual => "virtual",
            EventKind::Other(tag) => tag,
        }
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "progress" => EventKind::Progress,
            "error" => EventKind::Error,
            "file_processed" => EventKind::FileProcessed,
            "complete" => EventKind::Complete,
            "truncation" => EventKind::Truncation,
            "card" => EventKind::Card,
            "search_content" => EventKind::SearchContent,
            "search_content_placeholder" => EventKind::SearchContentPlaceholder,
            "model_output" => EventKind::ModelOutput,
            "execution" => EventKind::Execution,
            "memory_search" => EventKind::MemorySearch,
            "virtual" => EventKind::Virtual,
            _ => EventKind::Other(tag),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured progress payload attached to `progress` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    /// Stage name, e.g. "parsing"
    pub name: String,
    /// Items completed so far
    #[serde(default)]
    pub current: Option<u32>,
    /// Total items, when known
    #[serde(default)]
    pub total: Option<u32>,
}

/// One decoded event from the assistant stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEvent")]
pub enum StreamEvent {
    /// Preprocessing status update
    Progress {
        stage: Option<StageInfo>,
        message: Option<String>,
    },
    /// A file failed to parse
    Error {
        filename: Option<String>,
        message: Option<String>,
    },
    /// A file was parsed; `description` feeds the attachment annotations of
    /// later requests
    FileProcessed {
        filename: String,
        description: Option<String>,
    },
    /// Preprocessing finished
    Complete { message: Option<String> },
    /// A file was truncated; buffered and coalesced, never shown per-event
    Truncation {
        filename: Option<String>,
        message: Option<String>,
    },
    /// Answer text delta
    ModelOutput { text: String },
    /// Code execution trace
    Execution { payload: Value },
    /// Memory lookup trace
    MemorySearch { payload: Value },
    /// Retrieved search content
    SearchContent { payload: Value },
    /// Placeholder emitted before search content resolves
    SearchContentPlaceholder { payload: Value },
    /// Rich card payload
    Card { payload: Value },
    /// Synthetic item injected by the service
    Virtual { payload: Value },
    /// Any tag outside the fixed vocabulary; rendered via the default path
    Unknown { kind: String, payload: Value },
}

impl StreamEvent {
    /// The tag for this event
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Progress { .. } => EventKind::Progress,
            StreamEvent::Error { .. } => EventKind::Error,
            StreamEvent::FileProcessed { .. } => EventKind::FileProcessed,
            StreamEvent::Complete { .. } => EventKind::Complete,
            StreamEvent::Truncation { .. } => EventKind::Truncation,
            StreamEvent::ModelOutput { .. } => EventKind::ModelOutput,
            StreamEvent::Execution { .. } => EventKind::Execution,
            StreamEvent::MemorySearch { .. } => EventKind::MemorySearch,
            StreamEvent::SearchContent { .. } => EventKind::SearchContent,
            StreamEvent::SearchContentPlaceholder { .. } => EventKind::SearchContentPlaceholder,
            StreamEvent::Card { .. } => EventKind::Card,
            StreamEvent::Virtual { .. } => EventKind::Virtual,
            StreamEvent::Unknown { kind, .. } => EventKind::Other(kind.clone()),
        }
    }

    /// Whether this event belongs to the preprocessing status family whose
    /// rendering shares one overwritten content slot
    pub fn is_preprocessing(&self) -> bool {
        matches!(
            self,
            StreamEvent::Progress { .. }
                | StreamEvent::Error { .. }
                | StreamEvent::FileProcessed { .. }
                | StreamEvent::Complete { .. }
                | StreamEvent::Truncation { .. }
        )
    }
}

/// Intermediate shape: tag plus whatever other fields the line carried
#[derive(Debug, Clone, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    fields: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct ProgressFields {
    #[serde(default)]
    stage: Option<StageInfo>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct FileErrorFields {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct FileProcessedFields {
    filename: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct CompleteFields {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct TextFields {
    text: String,
}

impl TryFrom<RawEvent> for StreamEvent {
    type Error = serde_json::Error;

    fn try_from(raw: RawEvent) -> std::result::Result<Self, serde_json::Error> {
        let body = Value::Object(raw.fields);
        Ok(match raw.kind.as_str() {
            "progress" => {
                let f: ProgressFields = serde_json::from_value(body)?;
                StreamEvent::Progress {
                    stage: f.stage,
                    message: f.message,
                }
            }
            "error" => {
                let f: FileErrorFields = serde_json::from_value(body)?;
                StreamEvent::Error {
                    filename: f.filename,
                    message: f.message,
                }
            }
            "file_processed" => {
                let f: FileProcessedFields = serde_json::from_value(body)?;
                StreamEvent::FileProcessed {
                    filename: f.filename,
                    description: f.description,
                }
            }
            "complete" => {
                let f: CompleteFields = serde_json::from_value(body)?;
                StreamEvent::Complete { message: f.message }
            }
            "truncation" => {
                let f: FileErrorFields = serde_json::from_value(body)?;
                StreamEvent::Truncation {
                    filename: f.filename,
                    message: f.message,
                }
            }
            "model_output" => {
                let f: TextFields = serde_json::from_value(body)?;
                StreamEvent::ModelOutput { text: f.text }
            }
            "execution" => StreamEvent::Execution {
                payload: event_payload(body),
            },
            "memory_search" => StreamEvent::MemorySearch {
                payload: event_payload(body),
            },
            "search_content" => StreamEvent::SearchContent {
                payload: event_payload(body),
            },
            "search_content_placeholder" => StreamEvent::SearchContentPlaceholder {
                payload: event_payload(body),
            },
            "card" => StreamEvent::Card {
                payload: event_payload(body),
            },
            "virtual" => StreamEvent::Virtual {
                payload: event_payload(body),
            },
            _ => StreamEvent::Unknown {
                kind: raw.kind,
                payload: event_payload(body),
            },
        })
    }
}

/// Collapse a single-field `{"payload": ...}` or `{"message": "..."}` body
/// to its inner value so simple events carry a plain payload.
fn event_payload(body: Value) -> Value {
    if let Value::Object(map) = &body {
        if map.len() == 1 {
            if let Some(value) = map.get("payload").or_else(|| map.get("message")) {
                return value.clone();
            }
        }
    }
    body
}

/// Decode one line of the stream into an event.
///
/// Failures are [`Error::Decode`]: recoverable per-line, never fatal to the
/// surrounding stream.
pub fn decode_line(line: &str) -> Result<StreamEvent> {
    serde_json::from_str(line).map_err(|e| Error::Decode(format!("{e} in {line:?}")))
}
