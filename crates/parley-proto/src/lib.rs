//! parley-proto: wire event vocabulary and chat service transport
//!
//! This crate defines the typed event stream the chat service emits, the
//! message and request types shared with the orchestrator, and the
//! transport seam (plus an HTTP implementation) the orchestrator talks
//! through.

pub mod error;
pub mod event;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use event::{EventKind, StageInfo, StreamEvent, decode_line};
pub use transport::{ChatTransport, EventStream, HttpTransport, LineBuffer};
pub use types::{
    Attachment, ChatRequest, ContentItem, ConversationMeta, HistoryEntry, Message, Payload, Role,
    Step,
};
