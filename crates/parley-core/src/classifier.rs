//! Event classification: one decoded event becomes one mutation of the
//! in-flight assistant message.

use std::collections::HashMap;

use parley_proto::{ContentItem, EventKind, Message, Payload, Role, StageInfo, Step, StreamEvent};

use crate::truncation::{TruncationBuffer, TruncationNotice, join_summary};

/// Title of the step that collects live preprocessing status
pub const PREPROCESSING_STEP: &str = "Attachment preprocessing";

/// Status line shown when preprocessing finished without truncations
const PARSING_COMPLETE: &str = "File parsing complete";

/// Classifies stream events into assistant-message mutations.
///
/// Pure except for the truncation buffer and the filename → description map
/// it collects from `file_processed` events; both are scoped by conversation
/// id.
#[derive(Debug, Default)]
pub struct Classifier {
    truncation: TruncationBuffer,
    file_descriptions: HashMap<String, HashMap<String, String>>,
}

impl Classifier {
    /// Create an empty classifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event to the message. Events targeting a non-assistant
    /// message are ignored.
    pub fn apply(&mut self, scope: &str, message: &mut Message, event: &StreamEvent) {
        if message.role != Role::Assistant {
            return;
        }

        match event {
            StreamEvent::Progress { stage, message: text } => {
                set_status_slot(message, EventKind::Progress, render_progress(stage, text));
            }
            StreamEvent::Error { filename, message: text } => {
                set_status_slot(message, EventKind::Error, render_parse_failed(filename, text));
            }
            StreamEvent::FileProcessed { filename, description } => {
                if let Some(description) = description {
                    self.file_descriptions
                        .entry(scope.to_string())
                        .or_default()
                        .insert(filename.clone(), description.clone());
                }
                set_status_slot(
                    message,
                    EventKind::FileProcessed,
                    format!("Parsed {filename}"),
                );
            }
            StreamEvent::Complete { message: text } => {
                let drained = self.truncation.drain(scope);
                let line = if drained.is_empty() {
                    text.clone().unwrap_or_else(|| PARSING_COMPLETE.to_string())
                } else {
                    join_summary(&drained)
                };
                set_status_slot(message, EventKind::Complete, line);
            }
            StreamEvent::Truncation { filename, message: text } => {
                let notice = TruncationNotice::new(filename.clone(), text.clone());
                if !self.truncation.offer(scope, notice) {
                    tracing::debug!(scope, "duplicate truncation notice dropped");
                }
            }
            StreamEvent::ModelOutput { text } => {
                message.content.push_str(text);
                message.is_thinking = false;
                append_model_output(phase_step(message), text);
            }
            StreamEvent::Execution { payload }
            | StreamEvent::MemorySearch { payload }
            | StreamEvent::SearchContent { payload }
            | StreamEvent::SearchContentPlaceholder { payload }
            | StreamEvent::Card { payload }
            | StreamEvent::Virtual { payload } => {
                phase_step(message)
                    .contents
                    .push(ContentItem::new(event.kind(), payload.clone()));
            }
            StreamEvent::Unknown { kind, payload } => {
                // Default renderer: raw text, or a structured dump for
                // non-string payloads. Never dropped.
                phase_step(message).contents.push(ContentItem::new(
                    EventKind::Other(kind.clone()),
                    payload.clone(),
                ));
            }
        }
    }

    /// The filename → description map collected for a conversation
    pub fn file_descriptions(&self, scope: &str) -> HashMap<String, String> {
        self.file_descriptions.get(scope).cloned().unwrap_or_default()
    }

    /// Drop all state held for a conversation
    pub fn forget_scope(&mut self, scope: &str) {
        self.truncation.clear(scope);
        self.file_descriptions.remove(scope);
    }
}

/// Find or create the step for the current phase
fn phase_step(message: &mut Message) -> &mut Step {
    let pos = match message
        .steps
        .iter()
        .position(|s| s.title == PREPROCESSING_STEP)
    {
        Some(pos) => pos,
        None => {
            message.steps.push(Step::new(PREPROCESSING_STEP));
            message.steps.len() - 1
        }
    };
    &mut message.steps[pos]
}

/// Overwrite the step's status slot: the latest tracked-phase event wins.
/// One item regardless of event volume.
fn set_status_slot(message: &mut Message, kind: EventKind, text: String) {
    let step = phase_step(message);
    match step.contents.iter_mut().find(|c| c.kind.is_preprocessing()) {
        Some(slot) => {
            slot.kind = kind;
            slot.payload = Payload::Text(text);
            slot.timestamp = chrono::Utc::now().timestamp_millis();
        }
        None => step.contents.insert(0, ContentItem::new(kind, text)),
    }
}

/// Accumulate answer deltas into a single model-output item
fn append_model_output(step: &mut Step, text: &str) {
    if let Some(item) = step
        .contents
        .iter_mut()
        .rev()
        .find(|c| c.kind == EventKind::ModelOutput)
    {
        if let Payload::Text(existing) = &mut item.payload {
            existing.push_str(text);
            item.timestamp = chrono::Utc::now().timestamp_millis();
            return;
        }
    }
    step.contents
        .push(ContentItem::new(EventKind::ModelOutput, text));
}

fn render_progress(stage: &Option<StageInfo>, message: &Option<String>) -> String {
    if let Some(stage) = stage {
        match (stage.current, stage.total) {
            (Some(current), Some(total)) => format!("{}: {current}/{total}", stage.name),
            (Some(current), None) => format!("{}: {current}", stage.name),
            _ => stage.name.clone(),
        }
    } else {
        message.clone().unwrap_or_default()
    }
}

fn render_parse_failed(filename: &Option<String>, message: &Option<String>) -> String {
    let filename = filename.as_deref().unwrap_or("unknown");
    match message {
        Some(message) if !message.is_empty() => {
            format!("Failed to parse {filename}: {message}")
        }
        _ => format!("Failed to parse {filename}"),
    }
}
