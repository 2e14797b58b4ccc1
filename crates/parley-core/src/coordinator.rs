//! The conversation state coordinator: creates/switches/deletes
//! conversations, runs one stream read loop per streaming conversation, and
//! decides when a finished stream marks its conversation
//! completed-in-background.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use parley_proto::{
    Attachment, ChatRequest, ChatTransport, ConversationMeta, EventStream, HistoryEntry, Message,
};

use crate::{
    classifier::Classifier,
    config::CoreConfig,
    conversation::{Conversation, ConversationSummary, STOPPED_MARKER},
    error::{Error, Result},
    events::UiEvent,
    session::{AbortReason, SessionHandles, StreamSessionManager},
    splitter::{self, SplitView},
};

/// Retry-prompting text shown when a stream goes silent too long
const TIMEOUT_MESSAGE: &str = "The response timed out. Please try again.";
/// Generic user-facing failure text; the raw error is only logged
const FAILURE_MESSAGE: &str = "Something went wrong while responding. Please try again.";
/// Shown on a conversation whose history fetch failed
const HISTORY_FAILED_MESSAGE: &str = "Could not load this conversation. Retry to load it again.";

/// Longest auto-derived conversation title
const TITLE_MAX_CHARS: usize = 48;

/// State owned exclusively by the coordinator
struct State {
    conversations: HashMap<String, Conversation>,
    /// Creation order, for stable listing
    order: Vec<String>,
    /// One cancellation token per in-flight history fetch
    history_loads: HashMap<String, CancellationToken>,
    classifier: Classifier,
}

struct Shared {
    state: Mutex<State>,
    sessions: StreamSessionManager,
    transport: Arc<dyn ChatTransport>,
    events: broadcast::Sender<UiEvent>,
    config: CoreConfig,
}

/// How a stream read loop ended
enum StreamOutcome {
    /// The stream closed normally
    Finished,
    /// The idle timer fired
    TimedOut,
    /// The cancellation token fired; the reason lives with the session
    Aborted,
    /// Fatal transport error, raw detail attached
    Failed(String),
    /// The conversation disappeared mid-stream
    Gone,
}

/// Orchestrates every conversation: lifecycle, streaming, and derived views.
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Create a coordinator over a transport
    pub fn new(transport: Arc<dyn ChatTransport>, config: CoreConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    conversations: HashMap::new(),
                    order: vec![],
                    history_loads: HashMap::new(),
                    classifier: Classifier::new(),
                }),
                sessions: StreamSessionManager::new(),
                transport,
                events,
                config,
            }),
        }
    }

    /// Subscribe to UI events
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.shared.events.subscribe()
    }

    /// Add a conversation known from the server-side listing. No-op when it
    /// is already registered.
    pub fn register_conversation(&self, meta: ConversationMeta) {
        let id = meta.id.clone();
        {
            let mut state = self.shared.state.lock();
            if state.conversations.contains_key(&id) {
                return;
            }
            state.conversations.insert(id.clone(), Conversation::new(meta));
            state.order.push(id.clone());
        }
        let _ = self.shared.events.send(UiEvent::ConversationCreated { id });
    }

    /// Enter the new-conversation view. No Conversation exists until the
    /// first send.
    pub fn start_new(&self) {
        self.shared.sessions.set_viewed(None);
        let _ = self.shared.events.send(UiEvent::ViewChanged { id: None });
    }

    /// Send a user message and begin streaming the reply.
    ///
    /// With no conversation id, a server-side conversation is created first.
    /// Returns the conversation id; transport failures after that point are
    /// absorbed into the assistant message's error state rather than
    /// returned.
    pub async fn send_message(
        &self,
        conversation_id: Option<&str>,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<String> {
        let shared = &self.shared;

        let id = match conversation_id {
            Some(id) => {
                if !shared.state.lock().conversations.contains_key(id) {
                    return Err(Error::UnknownConversation(id.to_string()));
                }
                if shared.sessions.is_active(id) {
                    return Err(Error::SessionActive(id.to_string()));
                }
                id.to_string()
            }
            None => {
                let meta = shared
                    .transport
                    .create_conversation(Some(&derive_title(text)))
                    .await?;
                let id = meta.id.clone();
                {
                    let mut state = shared.state.lock();
                    state.conversations.insert(id.clone(), Conversation::new(meta));
                    state.order.push(id.clone());
                }
                let _ = shared
                    .events
                    .send(UiEvent::ConversationCreated { id: id.clone() });
                shared.sessions.set_viewed(Some(&id));
                let _ = shared
                    .events
                    .send(UiEvent::ViewChanged { id: Some(id.clone()) });
                id
            }
        };

        let request = {
            let mut state = shared.state.lock();
            let descriptions = state.classifier.file_descriptions(&id);
            let conversation = state
                .conversations
                .get_mut(&id)
                .ok_or_else(|| Error::UnknownConversation(id.clone()))?;
            let is_first_turn = conversation.messages.is_empty();
            let history = conversation
                .messages
                .iter()
                .map(|m| HistoryEntry {
                    role: m.role,
                    text: m.resolved_text().to_string(),
                })
                .collect();
            let attachments = annotate_attachments(attachments, &descriptions);
            conversation
                .messages
                .push(Message::user_with_attachments(text, attachments.clone()));
            conversation.messages.push(Message::assistant_pending());
            ChatRequest {
                conversation_id: id.clone(),
                query: text.to_string(),
                is_first_turn,
                history,
                attachments,
            }
        };
        let _ = shared
            .events
            .send(UiEvent::ConversationUpdated { id: id.clone() });

        let handles = shared.sessions.begin(&id, shared.config.idle_timeout())?;
        let stream = match shared.transport.send(&request, handles.cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(conversation = %id, error = %e, "failed to open chat stream");
                fail_live_assistant(shared, &id);
                shared.sessions.end(&id);
                let _ = shared
                    .events
                    .send(UiEvent::ConversationUpdated { id: id.clone() });
                return Ok(id);
            }
        };

        let _ = shared
            .events
            .send(UiEvent::StreamStarted { id: id.clone() });
        spawn_stream(shared.clone(), id.clone(), stream, handles);
        Ok(id)
    }

    /// Abort a conversation's stream with the user-stopped reason.
    /// Idempotent; safe when nothing is streaming.
    pub fn stop(&self, conversation_id: &str) {
        if self.shared.sessions.is_active(conversation_id) {
            self.shared
                .sessions
                .abort(conversation_id, AbortReason::UserStopped);
        }
    }

    /// Switch the viewed conversation. Never cancels any other
    /// conversation's session. Fetches history when the target has no
    /// cached messages and is not actively streaming.
    pub fn switch_to(&self, conversation_id: &str) -> Result<()> {
        let needs_history = {
            let state = self.shared.state.lock();
            let conversation = state
                .conversations
                .get(conversation_id)
                .ok_or_else(|| Error::UnknownConversation(conversation_id.to_string()))?;
            conversation.messages.is_empty()
                && conversation.load_error.is_none()
                && !state.history_loads.contains_key(conversation_id)
        };

        self.shared.sessions.set_viewed(Some(conversation_id));
        let _ = self.shared.events.send(UiEvent::ViewChanged {
            id: Some(conversation_id.to_string()),
        });

        if needs_history && !self.shared.sessions.is_active(conversation_id) {
            spawn_history_load(self.shared.clone(), conversation_id.to_string());
        }
        Ok(())
    }

    /// Clear a failed load and fetch history again
    pub fn retry_history(&self, conversation_id: &str) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            let conversation = state
                .conversations
                .get_mut(conversation_id)
                .ok_or_else(|| Error::UnknownConversation(conversation_id.to_string()))?;
            conversation.load_error = None;
            if state.history_loads.contains_key(conversation_id) {
                return Ok(());
            }
        }
        if !self.shared.sessions.is_active(conversation_id) {
            spawn_history_load(self.shared.clone(), conversation_id.to_string());
        }
        Ok(())
    }

    /// Rename a conversation. Fire-and-confirm: the local title changes
    /// immediately; a server failure is logged and surfaced as a notice.
    pub async fn rename(&self, conversation_id: &str, title: &str) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            let conversation = state
                .conversations
                .get_mut(conversation_id)
                .ok_or_else(|| Error::UnknownConversation(conversation_id.to_string()))?;
            conversation.title = title.to_string();
        }
        let _ = self.shared.events.send(UiEvent::ConversationUpdated {
            id: conversation_id.to_string(),
        });

        if let Err(e) = self.shared.transport.rename(conversation_id, title).await {
            tracing::warn!(conversation = %conversation_id, error = %e, "rename failed");
            let _ = self.shared.events.send(UiEvent::Notice {
                message: "Failed to rename conversation".to_string(),
            });
        }
        Ok(())
    }

    /// Delete a conversation. A live stream is aborted before the server
    /// delete so no further events mutate state; the server call itself is
    /// fire-and-confirm.
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        if !self
            .shared
            .state
            .lock()
            .conversations
            .contains_key(conversation_id)
        {
            return Err(Error::UnknownConversation(conversation_id.to_string()));
        }

        if self.shared.sessions.is_active(conversation_id) {
            self.shared
                .sessions
                .abort(conversation_id, AbortReason::Deleted);
        }

        if let Err(e) = self.shared.transport.delete(conversation_id).await {
            tracing::warn!(conversation = %conversation_id, error = %e, "server delete failed");
            let _ = self.shared.events.send(UiEvent::Notice {
                message: "Failed to delete conversation".to_string(),
            });
        }

        {
            let mut state = self.shared.state.lock();
            state.conversations.remove(conversation_id);
            state.order.retain(|id| id != conversation_id);
            if let Some(cancel) = state.history_loads.remove(conversation_id) {
                cancel.cancel();
            }
            state.classifier.forget_scope(conversation_id);
        }
        self.shared.sessions.forget(conversation_id);

        if self.shared.sessions.viewed().as_deref() == Some(conversation_id) {
            self.shared.sessions.set_viewed(None);
            let _ = self.shared.events.send(UiEvent::ViewChanged { id: None });
        }
        let _ = self.shared.events.send(UiEvent::ConversationRemoved {
            id: conversation_id.to_string(),
        });
        Ok(())
    }

    /// Snapshot one conversation
    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.shared
            .state
            .lock()
            .conversations
            .get(conversation_id)
            .cloned()
    }

    /// Derive the final timeline and task groups for one conversation
    pub fn view(&self, conversation_id: &str) -> Option<SplitView> {
        self.shared
            .state
            .lock()
            .conversations
            .get(conversation_id)
            .map(|c| splitter::split(&c.messages))
    }

    /// Listing rows in creation order
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        let state = self.shared.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.conversations.get(id))
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                title: c.title.clone(),
                streaming: self.shared.sessions.is_active(&c.id),
                completed_in_background: self.shared.sessions.completed_in_background(&c.id),
            })
            .collect()
    }

    /// Whether a conversation is actively streaming
    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.shared.sessions.is_active(conversation_id)
    }

    /// Whether a conversation finished streaming while unviewed
    pub fn completed_in_background(&self, conversation_id: &str) -> bool {
        self.shared.sessions.completed_in_background(conversation_id)
    }

    /// The viewed conversation id; `None` is the new-conversation view
    pub fn viewed(&self) -> Option<String> {
        self.shared.sessions.viewed()
    }
}

/// One restartable read loop per streaming conversation: await the next
/// event, classify it, re-arm the idle timer, repeat until completion or
/// cancellation.
fn spawn_stream(shared: Arc<Shared>, id: String, mut stream: EventStream, handles: SessionHandles) {
    tokio::spawn(async move {
        let outcome = loop {
            tokio::select! {
                biased;
                _ = handles.cancel.cancelled() => break StreamOutcome::Aborted,
                _ = handles.idle.expired() => {
                    shared.sessions.abort(&id, AbortReason::Timeout);
                    break StreamOutcome::TimedOut;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        shared.sessions.reset_idle_timer(&id);
                        let mut removed = false;
                        {
                            let mut state = shared.state.lock();
                            let State { conversations, classifier, .. } = &mut *state;
                            match conversations.get_mut(&id) {
                                Some(conversation) => {
                                    if let Some(message) = conversation.live_assistant_mut() {
                                        classifier.apply(&id, message, &event);
                                    }
                                }
                                None => removed = true,
                            }
                        }
                        if removed {
                            break StreamOutcome::Gone;
                        }
                        let _ = shared
                            .events
                            .send(UiEvent::ConversationUpdated { id: id.clone() });
                    }
                    // Malformed single events do not re-arm the timer and do
                    // not abort the stream.
                    Some(Err(e)) if e.is_decode() => {
                        tracing::debug!(conversation = %id, error = %e, "skipping malformed event");
                    }
                    Some(Err(parley_proto::Error::Aborted)) => break StreamOutcome::Aborted,
                    Some(Err(e)) => break StreamOutcome::Failed(e.to_string()),
                    None => break StreamOutcome::Finished,
                }
            }
        };
        finish_stream(shared, id, outcome).await;
    });
}

/// Close out a session on any path: mutate the in-flight assistant message
/// per the outcome, end the session, and notify.
async fn finish_stream(shared: Arc<Shared>, id: String, outcome: StreamOutcome) {
    if let StreamOutcome::Failed(raw) = &outcome {
        tracing::error!(conversation = %id, error = %raw, "stream transport failed");
    }

    let mut stop_server = false;
    {
        let mut state = shared.state.lock();
        if let Some(conversation) = state.conversations.get_mut(&id) {
            if let Some(message) = conversation.live_assistant_mut() {
                match &outcome {
                    StreamOutcome::Finished => {
                        if !message.content.trim().is_empty() {
                            message.final_answer = Some(message.content.clone());
                        }
                        message.is_complete = true;
                        message.is_thinking = false;
                    }
                    StreamOutcome::TimedOut => {
                        message.is_thinking = false;
                        message.error = Some(TIMEOUT_MESSAGE.to_string());
                        message.is_complete = true;
                        stop_server = true;
                    }
                    StreamOutcome::Aborted => match shared.sessions.abort_reason(&id) {
                        Some(AbortReason::UserStopped) => {
                            message.content = STOPPED_MARKER.to_string();
                            message.error = None;
                            message.is_complete = true;
                            message.is_thinking = false;
                            stop_server = true;
                        }
                        // Deletion mutates nothing; the conversation is on
                        // its way out of the registry.
                        _ => {}
                    },
                    StreamOutcome::Failed(_) => {
                        message.content = FAILURE_MESSAGE.to_string();
                        message.error = Some(FAILURE_MESSAGE.to_string());
                        message.is_complete = true;
                        message.is_thinking = false;
                    }
                    StreamOutcome::Gone => {}
                }
            }
        }
    }

    let badged = shared.sessions.end(&id);

    if stop_server {
        // Best-effort; a failure never blocks local cleanup.
        if let Err(e) = shared.transport.stop(&id).await {
            tracing::warn!(conversation = %id, error = %e, "server-side stop failed");
        }
    }

    let _ = shared.events.send(UiEvent::StreamEnded { id: id.clone() });
    if badged {
        let _ = shared
            .events
            .send(UiEvent::BackgroundCompleted { id: id.clone() });
    }
    let _ = shared.events.send(UiEvent::ConversationUpdated { id });
}

/// History fetch with its own cancellation token and timeout, distinct from
/// any assistant stream.
fn spawn_history_load(shared: Arc<Shared>, id: String) {
    let cancel = CancellationToken::new();
    shared
        .state
        .lock()
        .history_loads
        .insert(id.clone(), cancel.clone());
    let timeout = shared.config.history_timeout();

    tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                shared.state.lock().history_loads.remove(&id);
                return;
            }
            _ = tokio::time::sleep(timeout) => {
                Err(Error::Other("history fetch timed out".to_string()))
            }
            result = shared.transport.fetch_history(&id) => result.map_err(Error::from),
        };

        {
            let mut state = shared.state.lock();
            state.history_loads.remove(&id);
            let Some(conversation) = state.conversations.get_mut(&id) else {
                return;
            };
            match result {
                Ok(messages) => {
                    conversation.messages = messages;
                    conversation.load_error = None;
                }
                // Prior state stays; the UI gets a retry affordance instead
                // of a blank conversation.
                Err(e) => {
                    tracing::warn!(conversation = %id, error = %e, "history fetch failed");
                    conversation.load_error = Some(HISTORY_FAILED_MESSAGE.to_string());
                }
            }
        }
        let _ = shared.events.send(UiEvent::ConversationUpdated { id });
    });
}

/// Mark the in-flight assistant message failed with the generic text
fn fail_live_assistant(shared: &Arc<Shared>, id: &str) {
    let mut state = shared.state.lock();
    if let Some(conversation) = state.conversations.get_mut(id) {
        if let Some(message) = conversation.live_assistant_mut() {
            message.content = FAILURE_MESSAGE.to_string();
            message.error = Some(FAILURE_MESSAGE.to_string());
            message.is_complete = true;
            message.is_thinking = false;
        }
    }
}

/// Fill attachment descriptions from the file-processed map when absent
fn annotate_attachments(
    mut attachments: Vec<Attachment>,
    descriptions: &HashMap<String, String>,
) -> Vec<Attachment> {
    for attachment in &mut attachments {
        if attachment.description.is_none() {
            attachment.description = descriptions.get(&attachment.name).cloned();
        }
    }
    attachments
}

/// First line of the query, truncated, as the initial title
fn derive_title(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return "New conversation".to_string();
    }
    line.chars().take(TITLE_MAX_CHARS).collect()
}
