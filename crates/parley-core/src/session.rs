//! Stream session bookkeeping: one cancellation handle and one idle timer
//! per actively streaming conversation, multiplexed across many concurrent
//! sessions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Why a session was aborted from outside its own read loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The user pressed stop; not an error
    UserStopped,
    /// The idle timer fired
    Timeout,
    /// The conversation is being deleted
    Deleted,
}

/// Deadline re-armed on every received event. Distinct from a
/// total-duration deadline: a stream may run for hours as long as events
/// keep arriving.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    deadline: Arc<Mutex<Instant>>,
    period: Duration,
}

impl IdleTimer {
    /// Create a timer armed `period` from now
    pub fn new(period: Duration) -> Self {
        Self {
            deadline: Arc::new(Mutex::new(Instant::now() + period)),
            period,
        }
    }

    /// Push the deadline out to `period` from now
    pub fn reset(&self) {
        *self.deadline.lock() = Instant::now() + self.period;
    }

    /// Resolves once the deadline passes without a reset
    pub async fn expired(&self) {
        loop {
            let deadline = *self.deadline.lock();
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Handles a stream read loop needs from its session
#[derive(Clone)]
pub struct SessionHandles {
    pub cancel: CancellationToken,
    pub idle: IdleTimer,
}

/// Per-conversation live session state
struct StreamSession {
    cancel: CancellationToken,
    idle: IdleTimer,
    last_activity: Instant,
    abort_reason: Option<AbortReason>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, StreamSession>,
    viewed: Option<String>,
    background_completed: HashSet<String>,
}

/// Owns the conversation-id → session map.
///
/// All fields are behind one `Arc`, so cloning is cheap and every clone
/// sees the same sessions.
#[derive(Clone, Default)]
pub struct StreamSessionManager {
    inner: Arc<Mutex<Inner>>,
}

impl StreamSessionManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a session for a conversation.
    ///
    /// At most one live session may exist per conversation id; a second
    /// `begin` without an intervening `end` is a programmer error and
    /// returns [`Error::SessionActive`].
    pub fn begin(&self, conversation_id: &str, idle_timeout: Duration) -> Result<SessionHandles> {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(conversation_id) {
            return Err(Error::SessionActive(conversation_id.to_string()));
        }
        let session = StreamSession {
            cancel: CancellationToken::new(),
            idle: IdleTimer::new(idle_timeout),
            last_activity: Instant::now(),
            abort_reason: None,
        };
        let handles = SessionHandles {
            cancel: session.cancel.clone(),
            idle: session.idle.clone(),
        };
        inner
            .sessions
            .insert(conversation_id.to_string(), session);
        Ok(handles)
    }

    /// Re-arm the idle timer after a successfully parsed event
    pub fn reset_idle_timer(&self, conversation_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get_mut(conversation_id) {
            session.idle.reset();
            session.last_activity = Instant::now();
        }
    }

    /// Abort a session. The first reason recorded wins; no-op when no
    /// session is active.
    pub fn abort(&self, conversation_id: &str, reason: AbortReason) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get_mut(conversation_id) {
            session.abort_reason.get_or_insert(reason);
            session.cancel.cancel();
        }
    }

    /// The reason a session was aborted, if it was
    pub fn abort_reason(&self, conversation_id: &str) -> Option<AbortReason> {
        self.inner
            .lock()
            .sessions
            .get(conversation_id)
            .and_then(|s| s.abort_reason)
    }

    /// End a session on any path (success or abort): cancels, removes the
    /// map entry, and badges the conversation as completed-in-background
    /// when it is not the one the user is viewing. Returns whether the
    /// badge was set. Idempotent.
    pub fn end(&self, conversation_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(session) = inner.sessions.remove(conversation_id) else {
            return false;
        };
        session.cancel.cancel();
        // A deleted conversation has nothing left to badge.
        let deleted = session.abort_reason == Some(AbortReason::Deleted);
        if !deleted && inner.viewed.as_deref() != Some(conversation_id) {
            inner
                .background_completed
                .insert(conversation_id.to_string());
            return true;
        }
        false
    }

    /// Whether a live session exists for this conversation
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.inner.lock().sessions.contains_key(conversation_id)
    }

    /// Number of live sessions
    pub fn active_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Record which conversation the user is viewing; opening one clears
    /// its completed-in-background badge.
    pub fn set_viewed(&self, conversation_id: Option<&str>) {
        let mut inner = self.inner.lock();
        inner.viewed = conversation_id.map(str::to_string);
        if let Some(id) = conversation_id {
            inner.background_completed.remove(id);
        }
    }

    /// The conversation the user is viewing
    pub fn viewed(&self) -> Option<String> {
        self.inner.lock().viewed.clone()
    }

    /// Whether a conversation finished streaming while unviewed
    pub fn completed_in_background(&self, conversation_id: &str) -> bool {
        self.inner
            .lock()
            .background_completed
            .contains(conversation_id)
    }

    /// Drop all badge/session state for a conversation (on delete)
    pub fn forget(&self, conversation_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.remove(conversation_id) {
            session.cancel.cancel();
        }
        inner.background_completed.remove(conversation_id);
    }

    /// Time since the session last saw an event
    pub fn idle_for(&self, conversation_id: &str) -> Option<Duration> {
        self.inner
            .lock()
            .sessions
            .get(conversation_id)
            .map(|s| s.last_activity.elapsed())
    }
}
