//! Deferred buffering of truncation notices.
//!
//! The transport may emit many near-duplicate "file N truncated" notices in
//! a tight burst. Surfacing each one would flood the trace view, so they are
//! held back, deduplicated, and coalesced into a single line when the turn's
//! `complete` event arrives.

use std::collections::{HashMap, HashSet};

/// Fallback filename for notices that arrive without one
const UNKNOWN_FILE: &str = "unknown";

/// One buffered truncation notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationNotice {
    pub filename: String,
    pub message: String,
}

impl TruncationNotice {
    /// Build a notice, substituting defaults for missing fields
    pub fn new(filename: Option<String>, message: Option<String>) -> Self {
        Self {
            filename: filename.unwrap_or_else(|| UNKNOWN_FILE.to_string()),
            message: message.unwrap_or_default(),
        }
    }

    /// Deduplication key within one scope
    fn key(&self) -> String {
        format!("{}\u{1f}{}", self.filename, self.message)
    }

    /// One human-readable fragment for the joined summary
    pub fn summary_fragment(&self) -> String {
        if self.message.is_empty() {
            self.filename.clone()
        } else {
            format!("{} ({})", self.filename, self.message)
        }
    }
}

/// Per-scope buffer of deduplicated truncation notices.
///
/// Scope is the conversation id: two conversations streaming the same
/// filename at the same time never cross-pollute each other's dedup sets.
#[derive(Debug, Default)]
pub struct TruncationBuffer {
    pending: HashMap<String, Vec<TruncationNotice>>,
    seen: HashMap<String, HashSet<String>>,
}

impl TruncationBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a notice for a scope. Returns false (and drops the notice) when
    /// an identical (filename, message) pair was already buffered there.
    pub fn offer(&mut self, scope: &str, notice: TruncationNotice) -> bool {
        let seen = self.seen.entry(scope.to_string()).or_default();
        if !seen.insert(notice.key()) {
            return false;
        }
        self.pending.entry(scope.to_string()).or_default().push(notice);
        true
    }

    /// Drain the scope's notices in arrival order, clearing its dedup set
    pub fn drain(&mut self, scope: &str) -> Vec<TruncationNotice> {
        self.seen.remove(scope);
        self.pending.remove(scope).unwrap_or_default()
    }

    /// Drop everything buffered for a scope
    pub fn clear(&mut self, scope: &str) {
        self.seen.remove(scope);
        self.pending.remove(scope);
    }

    /// Whether a scope has anything buffered
    pub fn is_empty(&self, scope: &str) -> bool {
        self.pending.get(scope).is_none_or(|p| p.is_empty())
    }
}

/// Join drained notices into the single summary line shown in the trace
pub fn join_summary(notices: &[TruncationNotice]) -> String {
    let joined = notices
        .iter()
        .map(TruncationNotice::summary_fragment)
        .collect::<Vec<_>>()
        .join("; ");
    format!("Some files were truncated during parsing: {joined}")
}
