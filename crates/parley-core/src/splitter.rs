//! Derives the two presentation views from a conversation's message list:
//! the final-answer timeline and the task trace grouped by user turn.
//!
//! Recomputed in full on every message-state change; input sizes are
//! turn-bounded, so no incremental diffing is attempted.

use std::collections::{HashMap, HashSet};

use parley_proto::{ContentItem, EventKind, Message, Payload, Role, Step};
use serde::Serialize;

/// One trace record attributed to the user turn that triggered it.
/// Derived, never persisted or mutated independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMessage {
    pub kind: EventKind,
    pub content: Payload,
    /// Assistant message the record came from
    pub assistant_id: String,
    /// User message that triggered the turn
    pub related_user_id: String,
}

/// The two derived views
#[derive(Debug, Clone, Default)]
pub struct SplitView {
    /// Ordered user and assistant messages for primary display
    pub final_timeline: Vec<Message>,
    /// Trace records keyed by the triggering user message id.
    /// Turns that produced no trace content have no entry.
    pub task_groups: HashMap<String, Vec<TaskMessage>>,
}

/// Split a message list into the final timeline and grouped task trace.
pub fn split(messages: &[Message]) -> SplitView {
    let mut view = SplitView::default();
    // Truncation records are withheld per turn until that turn's `complete`
    // record releases them; unreleased ones are discarded at the end.
    let mut pending_truncations: HashMap<String, Vec<TaskMessage>> = HashMap::new();
    let mut truncation_seen: HashMap<String, HashSet<String>> = HashMap::new();
    let mut correlation_id: Option<String> = None;

    for message in messages {
        match message.role {
            Role::User => {
                view.final_timeline.push(message.clone());
                view.task_groups.insert(message.id.clone(), Vec::new());
                correlation_id = Some(message.id.clone());
            }
            Role::Assistant => {
                if message.has_renderable_content() {
                    view.final_timeline.push(message.clone());
                }
                let Some(correlation_id) = correlation_id.clone() else {
                    // No preceding user message (partial or corrupted
                    // history): trace items are dropped, not attached to a
                    // synthetic group.
                    continue;
                };
                for item in trace_items(message) {
                    if item.kind == EventKind::Truncation {
                        let seen = truncation_seen
                            .entry(correlation_id.clone())
                            .or_default();
                        if seen.insert(item.payload.display()) {
                            pending_truncations
                                .entry(correlation_id.clone())
                                .or_default()
                                .push(task_message(item, message, &correlation_id));
                        }
                        continue;
                    }
                    let group = view
                        .task_groups
                        .entry(correlation_id.clone())
                        .or_default();
                    if item.kind == EventKind::Complete {
                        group.extend(
                            pending_truncations.remove(&correlation_id).unwrap_or_default(),
                        );
                    }
                    group.push(task_message(item, message, &correlation_id));
                }
            }
        }
    }

    view.task_groups.retain(|_, items| !items.is_empty());
    view
}

/// Every content item of every step, then the step's thinking/code/output
/// sub-blocks, in message order
fn trace_items(message: &Message) -> impl Iterator<Item = &ContentItem> {
    message.steps.iter().flat_map(|step: &Step| {
        step.contents
            .iter()
            .chain(step.thinking.as_ref())
            .chain(step.code.as_ref())
            .chain(step.output.as_ref())
    })
}

fn task_message(item: &ContentItem, message: &Message, correlation_id: &str) -> TaskMessage {
    TaskMessage {
        kind: item.kind.clone(),
        content: item.payload.clone(),
        assistant_id: message.id.clone(),
        related_user_id: correlation_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant_with_items(items: Vec<ContentItem>) -> Message {
        let mut msg = Message::assistant_pending();
        msg.content = "answer".into();
        msg.is_complete = true;
        let mut step = Step::new("processing");
        step.contents = items;
        msg.steps.push(step);
        msg
    }

    fn item(kind: EventKind, text: &str) -> ContentItem {
        ContentItem::new(kind, text)
    }

    #[test]
    fn test_user_and_assistant_on_final_timeline() {
        let user = Message::user("question");
        let assistant = assistant_with_items(vec![]);
        let view = split(&[user.clone(), assistant.clone()]);
        assert_eq!(view.final_timeline.len(), 2);
        assert_eq!(view.final_timeline[0].id, user.id);
        assert_eq!(view.final_timeline[1].id, assistant.id);
    }

    #[test]
    fn test_incomplete_empty_assistant_excluded_from_timeline() {
        let user = Message::user("question");
        let pending = Message::assistant_pending();
        let view = split(&[user, pending]);
        assert_eq!(view.final_timeline.len(), 1);
    }

    #[test]
    fn test_items_grouped_under_triggering_user() {
        let user1 = Message::user("first");
        let reply1 = assistant_with_items(vec![item(EventKind::Execution, "run a")]);
        let user2 = Message::user("second");
        let reply2 = assistant_with_items(vec![item(EventKind::Execution, "run b")]);

        let view = split(&[user1.clone(), reply1, user2.clone(), reply2]);

        assert_eq!(view.task_groups.len(), 2);
        assert_eq!(view.task_groups[&user1.id].len(), 1);
        assert_eq!(
            view.task_groups[&user1.id][0].content.as_text(),
            Some("run a")
        );
        assert_eq!(
            view.task_groups[&user2.id][0].content.as_text(),
            Some("run b")
        );
    }

    #[test]
    fn test_every_item_lands_in_exactly_one_group() {
        let user1 = Message::user("first");
        let reply1 = assistant_with_items(vec![
            item(EventKind::Progress, "p"),
            item(EventKind::Execution, "e"),
        ]);
        let user2 = Message::user("second");
        let reply2 = assistant_with_items(vec![item(EventKind::MemorySearch, "m")]);

        let view = split(&[user1, reply1, user2, reply2]);
        let total: usize = view.task_groups.values().map(Vec::len).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_sub_blocks_become_task_messages() {
        let user = Message::user("q");
        let mut reply = assistant_with_items(vec![item(EventKind::Progress, "status")]);
        let step = &mut reply.steps[0];
        step.thinking = Some(item(EventKind::ModelOutput, "pondering"));
        step.code = Some(item(EventKind::Execution, "print(1)"));
        step.output = Some(item(EventKind::Execution, "1"));

        let view = split(&[user.clone(), reply]);
        let group = &view.task_groups[&user.id];
        assert_eq!(group.len(), 4);
        let texts: Vec<_> = group.iter().filter_map(|t| t.content.as_text()).collect();
        assert_eq!(texts, vec!["status", "pondering", "print(1)", "1"]);
    }

    #[test]
    fn test_empty_turn_pruned_from_groups() {
        let user = Message::user("q");
        let reply = assistant_with_items(vec![]);
        let view = split(&[user, reply]);
        assert!(view.task_groups.is_empty());
    }

    #[test]
    fn test_orphan_assistant_items_dropped() {
        let reply = assistant_with_items(vec![item(EventKind::Execution, "x")]);
        let view = split(&[reply]);
        // Renderable content still shows on the timeline, but no group forms
        assert_eq!(view.final_timeline.len(), 1);
        assert!(view.task_groups.is_empty());
    }

    #[test]
    fn test_truncation_without_complete_discarded() {
        let user = Message::user("q");
        let reply = assistant_with_items(vec![item(EventKind::Truncation, "a.pdf cut")]);
        let view = split(&[user, reply]);
        assert!(view.task_groups.is_empty());
    }

    #[test]
    fn test_truncation_released_by_complete() {
        let user = Message::user("q");
        let reply = assistant_with_items(vec![
            item(EventKind::Truncation, "a.pdf cut"),
            item(EventKind::Complete, "done"),
        ]);
        let view = split(&[user.clone(), reply]);
        let group = &view.task_groups[&user.id];
        assert_eq!(group.len(), 2);
        // Released truncation precedes the complete record
        assert_eq!(group[0].kind, EventKind::Truncation);
        assert_eq!(group[1].kind, EventKind::Complete);
    }

    #[test]
    fn test_truncation_deduplicated_within_turn() {
        let user = Message::user("q");
        let reply = assistant_with_items(vec![
            item(EventKind::Truncation, "a.pdf cut"),
            item(EventKind::Truncation, "a.pdf cut"),
            item(EventKind::Truncation, "b.txt cut"),
            item(EventKind::Complete, "done"),
        ]);
        let view = split(&[user.clone(), reply]);
        let truncations: Vec<_> = view.task_groups[&user.id]
            .iter()
            .filter(|t| t.kind == EventKind::Truncation)
            .collect();
        assert_eq!(truncations.len(), 2);
    }

    #[test]
    fn test_truncation_scope_does_not_leak_across_turns() {
        let user1 = Message::user("first");
        let reply1 = assistant_with_items(vec![item(EventKind::Truncation, "a.pdf cut")]);
        let user2 = Message::user("second");
        let reply2 = assistant_with_items(vec![item(EventKind::Complete, "done")]);

        let view = split(&[user1, reply1, user2.clone(), reply2]);
        // First turn's truncation never released; second turn only has its
        // own complete record.
        let group = &view.task_groups[&user2.id];
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].kind, EventKind::Complete);
    }

    #[test]
    fn test_task_messages_carry_both_ids() {
        let user = Message::user("q");
        let reply = assistant_with_items(vec![item(EventKind::Card, "card")]);
        let reply_id = reply.id.clone();
        let view = split(&[user.clone(), reply]);
        let task = &view.task_groups[&user.id][0];
        assert_eq!(task.assistant_id, reply_id);
        assert_eq!(task.related_user_id, user.id);
    }
}
