//! Merge chat messages and tool calls into one display order.
//!
//! Within a run the order is logical: the user message, then the run's tool
//! calls, then the assistant answer, whatever order their events arrived
//! in. Across runs, and for items with no run, the order is chronological.
//!
//! A pairwise comparator that switches between those two rules is not
//! transitive, so [`merge`] builds one total key instead. Each run's items
//! are first put in logical order and given an effective timestamp: the
//! running maximum of the real timestamps along that order. Sorting every
//! item by `(effective, sort_order, timestamp, id)` then keeps each run in
//! logical order and places runs chronologically. An assistant message
//! created before a tool started is pushed after that tool instead of
//! jumping ahead of it.

use std::collections::HashMap;

use fiche_core::{ChatMessage, RunId, Role, ToolCall};

/// Position of an item kind in a run's logical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimelineKind {
    /// The user's message.
    UserMessage = 0,
    /// A tool call made by the run.
    ToolCall = 1,
    /// The assistant's answer.
    AssistantMessage = 2,
}

impl TimelineKind {
    /// Tie-break rank.
    pub const fn sort_order(self) -> u8 {
        self as u8
    }
}

/// A borrowed item of the merged timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineItem<'a> {
    /// A chat message.
    Message(&'a ChatMessage),
    /// A tool call.
    Tool(&'a ToolCall),
}

/// One entry of the merged timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineEvent<'a> {
    /// Message id or call id.
    pub id: &'a str,
    /// Message creation time or call start time.
    pub timestamp: Option<u64>,
    /// Item kind.
    pub kind: TimelineKind,
    /// Owning run, or [`RunId::UNASSIGNED`].
    pub run_id: RunId,
    /// The item itself.
    pub item: TimelineItem<'a>,
}

impl TimelineEvent<'_> {
    /// Tie-break rank of the item kind.
    pub const fn sort_order(&self) -> u8 {
        self.kind.sort_order()
    }

    /// Missing timestamps sort last.
    fn time_key(&self) -> u64 {
        self.timestamp.unwrap_or(u64::MAX)
    }
}

fn project_message(message: &ChatMessage) -> TimelineEvent<'_> {
    TimelineEvent {
        id: message.id.as_str(),
        timestamp: message.timestamp,
        kind: match message.role {
            Role::User => TimelineKind::UserMessage,
            Role::Assistant => TimelineKind::AssistantMessage,
        },
        run_id: message.run().unwrap_or(RunId::UNASSIGNED),
        item: TimelineItem::Message(message),
    }
}

fn project_tool(call: &ToolCall) -> TimelineEvent<'_> {
    TimelineEvent {
        id: call.call_id.as_str(),
        timestamp: call.progress.started_at,
        kind: TimelineKind::ToolCall,
        run_id: call.run_id,
        item: TimelineItem::Tool(call),
    }
}

/// Merge messages and tool calls into display order.
///
/// Pure and deterministic: the result depends only on the items, not on
/// the order they are supplied in.
pub fn merge<'a>(
    messages: &'a [ChatMessage],
    tools: impl IntoIterator<Item = &'a ToolCall>,
) -> Vec<TimelineEvent<'a>> {
    let events: Vec<TimelineEvent<'a>> = messages
        .iter()
        .map(project_message)
        .chain(tools.into_iter().map(project_tool))
        .collect();

    let effective = effective_times(&events);
    let mut keyed: Vec<(u64, TimelineEvent<'a>)> = effective.into_iter().zip(events).collect();
    keyed.sort_by(|(eff_a, a), (eff_b, b)| {
        eff_a
            .cmp(eff_b)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.time_key().cmp(&b.time_key()))
            .then_with(|| a.id.cmp(b.id))
    });
    keyed.into_iter().map(|(_, event)| event).collect()
}

/// Effective timestamp of each event, index-aligned with `events`.
fn effective_times(events: &[TimelineEvent<'_>]) -> Vec<u64> {
    let mut effective: Vec<u64> = events.iter().map(TimelineEvent::time_key).collect();

    let mut by_run: HashMap<RunId, Vec<usize>> = HashMap::new();
    for (idx, event) in events.iter().enumerate() {
        if event.run_id.is_assigned() {
            by_run.entry(event.run_id).or_default().push(idx);
        }
    }

    for indices in by_run.values_mut() {
        indices.sort_by(|&a, &b| {
            let (a, b) = (&events[a], &events[b]);
            a.kind
                .cmp(&b.kind)
                .then_with(|| a.time_key().cmp(&b.time_key()))
                .then_with(|| a.id.cmp(b.id))
        });
        let mut high_water = 0;
        for &idx in indices.iter() {
            high_water = high_water.max(effective[idx]);
            effective[idx] = high_water;
        }
    }
    effective
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fiche_core::{MessageStatus, ToolResult, ToolStatus};

    fn user(id: &str, ts: Option<u64>, run: u64) -> ChatMessage {
        ChatMessage::user(id.into(), "question", ts, Some(RunId::new(run)))
    }

    fn assistant(id: &str, ts: Option<u64>, run: u64) -> ChatMessage {
        let mut m = ChatMessage::assistant_placeholder(id.into(), ts, Some(RunId::new(run)));
        m.status = Some(MessageStatus::Final);
        m
    }

    fn tool(id: &str, started_at: Option<u64>, run: u64) -> ToolCall {
        ToolCall::new(id.into(), "web_search", RunId::new(run), started_at, ToolResult::Generic(None))
    }

    fn ids<'a>(events: &[TimelineEvent<'a>]) -> Vec<&'a str> {
        events.iter().map(|e| e.id).collect()
    }

    #[test]
    fn run_42_logical_order() {
        let messages = vec![user("u1", Some(1000), 42), assistant("a1", Some(1005), 42)];
        let mut call = tool("c1", Some(1010), 42);
        assert!(call.progress.finish(ToolStatus::Completed, Some(1200), Some(190)));

        let events = merge(&messages, [&call]);
        assert_eq!(ids(&events), vec!["u1", "c1", "a1"]);
        assert_eq!(events[1].sort_order(), 1);
    }

    #[test]
    fn assistant_created_before_tool_stays_after_it() {
        let messages = vec![user("u", Some(100), 1), assistant("a", Some(120), 1)];
        let mut call = tool("t", Some(150), 1);
        assert!(call.progress.finish(ToolStatus::Completed, Some(500), None));
        assert_eq!(ids(&merge(&messages, [&call])), vec!["u", "t", "a"]);
    }

    #[test]
    fn unrelated_runs_are_chronological() {
        let messages = vec![
            user("u1", Some(100), 1),
            user("u2", Some(150), 2),
            assistant("a1", Some(300), 1),
            assistant("a2", Some(250), 2),
        ];
        let tools = [tool("t1", Some(200), 1), tool("t2", Some(180), 2)];
        assert_eq!(
            ids(&merge(&messages, tools.iter())),
            vec!["u1", "u2", "t2", "t1", "a2", "a1"]
        );
    }

    #[test]
    fn items_without_run_use_time_then_kind() {
        let messages = vec![
            ChatMessage::user("u".into(), "hi", Some(10), None),
            ChatMessage::assistant_placeholder("a".into(), Some(10), None),
        ];
        let tools = [tool("t", Some(10), 0)];
        assert_eq!(ids(&merge(&messages, tools.iter())), vec!["u", "t", "a"]);
    }

    #[test]
    fn missing_timestamps_sort_last() {
        let messages = vec![
            ChatMessage::user("late".into(), "?", None, None),
            ChatMessage::user("early".into(), "?", Some(5), None),
        ];
        assert_eq!(ids(&merge(&messages, [])), vec!["early", "late"]);
    }

    #[test]
    fn missing_timestamp_inside_run_pulls_rest_of_run_last() {
        let messages = vec![user("u", Some(10), 1), assistant("a", Some(30), 1), user("x", Some(20), 2)];
        let tools = [tool("t", None, 1)];
        assert_eq!(ids(&merge(&messages, tools.iter())), vec!["u", "x", "t", "a"]);
    }

    #[test]
    fn equal_keys_fall_back_to_id() {
        let messages = vec![user("b", Some(1), 0), user("a", Some(1), 0)];
        assert_eq!(ids(&merge(&messages, [])), vec!["a", "b"]);
    }

    #[test]
    fn empty_input() {
        assert!(merge(&[], []).is_empty());
    }

    #[test]
    fn items_borrow_their_source() {
        let messages = vec![user("u", Some(1), 1)];
        let tools = [tool("t", Some(2), 1)];
        let events = merge(&messages, tools.iter());
        assert!(matches!(events[0].item, TimelineItem::Message(m) if m.id.as_str() == "u"));
        assert!(matches!(events[1].item, TimelineItem::Tool(t) if t.call_id.as_str() == "t"));
    }

    // ── property tests ─────────────────────────────────────────────────

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Item {
            Message(ChatMessage),
            Tool(ToolCall),
        }

        fn arb_item() -> impl Strategy<Value = Item> {
            (0u8..3, 0u64..4, proptest::option::weighted(0.9, 0u64..50)).prop_map(|(kind, run, ts)| {
                let id = format!("{kind}-{run}-{}", ts.map_or(-1, |t| i64::try_from(t).unwrap_or(0)));
                match kind {
                    0 => Item::Message(ChatMessage::user(id.into(), "q", ts, Some(RunId::new(run)))),
                    1 => Item::Tool(ToolCall::new(id.into(), "grep", RunId::new(run), ts, ToolResult::Generic(None))),
                    _ => Item::Message(ChatMessage::assistant_placeholder(id.into(), ts, Some(RunId::new(run)))),
                }
            })
        }

        fn arb_items() -> impl Strategy<Value = Vec<Item>> {
            proptest::collection::vec(arb_item(), 0..24).prop_map(|mut items| {
                // ids must be unique
                let mut seen = std::collections::HashSet::new();
                items.retain(|item| {
                    let id = match item {
                        Item::Message(m) => m.id.to_string(),
                        Item::Tool(t) => t.call_id.to_string(),
                    };
                    seen.insert(id)
                });
                items
            })
        }

        fn split(items: &[Item]) -> (Vec<ChatMessage>, Vec<ToolCall>) {
            let mut messages = Vec::new();
            let mut tools = Vec::new();
            for item in items {
                match item {
                    Item::Message(m) => messages.push(m.clone()),
                    Item::Tool(t) => tools.push(t.clone()),
                }
            }
            (messages, tools)
        }

        fn merged_ids(items: &[Item]) -> Vec<String> {
            let (messages, tools) = split(items);
            merge(&messages, tools.iter()).iter().map(|e| e.id.to_owned()).collect()
        }

        proptest! {
            #[test]
            fn merge_is_idempotent(items in arb_items()) {
                prop_assert_eq!(merged_ids(&items), merged_ids(&items));
            }

            #[test]
            fn merge_ignores_input_order(
                (items, shuffled) in arb_items().prop_flat_map(|items| {
                    let shuffled = Just(items.clone()).prop_shuffle();
                    (Just(items), shuffled)
                })
            ) {
                prop_assert_eq!(merged_ids(&items), merged_ids(&shuffled));
            }

            #[test]
            fn each_run_keeps_logical_order(items in arb_items()) {
                let (messages, tools) = split(&items);
                let events = merge(&messages, tools.iter());
                let mut last: HashMap<RunId, (TimelineKind, u64)> = HashMap::new();
                for event in events.iter().filter(|e| e.run_id.is_assigned()) {
                    let key = (event.kind, event.timestamp.unwrap_or(u64::MAX));
                    if let Some(prev) = last.get(&event.run_id) {
                        prop_assert!(*prev <= key, "run {} out of order", event.run_id);
                    }
                    let _ = last.insert(event.run_id, key);
                }
            }

            #[test]
            fn merge_keeps_every_item(items in arb_items()) {
                prop_assert_eq!(merged_ids(&items).len(), items.len());
            }
        }
    }
}
