//! Priority queue of pending moderation actions.
//!
//! Blocks run before moderations, moderations before reports. Within one
//! kind the oldest message goes first, then the earliest enqueued.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use simplex_sdk::model::Message;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Block,
    Moderate,
    Report,
}

impl ActionKind {
    /// Lower runs first.
    pub fn rank(self) -> u8 {
        match self {
            ActionKind::Block => 0,
            ActionKind::Moderate => 1,
            ActionKind::Report => 2,
        }
    }
}

impl PartialOrd for ActionKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActionKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// A remediation intent for one message.
#[derive(Debug, Clone)]
pub struct ActionItem {
    pub kind: ActionKind,
    pub message: Message,
    /// Which rule matched, e.g. `*KEYWORD* 'spam'`.
    pub reason: String,
}

impl ActionItem {
    pub fn new(kind: ActionKind, message: Message, reason: impl Into<String>) -> Self {
        Self {
            kind,
            message,
            reason: reason.into(),
        }
    }
}

impl PartialEq for ActionItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ActionItem {}

impl PartialOrd for ActionItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActionItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.message.timestamp.cmp(&other.message.timestamp))
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Queued {
    item: ActionItem,
    seq: u64,
}

/// Shared between the classifying poll loop and the executing consumer.
#[derive(Default)]
pub struct ActionQueue {
    heap: Mutex<BinaryHeap<Reverse<Queued>>>,
    ready: Notify,
    next_seq: AtomicU64,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: ActionItem) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().push(Reverse(Queued { item, seq }));
        self.ready.notify_one();
    }

    /// Highest-priority item, if any, without waiting.
    pub fn try_pop(&self) -> Option<ActionItem> {
        self.heap.lock().pop().map(|Reverse(queued)| queued.item)
    }

    /// Wait for the highest-priority item.
    pub async fn pop(&self) -> ActionItem {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing::message_at;

    #[test]
    fn blocks_first_then_by_timestamp() {
        let queue = ActionQueue::new();
        queue.push(ActionItem::new(ActionKind::Report, message_at(1, 2), "r"));
        queue.push(ActionItem::new(ActionKind::Block, message_at(2, 1), "b1"));
        queue.push(ActionItem::new(ActionKind::Moderate, message_at(3, 3), "m"));
        queue.push(ActionItem::new(ActionKind::Block, message_at(4, 0), "b0"));

        let order: Vec<String> = std::iter::from_fn(|| queue.try_pop()).map(|a| a.reason).collect();
        assert_eq!(order, vec!["b0", "b1", "m", "r"]);
    }

    #[test]
    fn equal_priority_keeps_enqueue_order() {
        let queue = ActionQueue::new();
        for reason in ["first", "second", "third"] {
            queue.push(ActionItem::new(ActionKind::Report, message_at(1, 5), reason));
        }
        let order: Vec<String> = std::iter::from_fn(|| queue.try_pop()).map(|a| a.reason).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(ActionQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push(ActionItem::new(ActionKind::Moderate, message_at(9, 0), "late"));
        let item = tokio::time::timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
        assert_eq!(item.reason, "late");
        assert!(queue.is_empty());
    }
}
