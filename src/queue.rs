//! Mailbox between ingestion and dispatch.
//!
//! The default ordering is a stack: the most recently queued item is pulled
//! first. The priority ordering serves higher priorities first and breaks ties
//! by submission order.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::Notify;

struct Entry<T> {
    priority: i32,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // BinaryHeap pops the greatest entry: highest priority, then lowest sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

enum Slots<T> {
    Stack(Vec<T>),
    Priority(BinaryHeap<Entry<T>>),
}

struct State<T> {
    slots: Slots<T>,
    sequence: u64,
}

/// Thread-safe dispatch queue with an async blocking pull
pub struct DispatchQueue<T> {
    state: Mutex<State<T>>,
    available: Notify,
}

impl<T> DispatchQueue<T> {
    /// Queue in stack order
    pub fn stack() -> Self {
        Self::with_slots(Slots::Stack(Vec::new()))
    }

    /// Queue in priority order
    pub fn priority() -> Self {
        Self::with_slots(Slots::Priority(BinaryHeap::new()))
    }

    /// Pick the ordering from the broker configuration
    pub fn new(priority_enabled: bool) -> Self {
        if priority_enabled {
            Self::priority()
        } else {
            Self::stack()
        }
    }

    fn with_slots(slots: Slots<T>) -> Self {
        Self {
            state: Mutex::new(State { slots, sequence: 0 }),
            available: Notify::new(),
        }
    }

    pub fn is_priority(&self) -> bool {
        matches!(self.state.lock().slots, Slots::Priority(_))
    }

    /// Queue an item. The priority is ignored in stack order.
    pub fn put(&self, item: T, priority: i32) {
        {
            let mut state = self.state.lock();
            let sequence = state.sequence;
            state.sequence += 1;
            match &mut state.slots {
                Slots::Stack(stack) => stack.push(item),
                Slots::Priority(heap) => heap.push(Entry {
                    priority,
                    sequence,
                    item,
                }),
            }
        }
        self.available.notify_one();
    }

    /// Remove the next item without waiting
    pub fn try_pull(&self) -> Option<T> {
        let mut state = self.state.lock();
        match &mut state.slots {
            Slots::Stack(stack) => stack.pop(),
            Slots::Priority(heap) => heap.pop().map(|entry| entry.item),
        }
    }

    /// Remove the next item, suspending the calling task while the queue is empty
    pub async fn pull(&self) -> T {
        loop {
            if let Some(item) = self.try_pull() {
                return item;
            }
            // A put between the check above and this await leaves a permit behind,
            // so the wakeup is not lost.
            self.available.notified().await;
        }
    }

    /// Point-in-time snapshot; may be stale as soon as it returns
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match &self.state.lock().slots {
            Slots::Stack(stack) => stack.len(),
            Slots::Priority(heap) => heap.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn drain<T>(queue: &DispatchQueue<T>) -> Vec<T> {
        std::iter::from_fn(|| queue.try_pull()).collect()
    }

    #[test]
    fn test_stack_order_is_lifo() {
        let queue = DispatchQueue::stack();
        for i in 1..=5 {
            queue.put(i, 4);
        }
        assert_eq!(drain(&queue), vec![5, 4, 3, 2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_priority_order() {
        let queue = DispatchQueue::priority();
        queue.put("low", 1);
        queue.put("high-first", 9);
        queue.put("default", 4);
        queue.put("high-second", 9);
        queue.put("negative", -3);
        assert_eq!(
            drain(&queue),
            vec!["high-first", "high-second", "default", "low", "negative"]
        );
    }

    #[test]
    fn test_priority_ties_keep_submission_order() {
        let queue = DispatchQueue::priority();
        for i in 0..100 {
            queue.put(i, 4);
        }
        assert_eq!(drain(&queue), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_no_loss_both_modes() {
        let mut rng = rand::thread_rng();
        for priority_enabled in [false, true] {
            let queue = DispatchQueue::new(priority_enabled);
            assert_eq!(queue.is_priority(), priority_enabled);
            let mut items: Vec<(u32, i32)> = (0..500).map(|i| (i, (i % 7) as i32)).collect();
            items.shuffle(&mut rng);
            for (item, priority) in &items {
                queue.put(*item, *priority);
            }
            assert_eq!(queue.len(), items.len());

            let mut pulled = drain(&queue);
            pulled.sort_unstable();
            assert_eq!(pulled, (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_pull_suspends_until_put() {
        let queue = DispatchQueue::stack();
        let mut pull = task::spawn(queue.pull());
        assert_pending!(pull.poll());
        assert_pending!(pull.poll());

        queue.put("late", 4);
        assert!(pull.is_woken());
        assert_ready_eq!(pull.poll(), "late");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_pulls_never_share_an_item() {
        let queue = Arc::new(DispatchQueue::stack());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                for _ in 0..25 {
                    taken.push(queue.pull().await);
                }
                taken
            }));
        }

        for i in 0..100 {
            queue.put(i, 4);
            if i % 10 == 0 {
                tokio::task::yield_now().await;
            }
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
