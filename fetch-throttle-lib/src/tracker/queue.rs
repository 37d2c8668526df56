use std::collections::VecDeque;

use crate::Priority;

/// One FIFO queue per throttled priority.
///
/// Items are handed out strictly by priority (high, then normal, then low)
/// and in insertion order within a priority.
#[derive(Debug)]
pub(crate) struct PendingQueues<T> {
    queues: [VecDeque<T>; 3],
}

impl<T> Default for PendingQueues<T> {
    fn default() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }
}

impl<T> PendingQueues<T> {
    const fn index(priority: Priority) -> usize {
        match priority {
            // Unthrottled work never waits; treat a stray one as most urgent
            Priority::High | Priority::Unthrottled => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    /// Append an item to the queue of its priority
    pub(crate) fn push(&mut self, priority: Priority, item: T) {
        debug_assert!(priority.is_throttled(), "unthrottled work is never queued");
        self.queues[Self::index(priority)].push_back(item);
    }

    /// Remove the head of the most urgent non-empty queue
    pub(crate) fn pop_next(&mut self) -> Option<(Priority, T)> {
        Priority::THROTTLED.into_iter().find_map(|priority| {
            self.queues[Self::index(priority)]
                .pop_front()
                .map(|item| (priority, item))
        })
    }

    /// Number of items waiting at `priority`
    pub(crate) fn len(&self, priority: Priority) -> usize {
        if priority.is_throttled() {
            self.queues[Self::index(priority)].len()
        } else {
            0
        }
    }

    /// Number of items waiting overall
    pub(crate) fn total(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}
