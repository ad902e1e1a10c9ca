use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use tessera_core::Timestamp;

#[derive(Debug, Clone)]
struct TimeoutEntry<E> {
    deadline: Timestamp,
    entry_id: u64,
    event: E,
}

impl<E> PartialEq for TimeoutEntry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.entry_id == other.entry_id
    }
}

impl<E> Eq for TimeoutEntry<E> {}

impl<E> PartialOrd for TimeoutEntry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for TimeoutEntry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.entry_id).cmp(&(other.deadline, other.entry_id))
    }
}

/// Min-heap of scheduled events.
///
/// Entries with the same deadline come out in insertion order. Cancelling
/// only flags the entry; flagged entries are dropped once they reach the
/// head of the heap.
#[derive(Debug, Clone)]
pub struct Timeouts<E> {
    heap: BinaryHeap<Reverse<TimeoutEntry<E>>>,
    pending: HashSet<u64>,
    cancelled: HashSet<u64>,
    next_id: u64,
}

impl<E> Default for Timeouts<E> {
    fn default() -> Self {
        Timeouts {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        }
    }
}

impl<E: Clone> Timeouts<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the heap, cancelled ones included
    pub fn size(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedule `event` at `deadline` and return its entry id
    pub fn add_timeout(&mut self, deadline: Timestamp, event: E) -> u64 {
        let entry_id = self.next_id;
        self.next_id += 1;
        self.pending.insert(entry_id);
        self.heap.push(Reverse(TimeoutEntry {
            deadline,
            entry_id,
            event,
        }));
        entry_id
    }

    pub fn cancel_timeout(&mut self, entry_id: u64) {
        if self.pending.contains(&entry_id) {
            self.cancelled.insert(entry_id);
        }
    }

    /// Drop cancelled entries sitting at the head of the heap
    pub fn pop_earliest_cancelled_timeouts(&mut self) {
        while let Some(Reverse(head)) = self.heap.peek() {
            let entry_id = head.entry_id;
            if !self.cancelled.remove(&entry_id) {
                break;
            }
            self.pending.remove(&entry_id);
            self.heap.pop();
        }
    }

    /// Deadline and event of the head entry, without removing it
    pub fn get_earliest_timeout(&self) -> Option<(Timestamp, &E)> {
        self.heap
            .peek()
            .map(|Reverse(entry)| (entry.deadline, &entry.event))
    }

    pub fn pop_timeout(&mut self) -> Option<(Timestamp, E)> {
        self.heap.pop().map(|Reverse(entry)| {
            self.pending.remove(&entry.entry_id);
            self.cancelled.remove(&entry.entry_id);
            (entry.deadline, entry.event)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_in_deadline_order() {
        let mut timeouts = Timeouts::new();
        for secs in [5, 1, 9, 3, 3, 7] {
            timeouts.add_timeout(Timestamp::from_secs(secs), secs);
        }
        assert_eq!(timeouts.size(), 6);

        let mut previous = Timestamp::EPOCH;
        while let Some((deadline, event)) = timeouts.pop_timeout() {
            assert!(deadline >= previous);
            assert_eq!(deadline, Timestamp::from_secs(event));
            previous = deadline;
        }
        assert!(timeouts.is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut timeouts = Timeouts::new();
        let at = Timestamp::from_secs(10);
        timeouts.add_timeout(at, "first");
        timeouts.add_timeout(at, "second");
        timeouts.add_timeout(at, "third");

        assert_eq!(timeouts.pop_timeout(), Some((at, "first")));
        assert_eq!(timeouts.pop_timeout(), Some((at, "second")));
        assert_eq!(timeouts.pop_timeout(), Some((at, "third")));
    }

    #[test]
    fn test_cancel_is_lazy() {
        let mut timeouts = Timeouts::new();
        let a = timeouts.add_timeout(Timestamp::from_secs(1), "a");
        let b = timeouts.add_timeout(Timestamp::from_secs(2), "b");
        timeouts.add_timeout(Timestamp::from_secs(3), "c");

        timeouts.cancel_timeout(b);
        assert_eq!(timeouts.size(), 3);
        timeouts.pop_earliest_cancelled_timeouts();
        assert_eq!(timeouts.size(), 3);

        timeouts.cancel_timeout(a);
        assert_eq!(timeouts.get_earliest_timeout().map(|(_, e)| *e), Some("a"));
        timeouts.pop_earliest_cancelled_timeouts();
        assert_eq!(timeouts.size(), 1);
        assert_eq!(
            timeouts.get_earliest_timeout(),
            Some((Timestamp::from_secs(3), &"c"))
        );
    }

    #[test]
    fn test_cancel_unknown_or_popped_entry_is_ignored() {
        let mut timeouts: Timeouts<&str> = Timeouts::new();
        timeouts.cancel_timeout(42);
        let first = timeouts.add_timeout(Timestamp::from_secs(1), "a");
        assert_eq!(first, 0);
        timeouts.pop_earliest_cancelled_timeouts();
        assert_eq!(timeouts.size(), 1);

        timeouts.pop_timeout();
        timeouts.cancel_timeout(first);
        assert!(timeouts.cancelled.is_empty());
    }
}
