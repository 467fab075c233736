//! Priority send queue
//!
//! Strict ordering `High > Medium > Low`, first in first out within a tier.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// Priority tier of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug)]
struct Entry<T> {
    priority: Priority,
    order: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.order == other.order
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Max-heap: higher priority first, then the lower insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Queue of items waiting for transmission
#[derive(Debug)]
pub struct SendQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    counter: u64,
}

impl<T> Default for SendQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SendQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            counter: 0,
        }
    }

    pub fn push(&mut self, priority: Priority, item: T) {
        let order = self.counter;
        self.counter = self.counter.wrapping_add(1);
        self.heap.push(Entry {
            priority,
            order,
            item,
        });
    }

    /// Remove the next item to transmit
    pub fn pop(&mut self) -> Option<(Priority, T)> {
        self.heap.pop().map(|entry| (entry.priority, entry.item))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queued items in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter().map(|entry| &entry.item)
    }

    /// Remove every queued item
    pub fn drain(&mut self) -> Vec<T> {
        self.heap.drain().map(|entry| entry.item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_before_medium_before_low() {
        let mut queue = SendQueue::new();
        queue.push(Priority::Medium, "medium");
        queue.push(Priority::Low, "low");
        queue.push(Priority::High, "high");
        assert_eq!(queue.pop(), Some((Priority::High, "high")));
        assert_eq!(queue.pop(), Some((Priority::Medium, "medium")));
        assert_eq!(queue.pop(), Some((Priority::Low, "low")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut queue = SendQueue::new();
        for i in 0..10 {
            queue.push(Priority::Medium, i);
        }
        queue.push(Priority::High, 100);
        assert_eq!(queue.len(), 11);
        assert_eq!(queue.pop().map(|(_, item)| item), Some(100));
        let order: Vec<_> = std::iter::from_fn(|| queue.pop().map(|(_, item)| item)).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain() {
        let mut queue = SendQueue::new();
        queue.push(Priority::Low, 1);
        queue.push(Priority::High, 2);
        assert_eq!(queue.iter().count(), 2);
        let mut drained = queue.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(queue.is_empty());
    }
}
