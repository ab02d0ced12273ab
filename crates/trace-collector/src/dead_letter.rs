//! Bounded in-memory dead-letter ring for batches that exhaust re-queue
//! headroom (supplemented feature, SPEC_FULL.md §3 — grounded in the
//! teacher's `db::events::dead_letter_queue`).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use trace_core::Event;

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub events: Vec<Event>,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

pub struct DeadLetterQueue {
    capacity: usize,
    entries: VecDeque<DeadLetterEntry>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, events: Vec<Event>, error: impl Into<String>) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DeadLetterEntry {
            events,
            error: error.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &DeadLetterEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_entry_past_capacity() {
        let mut dlq = DeadLetterQueue::new(2);
        dlq.push(vec![], "first");
        dlq.push(vec![], "second");
        dlq.push(vec![], "third");

        assert_eq!(dlq.len(), 2);
        let errors: Vec<&str> = dlq.entries().map(|e| e.error.as_str()).collect();
        assert_eq!(errors, vec!["second", "third"]);
    }
}
