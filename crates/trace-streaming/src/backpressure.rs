//! Per-client outbound backpressure (spec §4.7 "Per-client backpressure"):
//! a bounded queue over the socket's buffered bytes with two watermarks.

use std::collections::VecDeque;
use std::sync::Arc;

use trace_core::Severity;

use crate::config::BackpressureConfig;

struct QueuedMessage {
    body: Arc<str>,
    severity: Severity,
}

/// One client's outbound queue. The writer task drains this; `collector`/
/// broadcaster code only ever pushes into it, never touches the socket.
pub struct OutboundQueue {
    config: BackpressureConfig,
    queue: VecDeque<QueuedMessage>,
    buffered_bytes: usize,
    blocked: bool,
    pub dropped_count: u64,
}

impl OutboundQueue {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            buffered_bytes: 0,
            blocked: false,
            dropped_count: 0,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Enqueues an already-serialized message body. Critical-severity
    /// messages are never dropped; they displace the oldest non-critical
    /// queued message instead if the queue is full. Returns `false` if the
    /// message itself was dropped.
    pub fn push(&mut self, body: Arc<str>, severity: Severity) -> bool {
        let bytes = body.len();

        if self.queue.len() >= self.config.max_queue_size {
            if severity.is_critical() {
                if let Some(victim) = self.lowest_severity_index() {
                    let removed = self.queue.remove(victim).unwrap();
                    self.buffered_bytes -= removed.body.len();
                } else {
                    return false;
                }
            } else if self.config.drop_oldest {
                if let Some(removed) = self.queue.pop_front() {
                    self.buffered_bytes -= removed.body.len();
                }
                self.dropped_count += 1;
                trace_core::metrics::STREAMING_MESSAGES_DROPPED_TOTAL.inc();
            } else {
                self.dropped_count += 1;
                trace_core::metrics::STREAMING_MESSAGES_DROPPED_TOTAL.inc();
                return false;
            }
        }

        self.buffered_bytes += bytes;
        self.queue.push_back(QueuedMessage { body, severity });
        self.update_blocked();
        true
    }

    pub fn pop(&mut self) -> Option<Arc<str>> {
        let popped = self.queue.pop_front();
        if let Some(msg) = &popped {
            self.buffered_bytes -= msg.body.len();
        }
        self.update_blocked();
        popped.map(|m| m.body)
    }

    fn lowest_severity_index(&self) -> Option<usize> {
        self.queue
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.severity.is_critical())
            .min_by_key(|(_, m)| m.severity)
            .map(|(idx, _)| idx)
    }

    fn update_blocked(&mut self) {
        if self.buffered_bytes > self.config.high_water {
            self.blocked = true;
        } else if self.buffered_bytes < self.config.low_water {
            self.blocked = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: u32) -> Arc<str> {
        Arc::from(format!("{{\"n\":{n}}}"))
    }

    #[test]
    fn blocked_flips_on_high_water_and_clears_on_low_water() {
        let config = BackpressureConfig {
            high_water: 10,
            low_water: 5,
            max_queue_size: 100,
            drop_oldest: true,
        };
        let mut queue = OutboundQueue::new(config);
        for n in 0..20 {
            queue.push(msg(n), Severity::Low);
        }
        assert!(queue.is_blocked());

        while queue.buffered_bytes() >= 5 {
            queue.pop();
        }
        assert!(!queue.is_blocked());
    }

    #[test]
    fn full_queue_drops_oldest_low_severity_message() {
        let config = BackpressureConfig {
            high_water: 1_000_000,
            low_water: 0,
            max_queue_size: 2,
            drop_oldest: true,
        };
        let mut queue = OutboundQueue::new(config);
        queue.push(msg(1), Severity::Low);
        queue.push(msg(2), Severity::Low);
        queue.push(msg(3), Severity::Low);

        assert_eq!(queue.dropped_count, 1);
        assert_eq!(queue.queue.len(), 2);
    }

    #[test]
    fn critical_messages_are_never_dropped() {
        let config = BackpressureConfig {
            high_water: 1_000_000,
            low_water: 0,
            max_queue_size: 1,
            drop_oldest: true,
        };
        let mut queue = OutboundQueue::new(config);
        queue.push(msg(1), Severity::Low);
        let admitted = queue.push(msg(2), Severity::Critical);

        assert!(admitted);
        assert_eq!(queue.queue.len(), 1);
        assert_eq!(queue.queue[0].severity, Severity::Critical);
    }
}
