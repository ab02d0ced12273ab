//! Agent aggregate (spec §3 "Agent aggregate"): collector-owned, in-memory,
//! not authoritative. Mutated only by event application.

use std::collections::VecDeque;

use trace_core::{AgentStatus, Event, EventType};

/// Unified ring-buffer bound (spec §9 open question: the source's two
/// `updateAgentTrace` paths trimmed at `-500` and `-1000` respectively; this
/// port keeps a single bound, the larger of the two).
pub const DEFAULT_MAX_EVENTS_PER_AGENT: usize = 1000;

#[derive(Debug, Clone)]
pub struct AgentAggregate {
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub task_count: u64,
    pub fail_count: u64,
    pub error_rate: f64,
    pub end_time: Option<i64>,
    pub recent_events: VecDeque<Event>,
    max_events: usize,
}

impl AgentAggregate {
    pub fn new(max_events: usize) -> Self {
        Self {
            status: AgentStatus::Idle,
            current_task: None,
            task_count: 0,
            fail_count: 0,
            error_rate: 0.0,
            end_time: None,
            recent_events: VecDeque::new(),
            max_events: max_events.max(1),
        }
    }

    /// Applies one event per the state machine in spec §4.4, then
    /// tail-trims the ring to `max_events`.
    pub fn apply(&mut self, event: &Event) {
        match event.event_type {
            EventType::AgentSpawn => self.status = AgentStatus::Idle,
            EventType::TaskStart => {
                self.status = AgentStatus::Busy;
                self.current_task = event
                    .payload
                    .get("task_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| Some(event.id.to_string()));
            }
            EventType::TaskComplete => {
                self.status = AgentStatus::Idle;
                self.current_task = None;
                self.task_count += 1;
            }
            EventType::TaskFail => {
                self.status = AgentStatus::Error;
                self.fail_count += 1;
                let total = self.task_count + self.fail_count;
                self.error_rate = if total == 0 {
                    0.0
                } else {
                    self.fail_count as f64 / total as f64
                };
            }
            EventType::AgentDestroy => {
                self.status = AgentStatus::Terminated;
                self.end_time = Some(event.timestamp);
            }
            _ => {}
        }

        self.recent_events.push_back(event.clone());
        while self.recent_events.len() > self.max_events {
            self.recent_events.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use trace_core::{EventMetadata, Phase};
    use uuid::Uuid;

    fn event(event_type: EventType, task_id: Option<&str>) -> Event {
        let mut payload = Map::new();
        if let Some(t) = task_id {
            payload.insert("task_id".to_string(), json!(t));
        }
        Event {
            id: Uuid::new_v4(),
            timestamp: 1000,
            session_id: Uuid::new_v4(),
            agent_id: Some("a1".to_string()),
            parent_id: None,
            correlation_id: None,
            event_type,
            phase: Phase::Start,
            payload,
            metadata: EventMetadata::default(),
            performance: None,
        }
    }

    #[test]
    fn scenario_a_spawn_start_complete_leaves_idle_with_one_task() {
        let mut agg = AgentAggregate::new(DEFAULT_MAX_EVENTS_PER_AGENT);
        agg.apply(&event(EventType::AgentSpawn, None));
        agg.apply(&event(EventType::TaskStart, Some("t1")));
        assert_eq!(agg.status, AgentStatus::Busy);
        assert_eq!(agg.current_task.as_deref(), Some("t1"));

        agg.apply(&event(EventType::TaskComplete, Some("t1")));
        assert_eq!(agg.status, AgentStatus::Idle);
        assert_eq!(agg.current_task, None);
        assert_eq!(agg.task_count, 1);
    }

    #[test]
    fn ring_buffer_trims_to_bound() {
        let mut agg = AgentAggregate::new(3);
        for _ in 0..10 {
            agg.apply(&event(EventType::PerformanceMetric, None));
        }
        assert_eq!(agg.recent_events.len(), 3);
    }

    #[test]
    fn task_fail_updates_error_rate() {
        let mut agg = AgentAggregate::new(10);
        agg.apply(&event(EventType::TaskStart, Some("t1")));
        agg.apply(&event(EventType::TaskFail, Some("t1")));
        assert_eq!(agg.status, AgentStatus::Error);
        assert_eq!(agg.fail_count, 1);
        assert_eq!(agg.error_rate, 1.0);
    }
}
