//! Per-client subscription and interest test (spec §4.7 "Fan-out").

use std::collections::HashSet;

use uuid::Uuid;

use trace_core::Event;

#[derive(Debug, Clone, Default)]
pub struct Subscription {
    pub session_ids: HashSet<Uuid>,
    pub agent_filter: Option<HashSet<String>>,
    pub authenticated: bool,
}

impl Subscription {
    /// `(session subscribed) ∧ (agent filter passes or absent)`. Permission
    /// checks are folded in by the caller, which also knows whether auth is
    /// required at all.
    pub fn is_interested(&self, event: &Event) -> bool {
        if !self.session_ids.contains(&event.session_id) {
            return false;
        }
        match (&self.agent_filter, &event.agent_id) {
            (Some(allowed), Some(agent_id)) => allowed.contains(agent_id),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trace_core::{EventMetadata, EventType, Phase};

    fn event(session_id: Uuid, agent_id: Option<&str>) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: 0,
            session_id,
            agent_id: agent_id.map(str::to_string),
            parent_id: None,
            correlation_id: None,
            event_type: EventType::TaskStart,
            phase: Phase::Start,
            payload: serde_json::Map::new(),
            metadata: EventMetadata::default(),
            performance: None,
        }
    }

    #[test]
    fn subscriber_without_the_session_is_never_interested() {
        let subscribed = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut sub = Subscription::default();
        sub.session_ids.insert(subscribed);

        assert!(!sub.is_interested(&event(other, Some("a1"))));
        assert!(sub.is_interested(&event(subscribed, Some("a1"))));
    }

    #[test]
    fn agent_filter_narrows_interest() {
        let session = Uuid::new_v4();
        let mut sub = Subscription::default();
        sub.session_ids.insert(session);
        sub.agent_filter = Some(["a1".to_string()].into_iter().collect());

        assert!(sub.is_interested(&event(session, Some("a1"))));
        assert!(!sub.is_interested(&event(session, Some("a2"))));
    }
}
