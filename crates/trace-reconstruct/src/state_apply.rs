//! Applies one event to a [`SystemState`] in place (spec §4.6
//! "State-application rules").
//!
//! The wire [`EventType`] enum is the authoritative event classification,
//! but the application rules are written in terms of looser categories
//! (`agent_method`, `communication`, `task_execution`, `memory_access`,
//! `coordination`, `decision_point`, `performance`) that don't map
//! one-to-one onto it. The mapping used here: `StateChange` carries the
//! generic `agent_method` phase transition; `TaskStart/Complete/Fail` drive
//! `task_execution`; `MessageSend/MessageReceive` are the two
//! `communication` directions; `CoordinationEvent` is `coordination`;
//! `PerformanceMetric` is `performance`. `memory_access` and
//! `decision_point` are payload-keyed rather than event-type-keyed (design
//! note §9's well-known-key list), so they're checked on every event
//! regardless of type.

use serde_json::Value;

use trace_core::{
    AgentState, AgentStatus, CommunicationDirection, CommunicationRecord, Event, EventType,
    MemoryEntry, Phase, ResourceState, SystemState, TaskState, TaskStatus,
};

pub fn apply_event(state: &mut SystemState, event: &Event) {
    let agent_id = event.agent_id.clone().unwrap_or_default();

    if !agent_id.is_empty() {
        state.agents.entry(agent_id.clone()).or_default();
    }

    match event.event_type {
        EventType::AgentSpawn => {
            if !agent_id.is_empty() {
                let agent = state.agents.entry(agent_id.clone()).or_default();
                agent.status = AgentStatus::Idle;
            }
        }
        EventType::AgentDestroy => {
            if let Some(agent) = state.agents.get_mut(&agent_id) {
                agent.status = AgentStatus::Terminated;
            }
        }
        EventType::TaskStart => apply_task_start(state, &agent_id, event),
        EventType::TaskComplete => apply_task_complete(state, &agent_id, event),
        EventType::TaskFail => apply_task_fail(state, &agent_id, event),
        EventType::MessageSend => apply_communication(
            state,
            &agent_id,
            event,
            CommunicationDirection::Outbound,
        ),
        EventType::MessageReceive => apply_communication(
            state,
            &agent_id,
            event,
            CommunicationDirection::Inbound,
        ),
        EventType::StateChange => apply_agent_method(state, &agent_id, event),
        EventType::CoordinationEvent => apply_coordination(state, &agent_id, event),
        EventType::PerformanceMetric => apply_performance(state, &agent_id, event),
    }

    apply_decision_point(state, &agent_id, event);
    apply_memory_access(state, &agent_id, event);

    state.timestamp = event.timestamp;
}

fn task_id_of(event: &Event) -> Option<String> {
    if let Some(Value::String(id)) = event.payload.get("task_id") {
        return Some(id.clone());
    }
    event
        .payload
        .get(trace_core::payload_keys::TASK)
        .and_then(|v| v.get("task_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn apply_task_start(state: &mut SystemState, agent_id: &str, event: &Event) {
    let Some(task_id) = task_id_of(event) else {
        return;
    };
    state.tasks.insert(
        task_id.clone(),
        TaskState {
            status: TaskStatus::Running,
            owner_agent: Some(agent_id.to_string()),
            started_at: Some(event.timestamp),
            finished_at: None,
            result: None,
        },
    );
    if !agent_id.is_empty() {
        let agent = state.agents.entry(agent_id.to_string()).or_default();
        agent.status = AgentStatus::Busy;
        agent.current_task = Some(task_id);
    }
}

fn apply_task_complete(state: &mut SystemState, agent_id: &str, event: &Event) {
    let result = event.payload.get("result").cloned();
    if let Some(task_id) = task_id_of(event) {
        let task = state.tasks.entry(task_id).or_insert_with(|| TaskState {
            status: TaskStatus::Pending,
            owner_agent: Some(agent_id.to_string()),
            started_at: None,
            finished_at: None,
            result: None,
        });
        task.status = TaskStatus::Completed;
        task.finished_at = Some(event.timestamp);
        task.result = result.clone();
    }
    if !agent_id.is_empty() {
        let agent = state.agents.entry(agent_id.to_string()).or_default();
        agent.status = AgentStatus::Idle;
        agent.current_task = None;
        agent.last_result = result;
    }
}

fn apply_task_fail(state: &mut SystemState, agent_id: &str, event: &Event) {
    let error = event
        .payload
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(task_id) = task_id_of(event) {
        let task = state.tasks.entry(task_id).or_insert_with(|| TaskState {
            status: TaskStatus::Pending,
            owner_agent: Some(agent_id.to_string()),
            started_at: None,
            finished_at: None,
            result: None,
        });
        task.status = TaskStatus::Failed;
        task.finished_at = Some(event.timestamp);
        task.result = event.payload.get("error").cloned();
    }
    if !agent_id.is_empty() {
        let agent = state.agents.entry(agent_id.to_string()).or_default();
        agent.status = AgentStatus::Error;
        agent.current_task = None;
        agent.last_error = error;
    }
}

fn apply_communication(
    state: &mut SystemState,
    agent_id: &str,
    event: &Event,
    direction: CommunicationDirection,
) {
    if agent_id.is_empty() {
        return;
    }
    let payload = event
        .payload
        .get(trace_core::payload_keys::MESSAGE)
        .cloned()
        .unwrap_or_else(|| Value::Object(event.payload.clone()));
    let counterpart = event
        .payload
        .get(trace_core::payload_keys::MESSAGE)
        .and_then(|m| m.get("to").or_else(|| m.get("from")))
        .and_then(Value::as_str)
        .map(str::to_string);

    state
        .communications
        .entry(agent_id.to_string())
        .or_default()
        .push(CommunicationRecord {
            direction,
            counterpart,
            timestamp: event.timestamp,
            payload,
        });
}

fn apply_agent_method(state: &mut SystemState, agent_id: &str, event: &Event) {
    if agent_id.is_empty() {
        return;
    }
    let agent = state.agents.entry(agent_id.to_string()).or_default();
    match event.phase {
        Phase::Start => agent.status = AgentStatus::Busy,
        Phase::Progress => {}
        Phase::Complete => {
            agent.status = AgentStatus::Idle;
            if let Some(result) = event.payload.get("result") {
                agent.last_result = Some(result.clone());
            }
        }
        Phase::Error => {
            agent.status = AgentStatus::Error;
            if let Some(err) = event.payload.get("error").and_then(Value::as_str) {
                agent.last_error = Some(err.to_string());
            }
        }
    }
}

fn apply_coordination(state: &mut SystemState, agent_id: &str, event: &Event) {
    let coordination = event.payload.get(trace_core::payload_keys::COORDINATION);
    let resource_id = coordination
        .and_then(|c| c.get("resource_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| agent_id.to_string());
    if resource_id.is_empty() {
        return;
    }

    let allocated_to = coordination
        .and_then(|c| c.get("allocated_to"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| Some(agent_id.to_string()).filter(|a| !a.is_empty()));

    let resource = state.resources.entry(resource_id).or_insert_with(ResourceState::default);
    resource.last_sync_at = Some(event.timestamp);
    if allocated_to.is_some() {
        resource.allocated_to = allocated_to;
    }
    if let Some(Value::Object(map)) = coordination {
        for (k, v) in map {
            if k != "resource_id" && k != "allocated_to" {
                resource.attributes.insert(k.clone(), v.clone());
            }
        }
    }
}

fn apply_performance(state: &mut SystemState, agent_id: &str, event: &Event) {
    if agent_id.is_empty() {
        return;
    }
    let agent = state.agents.entry(agent_id.to_string()).or_insert_with(AgentState::default);
    if let Some(perf) = &event.performance {
        if perf.cpu_micros.is_some() {
            agent.cpu_micros = perf.cpu_micros;
        }
        if perf.memory_bytes.is_some() {
            agent.memory_bytes = perf.memory_bytes;
        }
        if perf.duration_ms.is_some() {
            agent.last_duration_ms = perf.duration_ms;
        }
    }
}

fn apply_decision_point(state: &mut SystemState, agent_id: &str, event: &Event) {
    if agent_id.is_empty() {
        return;
    }
    if let Some(decision) = event.payload.get(trace_core::payload_keys::DECISION) {
        let agent = state.agents.entry(agent_id.to_string()).or_default();
        agent.last_decision = Some(decision.clone());
    }
}

fn apply_memory_access(state: &mut SystemState, agent_id: &str, event: &Event) {
    let Some(access) = event.payload.get(trace_core::payload_keys::MEMORY_ACCESS) else {
        return;
    };
    let Some(key) = access.get("key").and_then(Value::as_str) else {
        return;
    };
    match access.get("operation").and_then(Value::as_str) {
        Some("write") => {
            let value = access.get("value").cloned().unwrap_or(Value::Null);
            state.memory.insert(
                key.to_string(),
                MemoryEntry {
                    value,
                    written_at: event.timestamp,
                    written_by: (!agent_id.is_empty()).then(|| agent_id.to_string()),
                },
            );
        }
        Some("delete") => {
            state.memory.remove(key);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trace_core::{EventMetadata, PerformanceRecord};
    use uuid::Uuid;

    fn base_event(event_type: EventType, phase: Phase, payload: serde_json::Map<String, Value>) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: 1000,
            session_id: Uuid::new_v4(),
            agent_id: Some("a1".to_string()),
            parent_id: None,
            correlation_id: None,
            event_type,
            phase,
            payload,
            metadata: EventMetadata::default(),
            performance: None,
        }
    }

    #[test]
    fn task_lifecycle_mirrors_agent_current_task() {
        let mut state = SystemState::empty(0);
        let mut payload = serde_json::Map::new();
        payload.insert("task_id".to_string(), json!("t1"));
        apply_event(&mut state, &base_event(EventType::TaskStart, Phase::Start, payload));

        assert_eq!(state.agents["a1"].status, AgentStatus::Busy);
        assert_eq!(state.agents["a1"].current_task.as_deref(), Some("t1"));
        assert_eq!(state.tasks["t1"].status, TaskStatus::Running);

        let mut complete_payload = serde_json::Map::new();
        complete_payload.insert("task_id".to_string(), json!("t1"));
        let mut complete = base_event(EventType::TaskComplete, Phase::Complete, complete_payload);
        complete.timestamp = 2000;
        apply_event(&mut state, &complete);

        assert_eq!(state.agents["a1"].status, AgentStatus::Idle);
        assert!(state.agents["a1"].current_task.is_none());
        assert_eq!(state.tasks["t1"].status, TaskStatus::Completed);
        assert_eq!(state.timestamp, 2000);
    }

    #[test]
    fn memory_write_then_delete() {
        let mut state = SystemState::empty(0);
        let mut write_payload = serde_json::Map::new();
        write_payload.insert(
            trace_core::payload_keys::MEMORY_ACCESS.to_string(),
            json!({"operation": "write", "key": "k1", "value": "v1"}),
        );
        apply_event(
            &mut state,
            &base_event(EventType::StateChange, Phase::Progress, write_payload),
        );
        assert_eq!(state.memory["k1"].value, json!("v1"));

        let mut delete_payload = serde_json::Map::new();
        delete_payload.insert(
            trace_core::payload_keys::MEMORY_ACCESS.to_string(),
            json!({"operation": "delete", "key": "k1"}),
        );
        apply_event(
            &mut state,
            &base_event(EventType::StateChange, Phase::Progress, delete_payload),
        );
        assert!(!state.memory.contains_key("k1"));
    }

    #[test]
    fn performance_metric_updates_samples() {
        let mut state = SystemState::empty(0);
        let mut event = base_event(EventType::PerformanceMetric, Phase::Progress, serde_json::Map::new());
        event.performance = Some(PerformanceRecord {
            cpu_micros: Some(500),
            memory_bytes: Some(1024),
            duration_ms: Some(42),
            ..Default::default()
        });
        apply_event(&mut state, &event);

        let agent = &state.agents["a1"];
        assert_eq!(agent.cpu_micros, Some(500));
        assert_eq!(agent.memory_bytes, Some(1024));
        assert_eq!(agent.last_duration_ms, Some(42));
    }

    #[test]
    fn unknown_agent_method_phase_still_advances_timestamp() {
        let mut state = SystemState::empty(0);
        let mut event = base_event(EventType::AgentSpawn, Phase::Start, serde_json::Map::new());
        event.agent_id = None;
        event.timestamp = 555;
        apply_event(&mut state, &event);
        assert_eq!(state.timestamp, 555);
    }
}
