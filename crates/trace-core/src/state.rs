//! Derived system state (spec §3 "SystemState") and the delta shape used by
//! incremental snapshots (spec §4.5 "Incremental policy").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub last_result: Option<Value>,
    pub last_error: Option<String>,
    pub last_decision: Option<Value>,
    pub cpu_micros: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub last_duration_ms: Option<i64>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            status: AgentStatus::Idle,
            current_task: None,
            last_result: None,
            last_error: None,
            last_decision: None,
            cpu_micros: None,
            memory_bytes: None,
            last_duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    pub owner_agent: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: Value,
    pub written_at: i64,
    pub written_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationDirection {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationRecord {
    pub direction: CommunicationDirection,
    pub counterpart: Option<String>,
    pub timestamp: i64,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub allocated_to: Option<String>,
    pub last_sync_at: Option<i64>,
    pub attributes: HashMap<String, Value>,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            allocated_to: None,
            last_sync_at: None,
            attributes: HashMap::new(),
        }
    }
}

/// System state at a point in time (spec §3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub timestamp: i64,
    #[serde(default)]
    pub agents: HashMap<String, AgentState>,
    #[serde(default)]
    pub tasks: HashMap<String, TaskState>,
    #[serde(default)]
    pub memory: HashMap<String, MemoryEntry>,
    #[serde(default)]
    pub communications: HashMap<String, Vec<CommunicationRecord>>,
    #[serde(default)]
    pub resources: HashMap<String, ResourceState>,
}

impl SystemState {
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }
}

/// Added/updated/removed partition for one sub-map of the system state
/// (spec §4.5 "Delta partitions changes into {added, updated, removed}").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapDelta<T> {
    #[serde(default)]
    pub added: HashMap<String, T>,
    #[serde(default)]
    pub updated: HashMap<String, T>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl<T> MapDelta<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

/// Full delta between two system states, one `MapDelta` per sub-map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub agents: MapDelta<AgentState>,
    pub tasks: MapDelta<TaskState>,
    pub memory: MapDelta<MemoryEntry>,
    pub communications: MapDelta<Vec<CommunicationRecord>>,
    pub resources: MapDelta<ResourceState>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
            && self.tasks.is_empty()
            && self.memory.is_empty()
            && self.communications.is_empty()
            && self.resources.is_empty()
    }
}

fn diff_map<T: Clone + PartialEq>(
    before: &HashMap<String, T>,
    after: &HashMap<String, T>,
) -> MapDelta<T> {
    let mut delta = MapDelta::default();
    for (k, v) in after {
        match before.get(k) {
            None => {
                delta.added.insert(k.clone(), v.clone());
            }
            Some(prev) if prev != v => {
                delta.updated.insert(k.clone(), v.clone());
            }
            _ => {}
        }
    }
    for k in before.keys() {
        if !after.contains_key(k) {
            delta.removed.push(k.clone());
        }
    }
    delta
}

fn apply_map<T: Clone>(base: &mut HashMap<String, T>, delta: &MapDelta<T>) {
    for k in &delta.removed {
        base.remove(k);
    }
    for (k, v) in &delta.added {
        base.insert(k.clone(), v.clone());
    }
    for (k, v) in &delta.updated {
        base.insert(k.clone(), v.clone());
    }
}

impl StateDelta {
    /// Computes the delta such that `apply(diff(a, b), a) == b`.
    pub fn diff(before: &SystemState, after: &SystemState) -> Self {
        Self {
            agents: diff_map(&before.agents, &after.agents),
            tasks: diff_map(&before.tasks, &after.tasks),
            memory: diff_map(&before.memory, &after.memory),
            communications: diff_map(&before.communications, &after.communications),
            resources: diff_map(&before.resources, &after.resources),
        }
    }

    /// Applies this delta on top of a base state, producing the resulting state.
    pub fn apply(&self, base: &SystemState, at_timestamp: i64) -> SystemState {
        let mut out = base.clone();
        out.timestamp = at_timestamp;
        apply_map(&mut out.agents, &self.agents);
        apply_map(&mut out.tasks, &self.tasks);
        apply_map(&mut out.memory, &self.memory);
        apply_map(&mut out.communications, &self.communications);
        apply_map(&mut out.resources, &self.resources);
        out
    }
}
