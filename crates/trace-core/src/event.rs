//! Canonical event model (§3, §6 of the specification this crate implements).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Well-known payload keys preserved verbatim by the codec; anything else
/// is forward-compatible opaque data.
pub mod payload_keys {
    pub const TASK: &str = "task";
    pub const MESSAGE: &str = "message";
    pub const DECISION: &str = "decision";
    pub const MEMORY_ACCESS: &str = "memoryAccess";
    pub const COORDINATION: &str = "coordination";
    pub const ERROR: &str = "error";
    pub const PERFORMANCE: &str = "performance";
}

/// Closed event-type enumeration, wire values per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "AGENT_SPAWN")]
    AgentSpawn,
    #[serde(rename = "AGENT_DESTROY")]
    AgentDestroy,
    #[serde(rename = "TASK_START")]
    TaskStart,
    #[serde(rename = "TASK_COMPLETE")]
    TaskComplete,
    #[serde(rename = "TASK_FAIL")]
    TaskFail,
    #[serde(rename = "MESSAGE_SEND")]
    MessageSend,
    #[serde(rename = "MESSAGE_RECEIVE")]
    MessageReceive,
    #[serde(rename = "STATE_CHANGE")]
    StateChange,
    #[serde(rename = "COORDINATION_EVENT")]
    CoordinationEvent,
    #[serde(rename = "PERFORMANCE_METRIC")]
    PerformanceMetric,
}

impl EventType {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            EventType::AgentSpawn => "AGENT_SPAWN",
            EventType::AgentDestroy => "AGENT_DESTROY",
            EventType::TaskStart => "TASK_START",
            EventType::TaskComplete => "TASK_COMPLETE",
            EventType::TaskFail => "TASK_FAIL",
            EventType::MessageSend => "MESSAGE_SEND",
            EventType::MessageReceive => "MESSAGE_RECEIVE",
            EventType::StateChange => "STATE_CHANGE",
            EventType::CoordinationEvent => "COORDINATION_EVENT",
            EventType::PerformanceMetric => "PERFORMANCE_METRIC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Progress,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn is_critical(&self) -> bool {
        matches!(self, Severity::Critical)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Low
    }
}

/// Performance measurements attached to an event, all optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub duration_ms: Option<i64>,
    pub memory_bytes: Option<u64>,
    pub cpu_micros: Option<u64>,
    pub token_count: Option<u64>,
    pub net_latency_ms: Option<i64>,
}

/// Metadata attached to every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub source: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    /// Ordered set of tags; insertion order is preserved, duplicates dropped.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EventMetadata {
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn tag_set(&self) -> BTreeSet<&str> {
        self.tags.iter().map(|s| s.as_str()).collect()
    }
}

/// Immutable trace event record (spec §3 "Event").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Monotonic-capture timestamp, milliseconds since epoch.
    pub timestamp: i64,
    pub session_id: Uuid,
    pub agent_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub event_type: EventType,
    pub phase: Phase,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub performance: Option<PerformanceRecord>,
}

impl Event {
    pub fn severity(&self) -> Severity {
        self.metadata.severity
    }

    pub fn is_critical(&self) -> bool {
        self.metadata.severity.is_critical()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now)
    }

    /// Validates the structural invariants in spec §4.1: required fields present.
    pub fn validate(&self) -> CoreResult<()> {
        if self.agent_id.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(CoreError::InvalidEvent {
                message: "agent_id must be non-empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Unvalidated event input accepted by the collector before defaults are filled
/// in (spec §4.4, `collect(event_draft)`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDraft {
    pub id: Option<Uuid>,
    pub timestamp: Option<i64>,
    pub agent_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub event_type: Option<EventType>,
    pub phase: Option<Phase>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub performance: Option<PerformanceRecord>,
}

impl EventDraft {
    /// A draft is valid iff it has non-empty type, agent id (checked by the
    /// caller against the session id as well — see `trace-collector`).
    pub fn is_structurally_valid(&self) -> bool {
        self.event_type.is_some()
            && self
                .agent_id
                .as_deref()
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false)
    }
}
