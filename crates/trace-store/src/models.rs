//! Diesel row models and their conversions to/from `trace-core` domain types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use trace_core::{
    Event, EventMetadata, EventType, PerformanceRecord, Phase, Session, SessionStatus, Severity,
};

use crate::error::{StoreError, StoreResult};
use crate::schema::{events, sessions, snapshots};

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = sessions)]
pub struct SessionRow {
    pub id: Uuid,
    pub name: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub agent_count: i32,
    pub event_count: i64,
    pub metadata: Value,
}

impl From<&Session> for SessionRow {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            start_time: s.start_time,
            end_time: s.end_time,
            status: session_status_str(s.status).to_string(),
            agent_count: s.agent_count as i32,
            event_count: s.event_count as i64,
            metadata: serde_json::to_value(&s.metadata).unwrap_or(Value::Null),
        }
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> StoreResult<Self> {
        let metadata: HashMap<String, Value> = serde_json::from_value(row.metadata)?;
        Ok(Session {
            id: row.id,
            name: row.name,
            start_time: row.start_time,
            end_time: row.end_time,
            status: parse_session_status(&row.status)?,
            agent_count: row.agent_count as u32,
            event_count: row.event_count as u64,
            metadata,
        })
    }
}

fn session_status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Completed => "completed",
        SessionStatus::Error => "error",
    }
}

fn parse_session_status(s: &str) -> StoreResult<SessionStatus> {
    match s {
        "active" => Ok(SessionStatus::Active),
        "completed" => Ok(SessionStatus::Completed),
        "error" => Ok(SessionStatus::Error),
        other => Err(StoreError::Serialization {
            message: format!("unknown session status {other}"),
        }),
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = events)]
pub struct EventRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub agent_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub timestamp: i64,
    pub event_type: String,
    pub phase: String,
    pub severity: String,
    pub payload: Value,
    pub metadata: Value,
    pub performance: Option<Value>,
}

impl From<&Event> for EventRow {
    fn from(e: &Event) -> Self {
        Self {
            id: e.id,
            session_id: e.session_id,
            agent_id: e.agent_id.clone(),
            parent_id: e.parent_id,
            correlation_id: e.correlation_id,
            timestamp: e.timestamp,
            event_type: e.event_type.as_wire_str().to_string(),
            phase: phase_str(e.phase).to_string(),
            severity: severity_str(e.metadata.severity).to_string(),
            payload: Value::Object(e.payload.clone()),
            metadata: serde_json::to_value(&e.metadata).unwrap_or(Value::Null),
            performance: e
                .performance
                .as_ref()
                .map(|p| serde_json::to_value(p).unwrap_or(Value::Null)),
        }
    }
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> StoreResult<Self> {
        let metadata: EventMetadata = serde_json::from_value(row.metadata)?;
        let payload = match row.payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let performance: Option<PerformanceRecord> = row
            .performance
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Event {
            id: row.id,
            timestamp: row.timestamp,
            session_id: row.session_id,
            agent_id: row.agent_id,
            parent_id: row.parent_id,
            correlation_id: row.correlation_id,
            event_type: parse_event_type(&row.event_type)?,
            phase: parse_phase(&row.phase)?,
            payload,
            metadata,
            performance,
        })
    }
}

fn phase_str(p: Phase) -> &'static str {
    match p {
        Phase::Start => "start",
        Phase::Progress => "progress",
        Phase::Complete => "complete",
        Phase::Error => "error",
    }
}

fn parse_phase(s: &str) -> StoreResult<Phase> {
    match s {
        "start" => Ok(Phase::Start),
        "progress" => Ok(Phase::Progress),
        "complete" => Ok(Phase::Complete),
        "error" => Ok(Phase::Error),
        other => Err(StoreError::Serialization {
            message: format!("unknown phase {other}"),
        }),
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

fn parse_event_type(s: &str) -> StoreResult<EventType> {
    match s {
        "AGENT_SPAWN" => Ok(EventType::AgentSpawn),
        "AGENT_DESTROY" => Ok(EventType::AgentDestroy),
        "TASK_START" => Ok(EventType::TaskStart),
        "TASK_COMPLETE" => Ok(EventType::TaskComplete),
        "TASK_FAIL" => Ok(EventType::TaskFail),
        "MESSAGE_SEND" => Ok(EventType::MessageSend),
        "MESSAGE_RECEIVE" => Ok(EventType::MessageReceive),
        "STATE_CHANGE" => Ok(EventType::StateChange),
        "COORDINATION_EVENT" => Ok(EventType::CoordinationEvent),
        "PERFORMANCE_METRIC" => Ok(EventType::PerformanceMetric),
        other => Err(StoreError::Serialization {
            message: format!("unknown event type {other}"),
        }),
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = snapshots)]
pub struct SnapshotRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub timestamp: i64,
    pub snapshot_type: String,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub base_snapshot_id: Option<Uuid>,
    pub compressed: bool,
    pub size: i64,
    pub compressed_size: Option<i64>,
    pub checksum: String,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}
