//! Streaming control message set (spec §6 "literal shapes").

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use trace_core::{Event, Session};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl From<TimeRange> for std::ops::Range<i64> {
    fn from(r: TimeRange) -> Self {
        r.start..r.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub current: usize,
    pub total: usize,
    pub is_last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_message_size: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub capabilities: Vec<String>,
    pub limits: Limits,
}

/// Client → server control messages (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeSession {
        session_id: Uuid,
    },
    RequestHistory {
        time_range: TimeRange,
    },
    TimeTravel {
        timestamp: i64,
    },
    FilterAgents {
        #[serde(default)]
        agent_ids: Vec<String>,
    },
    SetBreakpoint {
        trace_id: Uuid,
        #[serde(default)]
        condition: Option<String>,
    },
    RemoveBreakpoint {
        trace_id: Uuid,
    },
    Heartbeat {},
    Auth {
        token: String,
    },
}

/// Server → client control messages (spec §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection {
        client_id: Uuid,
        server_info: ServerInfo,
    },
    AuthResponse {
        authenticated: bool,
    },
    SessionInfo {
        session: Session,
    },
    InitialTraces {
        traces: Vec<Event>,
    },
    TraceEvent {
        data: Event,
    },
    SystemEvent {
        event: String,
        data: Value,
    },
    HistoricalData {
        time_range: TimeRange,
        traces: Vec<Event>,
        chunk_info: ChunkInfo,
        total: usize,
    },
    TimeTravelState {
        timestamp: i64,
        traces: Vec<Event>,
        total: usize,
    },
    Heartbeat {
        timestamp: i64,
        metrics: Value,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"type\":\"error\",\"code\":\"INTERNAL_ERROR\",\"message\":\"serialization failed\"}"
                .to_string()
        })
    }
}
