//! Session record (spec §3 "Session").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: SessionStatus,
    pub agent_count: u32,
    pub event_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Session {
    pub fn new(id: Uuid, name: impl Into<String>, start_time: i64) -> Self {
        Self {
            id,
            name: name.into(),
            start_time,
            end_time: None,
            status: SessionStatus::Active,
            agent_count: 0,
            event_count: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn close(&mut self, end_time: i64, status: SessionStatus) {
        self.end_time = Some(end_time);
        self.status = status;
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.start_time).unwrap_or_else(Utc::now)
    }
}
