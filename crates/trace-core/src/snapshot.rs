//! Snapshot envelope (spec §3 "Snapshot").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::StateDelta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotType {
    Full,
    Incremental,
    Tagged,
}

/// The persisted body of a snapshot: either a full state or a delta against
/// a named base snapshot (spec §4.5 "Incremental policy").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SnapshotBody {
    Full(crate::state::SystemState),
    Incremental {
        base_snapshot_id: Uuid,
        delta: StateDelta,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub session_id: Uuid,
    pub timestamp: i64,
    pub snapshot_type: SnapshotType,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub compressed: bool,
    pub size: usize,
    pub compressed_size: Option<usize>,
    /// First 16 hex chars of SHA-256 over the canonical uncompressed bytes.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn is_tagged(&self) -> bool {
        matches!(self.snapshot_type, SnapshotType::Tagged) || !self.tags.is_empty()
    }

    pub fn is_evictable(&self, now: DateTime<Utc>, max_retention: chrono::Duration) -> bool {
        if self.is_tagged() {
            return false;
        }
        now - self.created_at > max_retention
    }
}
