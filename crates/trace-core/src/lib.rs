//! Canonical data model and wire codec for the tracing backbone.
//!
//! This crate is the leaf dependency of every other crate in the workspace:
//! it owns the event/session/snapshot/system-state shapes and the
//! deterministic serialization used both for persistence and for the wire.

pub mod codec;
pub mod error;
pub mod event;
pub mod metrics;
pub mod session;
pub mod snapshot;
pub mod state;

pub use codec::{
    canonical_bytes, checksum_hex16, decode, decode_frame, encode, encode_frame, gzip_compress,
    gzip_decompress, Checksummed, DecodedFrame,
};
pub use error::{CoreError, CoreResult};
pub use event::{
    payload_keys, Event, EventDraft, EventMetadata, EventType, Phase, PerformanceRecord, Severity,
};
pub use session::{Session, SessionStatus};
pub use snapshot::{Snapshot, SnapshotBody, SnapshotType};
pub use state::{
    AgentState, AgentStatus, CommunicationDirection, CommunicationRecord, MapDelta, MemoryEntry,
    ResourceState, StateDelta, SystemState, TaskState, TaskStatus,
};
