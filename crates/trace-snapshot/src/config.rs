//! Recognized configuration keys from spec §6 ("Snapshots: ...").

#[derive(Debug, Clone)]
pub struct SnapshotManagerConfig {
    /// Bytes above which the uncompressed body is gzipped before storage.
    pub compression_threshold_bytes: usize,
    /// Age past which a non-tagged snapshot becomes evictable.
    pub max_retention_ms: i64,
    /// Per-session cap; excess non-tagged snapshots are evicted oldest-first.
    pub max_snapshots_per_session: usize,
    /// Whether `create_snapshot` may choose an incremental body at all.
    pub incremental_enabled: bool,
    /// Verify checksum on every `get_snapshot`/`reconstruct` read.
    pub checksum_validation: bool,
    /// Periodic interval for `start_automatic`.
    pub automatic_interval_ms: u64,
}

impl Default for SnapshotManagerConfig {
    fn default() -> Self {
        Self {
            compression_threshold_bytes: 1024,
            max_retention_ms: 24 * 60 * 60 * 1000,
            max_snapshots_per_session: 1000,
            incremental_enabled: true,
            checksum_validation: true,
            automatic_interval_ms: 30_000,
        }
    }
}
