//! Snapshot manager (spec §4.5 "Snapshot Manager"): full/incremental
//! creation, compression, retention, search, and automatic scheduling.
//!
//! Grounded on the teacher's `db::events::snapshots::EnhancedSnapshotManager`
//! (compression-aware create/restore, periodic cleanup) generalized to the
//! full/incremental delta model this system uses instead of a flat
//! aggregate-version snapshot cadence.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use trace_core::{
    canonical_bytes, checksum_hex16, gzip_compress, gzip_decompress, CoreError, Snapshot,
    SnapshotBody, SnapshotType, StateDelta, SystemState,
};
use trace_store::{PersistentStore, SnapshotMeta};

use crate::config::SnapshotManagerConfig;
use crate::error::{SnapshotError, SnapshotResult};

/// Supplies the current system state for a session, invoked by the
/// periodic automatic-snapshot loop. Implemented by whatever composes the
/// reconstructor in the running process.
#[async_trait]
pub trait StateProvider: Send + Sync {
    async fn current_state(&self, session_id: Uuid) -> SystemState;
}

#[derive(Debug, Clone, Default)]
pub struct CreateSnapshotOptions {
    pub tags: Vec<String>,
    pub description: Option<String>,
    /// `None` lets the manager decide full vs incremental per policy.
    pub snapshot_type: Option<SnapshotType>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub session_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub time_range: Option<Range<i64>>,
    pub snapshot_type: Option<SnapshotType>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CompareResult {
    pub delta: StateDelta,
    pub summary: String,
}

struct FullCacheEntry {
    snapshot_id: Uuid,
    state: SystemState,
}

/// Owns snapshot records exclusively (spec §3 "Ownership").
pub struct SnapshotManager {
    store: Arc<dyn PersistentStore>,
    config: SnapshotManagerConfig,
    /// Per-session cache of the most recent full (or tagged) snapshot's
    /// state, used to decide and compute incremental deltas without
    /// recursively reconstructing a chain on every `create_snapshot` call.
    latest_full: DashMap<Uuid, FullCacheEntry>,
    automatic_tasks: DashMap<Uuid, tokio::task::JoinHandle<()>>,
}

impl SnapshotManager {
    pub fn new(store: Arc<dyn PersistentStore>, config: SnapshotManagerConfig) -> Self {
        Self {
            store,
            config,
            latest_full: DashMap::new(),
            automatic_tasks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SnapshotManagerConfig {
        &self.config
    }

    fn decide_body(&self, session_id: Uuid, state: &SystemState) -> SnapshotResult<(SnapshotType, SnapshotBody)> {
        if self.config.incremental_enabled {
            if let Some(entry) = self.latest_full.get(&session_id) {
                let delta = StateDelta::diff(&entry.state, state);
                let delta_bytes = canonical_bytes(&delta)?;
                let full_bytes = canonical_bytes(state)?;
                if !full_bytes.is_empty() && (delta_bytes.len() as f64) < 0.3 * (full_bytes.len() as f64) {
                    return Ok((
                        SnapshotType::Incremental,
                        SnapshotBody::Incremental {
                            base_snapshot_id: entry.snapshot_id,
                            delta,
                        },
                    ));
                }
            }
        }
        Ok((SnapshotType::Full, SnapshotBody::Full(state.clone())))
    }

    /// Decides full vs incremental, compresses when large, computes the
    /// checksum over the uncompressed canonical bytes, and persists.
    pub async fn create_snapshot(
        &self,
        session_id: Uuid,
        state: SystemState,
        opts: CreateSnapshotOptions,
    ) -> SnapshotResult<Uuid> {
        let id = Uuid::new_v4();

        let (snapshot_type, body) = match opts.snapshot_type {
            Some(SnapshotType::Full) => (SnapshotType::Full, SnapshotBody::Full(state.clone())),
            Some(SnapshotType::Tagged) => (SnapshotType::Tagged, SnapshotBody::Full(state.clone())),
            Some(SnapshotType::Incremental) => {
                let entry = self
                    .latest_full
                    .get(&session_id)
                    .ok_or(SnapshotError::MissingBase { id })?;
                let delta = StateDelta::diff(&entry.state, &state);
                (
                    SnapshotType::Incremental,
                    SnapshotBody::Incremental {
                        base_snapshot_id: entry.snapshot_id,
                        delta,
                    },
                )
            }
            None => self.decide_body(session_id, &state)?,
        };

        let canonical = canonical_bytes(&body)?;
        let checksum = checksum_hex16(&canonical);
        let size = canonical.len();

        let (stored_bytes, compressed, compressed_size) =
            if size > self.config.compression_threshold_bytes {
                let gz = gzip_compress(&canonical)?;
                let gz_len = gz.len();
                (gz, true, Some(gz_len))
            } else {
                (canonical, false, None)
            };

        let snapshot = Snapshot {
            id,
            session_id,
            timestamp: state.timestamp,
            snapshot_type,
            tags: opts.tags,
            description: opts.description,
            compressed,
            size,
            compressed_size,
            checksum,
            created_at: Utc::now(),
            expires_at: None,
        };

        let base_snapshot_id = match &body {
            SnapshotBody::Incremental { base_snapshot_id, .. } => Some(*base_snapshot_id),
            SnapshotBody::Full(_) => None,
        };

        self.store
            .store_snapshot(&snapshot, base_snapshot_id, &stored_bytes)
            .await?;

        if matches!(snapshot_type, SnapshotType::Full | SnapshotType::Tagged) {
            self.latest_full.insert(
                session_id,
                FullCacheEntry {
                    snapshot_id: id,
                    state,
                },
            );
        }

        trace_core::metrics::SNAPSHOTS_CREATED_TOTAL.inc();
        debug!(snapshot_id = %id, %session_id, ?snapshot_type, size, compressed, "created snapshot");
        Ok(id)
    }

    /// Fetches and decodes a snapshot's stored body, verifying its checksum
    /// when `checksum_validation` is on.
    pub async fn get_snapshot(&self, id: Uuid) -> SnapshotResult<(Snapshot, SnapshotBody)> {
        let (snapshot, _base_id, bytes) = self
            .store
            .get_snapshot(id)
            .await?
            .ok_or(SnapshotError::NotFound { id })?;

        let canonical = if snapshot.compressed {
            gzip_decompress(&bytes)?
        } else {
            bytes
        };

        if self.config.checksum_validation {
            let actual = checksum_hex16(&canonical);
            if actual != snapshot.checksum {
                return Err(SnapshotError::ChecksumMismatch {
                    expected: snapshot.checksum.clone(),
                    actual,
                });
            }
        }

        let body: SnapshotBody =
            serde_json::from_slice(&canonical).map_err(CoreError::from)?;
        Ok((snapshot, body))
    }

    /// Latest snapshot with `timestamp <= t`.
    pub async fn find_nearest(&self, session_id: Uuid, t: i64) -> SnapshotResult<Option<Snapshot>> {
        let metas = self.store.list_snapshots(Some(session_id)).await?;
        Ok(metas
            .into_iter()
            .filter(|m| m.timestamp <= t)
            .max_by_key(|m| m.timestamp)
            .map(meta_to_snapshot))
    }

    pub async fn search(&self, filters: SearchFilters) -> SnapshotResult<Vec<Snapshot>> {
        let metas = self.store.list_snapshots(filters.session_id).await?;
        let mut matched: Vec<Snapshot> = metas
            .into_iter()
            .filter(|m| {
                filters
                    .time_range
                    .as_ref()
                    .map(|r| r.contains(&m.timestamp))
                    .unwrap_or(true)
            })
            .filter(|m| {
                filters
                    .snapshot_type
                    .map(|t| m.snapshot_type == t)
                    .unwrap_or(true)
            })
            .filter(|m| {
                filters.tags.is_empty() || filters.tags.iter().all(|tag| m.tags.contains(tag))
            })
            .map(meta_to_snapshot)
            .collect();

        matched.sort_by_key(|s| s.timestamp);
        if filters.descending {
            matched.reverse();
        }

        let offset = filters.offset.unwrap_or(0);
        let matched: Vec<Snapshot> = matched.into_iter().skip(offset).collect();
        Ok(match filters.limit {
            Some(limit) => matched.into_iter().take(limit).collect(),
            None => matched,
        })
    }

    /// For an incremental snapshot, recursively resolves its base chain and
    /// applies each delta in order; a full snapshot's state is returned
    /// directly. Guards against cyclic `base_snapshot_id` chains.
    pub async fn reconstruct(&self, snapshot_id: Uuid) -> SnapshotResult<SystemState> {
        const MAX_CHAIN_DEPTH: usize = 64;
        let mut chain: Vec<StateDelta> = Vec::new();
        let mut current = snapshot_id;
        let mut target_timestamp = None;

        loop {
            let (snapshot, body) = self.get_snapshot(current).await?;
            if target_timestamp.is_none() {
                target_timestamp = Some(snapshot.timestamp);
            }
            match body {
                SnapshotBody::Full(mut state) => {
                    for delta in chain.into_iter().rev() {
                        state = apply_delta_state(&state, &delta);
                    }
                    state.timestamp = target_timestamp.unwrap();
                    return Ok(state);
                }
                SnapshotBody::Incremental { base_snapshot_id, delta } => {
                    chain.push(delta);
                    if chain.len() > MAX_CHAIN_DEPTH {
                        return Err(SnapshotError::ChainTooDeep {
                            id: snapshot_id,
                            limit: MAX_CHAIN_DEPTH,
                        });
                    }
                    current = base_snapshot_id;
                }
            }
        }
    }

    pub async fn compare(&self, id1: Uuid, id2: Uuid) -> SnapshotResult<CompareResult> {
        let state1 = self.reconstruct(id1).await?;
        let state2 = self.reconstruct(id2).await?;
        let delta = StateDelta::diff(&state1, &state2);
        let summary = format!(
            "agents: +{}/~{}/-{}, tasks: +{}/~{}/-{}, memory: +{}/~{}/-{}",
            delta.agents.added.len(),
            delta.agents.updated.len(),
            delta.agents.removed.len(),
            delta.tasks.added.len(),
            delta.tasks.updated.len(),
            delta.tasks.removed.len(),
            delta.memory.added.len(),
            delta.memory.updated.len(),
            delta.memory.removed.len(),
        );
        Ok(CompareResult { delta, summary })
    }

    pub async fn delete_snapshot(&self, id: Uuid) -> SnapshotResult<()> {
        self.store.delete_snapshot(id).await?;
        Ok(())
    }

    /// Evicts non-tagged snapshots older than `max_retention_ms`, then
    /// trims any session still over `max_snapshots_per_session`, oldest
    /// non-tagged first (spec §4.5 "Retention").
    pub async fn sweep_retention(&self, session_id: Uuid) -> SnapshotResult<u64> {
        let now = Utc::now();
        let mut metas = self.store.list_snapshots(Some(session_id)).await?;
        metas.sort_by_key(|m| m.timestamp);

        let mut evicted = 0u64;
        let mut kept = Vec::new();
        for meta in metas {
            let is_tagged = meta.snapshot_type == trace_core::SnapshotType::Tagged || !meta.tags.is_empty();
            let age_ms = now.signed_duration_since(meta.created_at).num_milliseconds();
            if !is_tagged && age_ms > self.config.max_retention_ms {
                self.store.delete_snapshot(meta.id).await?;
                evicted += 1;
            } else {
                kept.push(meta);
            }
        }

        if kept.len() > self.config.max_snapshots_per_session {
            let overflow = kept.len() - self.config.max_snapshots_per_session;
            let mut removed_so_far = 0;
            for meta in &kept {
                if removed_so_far >= overflow {
                    break;
                }
                let is_tagged = meta.snapshot_type == trace_core::SnapshotType::Tagged || !meta.tags.is_empty();
                if is_tagged {
                    continue;
                }
                self.store.delete_snapshot(meta.id).await?;
                evicted += 1;
                removed_so_far += 1;
            }
        }

        if evicted > 0 {
            info!(%session_id, evicted, "snapshot retention sweep evicted snapshots");
        }
        Ok(evicted)
    }

    /// Spawns a periodic background task that creates a snapshot of the
    /// session every `automatic_interval_ms`. Overwrites any prior task for
    /// the same session.
    pub fn start_automatic(
        self: &Arc<Self>,
        session_id: Uuid,
        provider: Arc<dyn StateProvider>,
    ) {
        self.stop_automatic(session_id);
        let manager = Arc::clone(self);
        let interval_ms = manager.config.automatic_interval_ms;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let state = provider.current_state(session_id).await;
                if let Err(e) = manager
                    .create_snapshot(session_id, state, CreateSnapshotOptions::default())
                    .await
                {
                    warn!(%session_id, error = %e, "automatic snapshot failed");
                }
            }
        });
        self.automatic_tasks.insert(session_id, handle);
    }

    pub fn stop_automatic(&self, session_id: Uuid) {
        if let Some((_, handle)) = self.automatic_tasks.remove(&session_id) {
            handle.abort();
        }
    }
}

fn meta_to_snapshot(meta: SnapshotMeta) -> Snapshot {
    Snapshot {
        id: meta.id,
        session_id: meta.session_id,
        timestamp: meta.timestamp,
        snapshot_type: meta.snapshot_type,
        tags: meta.tags,
        description: meta.description,
        compressed: meta.compressed,
        size: meta.size as usize,
        compressed_size: meta.compressed_size.map(|s| s as usize),
        checksum: meta.checksum,
        created_at: meta.created_at,
        expires_at: meta.expires_at,
    }
}

fn apply_delta_state(base: &SystemState, delta: &StateDelta) -> SystemState {
    delta.apply(base, base.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use trace_core::{AgentState, AgentStatus};

    #[derive(Default)]
    struct InMemoryStore {
        snapshots: Mutex<Vec<(Snapshot, Option<Uuid>, Vec<u8>)>>,
    }

    #[async_trait]
    impl PersistentStore for InMemoryStore {
        async fn create_session(
            &self,
            _name: &str,
            _metadata: std::collections::HashMap<String, serde_json::Value>,
        ) -> trace_store::StoreResult<Uuid> {
            Ok(Uuid::new_v4())
        }

        async fn get_session(&self, _id: Uuid) -> trace_store::StoreResult<Option<trace_core::Session>> {
            Ok(None)
        }

        async fn update_session(&self, _session: &trace_core::Session) -> trace_store::StoreResult<()> {
            Ok(())
        }

        async fn upsert_session(&self, _session: &trace_core::Session) -> trace_store::StoreResult<()> {
            Ok(())
        }

        async fn store_batch(&self, _batch: &[trace_core::Event]) -> trace_store::StoreResult<()> {
            Ok(())
        }

        async fn get_trace(&self, _id: Uuid) -> trace_store::StoreResult<Option<trace_core::Event>> {
            Ok(None)
        }

        async fn get_traces_by_session(
            &self,
            _session_id: Uuid,
            _query: trace_store::TraceQuery,
        ) -> trace_store::StoreResult<Vec<trace_core::Event>> {
            Ok(vec![])
        }

        async fn get_traces_by_agent(
            &self,
            _agent_id: &str,
            _query: trace_store::TraceQuery,
        ) -> trace_store::StoreResult<Vec<trace_core::Event>> {
            Ok(vec![])
        }

        async fn get_traces_by_time_range(
            &self,
            _range: Range<i64>,
            _agent_ids: Option<Vec<String>>,
        ) -> trace_store::StoreResult<Vec<trace_core::Event>> {
            Ok(vec![])
        }

        async fn store_snapshot(
            &self,
            snapshot: &Snapshot,
            base_snapshot_id: Option<Uuid>,
            bytes: &[u8],
        ) -> trace_store::StoreResult<()> {
            self.snapshots
                .lock()
                .unwrap()
                .push((snapshot.clone(), base_snapshot_id, bytes.to_vec()));
            Ok(())
        }

        async fn get_snapshot(
            &self,
            id: Uuid,
        ) -> trace_store::StoreResult<Option<(Snapshot, Option<Uuid>, Vec<u8>)>> {
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .find(|(s, _, _)| s.id == id)
                .cloned())
        }

        async fn delete_snapshot(&self, id: Uuid) -> trace_store::StoreResult<()> {
            self.snapshots.lock().unwrap().retain(|(s, _, _)| s.id != id);
            Ok(())
        }

        async fn list_snapshots(&self, session_id: Option<Uuid>) -> trace_store::StoreResult<Vec<SnapshotMeta>> {
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, _, _)| session_id.map(|sid| sid == s.session_id).unwrap_or(true))
                .map(|(s, base, _)| SnapshotMeta {
                    id: s.id,
                    session_id: s.session_id,
                    timestamp: s.timestamp,
                    snapshot_type: s.snapshot_type,
                    tags: s.tags.clone(),
                    description: s.description.clone(),
                    base_snapshot_id: *base,
                    compressed: s.compressed,
                    size: s.size as u64,
                    compressed_size: s.compressed_size.map(|v| v as u64),
                    checksum: s.checksum.clone(),
                    created_at: s.created_at,
                    expires_at: s.expires_at,
                })
                .collect())
        }

        async fn stats(&self) -> trace_store::StoreResult<trace_store::StoreStats> {
            Ok(trace_store::StoreStats::default())
        }

        async fn sweep_retention(&self) -> trace_store::StoreResult<u64> {
            Ok(0)
        }
    }

    fn state_with_agent(ts: i64, agent: &str, status: AgentStatus) -> SystemState {
        let mut state = SystemState::empty(ts);
        state.agents.insert(
            agent.to_string(),
            AgentState {
                status,
                ..Default::default()
            },
        );
        state
    }

    #[tokio::test]
    async fn first_snapshot_in_a_session_is_always_full() {
        let store = Arc::new(InMemoryStore::default());
        let manager = SnapshotManager::new(store, SnapshotManagerConfig::default());
        let session_id = Uuid::new_v4();

        let id = manager
            .create_snapshot(
                session_id,
                state_with_agent(1000, "a1", AgentStatus::Idle),
                CreateSnapshotOptions::default(),
            )
            .await
            .unwrap();

        let (snapshot, body) = manager.get_snapshot(id).await.unwrap();
        assert_eq!(snapshot.snapshot_type, SnapshotType::Full);
        assert!(matches!(body, SnapshotBody::Full(_)));
    }

    #[tokio::test]
    async fn small_delta_after_a_full_snapshot_goes_incremental() {
        let store = Arc::new(InMemoryStore::default());
        let manager = SnapshotManager::new(store, SnapshotManagerConfig::default());
        let session_id = Uuid::new_v4();

        manager
            .create_snapshot(
                session_id,
                state_with_agent(1000, "a1", AgentStatus::Idle),
                CreateSnapshotOptions::default(),
            )
            .await
            .unwrap();

        let second_id = manager
            .create_snapshot(
                session_id,
                state_with_agent(2000, "a1", AgentStatus::Busy),
                CreateSnapshotOptions::default(),
            )
            .await
            .unwrap();

        let (snapshot, _) = manager.get_snapshot(second_id).await.unwrap();
        assert_eq!(snapshot.snapshot_type, SnapshotType::Incremental);
    }

    #[tokio::test]
    async fn reconstruct_resolves_an_incremental_chain() {
        let store = Arc::new(InMemoryStore::default());
        let manager = SnapshotManager::new(store, SnapshotManagerConfig::default());
        let session_id = Uuid::new_v4();

        manager
            .create_snapshot(
                session_id,
                state_with_agent(1000, "a1", AgentStatus::Idle),
                CreateSnapshotOptions::default(),
            )
            .await
            .unwrap();

        let second_id = manager
            .create_snapshot(
                session_id,
                state_with_agent(2000, "a1", AgentStatus::Busy),
                CreateSnapshotOptions::default(),
            )
            .await
            .unwrap();

        let reconstructed = manager.reconstruct(second_id).await.unwrap();
        assert_eq!(
            reconstructed.agents.get("a1").unwrap().status,
            AgentStatus::Busy
        );
    }

    #[tokio::test]
    async fn tagged_snapshots_survive_retention_sweep() {
        let store = Arc::new(InMemoryStore::default());
        let mut config = SnapshotManagerConfig::default();
        config.max_retention_ms = 0;
        let manager = SnapshotManager::new(store, config);
        let session_id = Uuid::new_v4();

        let tagged_id = manager
            .create_snapshot(
                session_id,
                state_with_agent(1000, "a1", AgentStatus::Idle),
                CreateSnapshotOptions {
                    tags: vec!["checkpoint".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let evicted = manager.sweep_retention(session_id).await.unwrap();
        assert_eq!(evicted, 0);
        assert!(manager.get_snapshot(tagged_id).await.is_ok());
    }
}
