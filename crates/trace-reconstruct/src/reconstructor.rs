//! State reconstructor (C6, spec §4.6): point-in-time reconstruction,
//! diffing, replay, condition search, and critical-path analysis over the
//! event DAG formed by `parent_id`.

use std::ops::Range;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use trace_core::{Event, StateDelta, SystemState};
use trace_snapshot::SnapshotManager;
use trace_store::{PersistentStore, TraceQuery};

use crate::cache::{StateCache, DEFAULT_CAPACITY};
use crate::critical_path::{compute_critical_path, CriticalPathResult};
use crate::error::{ReconstructError, ReconstructResult};

/// Owns no state of its own besides the LRU cache; reads flow through the
/// store and snapshot manager it was built with.
pub struct Reconstructor {
    store: Arc<dyn PersistentStore>,
    snapshots: Arc<SnapshotManager>,
    cache: Mutex<StateCache>,
}

impl Reconstructor {
    pub fn new(store: Arc<dyn PersistentStore>, snapshots: Arc<SnapshotManager>) -> Self {
        Self::with_cache_capacity(store, snapshots, DEFAULT_CAPACITY)
    }

    pub fn with_cache_capacity(
        store: Arc<dyn PersistentStore>,
        snapshots: Arc<SnapshotManager>,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            snapshots,
            cache: Mutex::new(StateCache::new(capacity)),
        }
    }

    /// Call whenever new events land for `session_id`; invalidates the
    /// coarse per-session cache entries (spec §4.6 "Cache").
    pub fn invalidate(&self, session_id: Uuid) {
        self.cache.lock().unwrap().invalidate_session(session_id);
    }

    /// `reconstruct(session, t)`: nearest snapshot `<= t` (or empty state),
    /// plus every event in `(snapshot.ts, t]` applied in timestamp order.
    pub async fn reconstruct(&self, session_id: Uuid, t: i64) -> ReconstructResult<SystemState> {
        trace_core::metrics::RECONSTRUCTIONS_TOTAL.inc();
        let _timer = trace_core::metrics::RECONSTRUCT_DURATION_SECONDS.start_timer();
        if let Some(cached) = self.cache.lock().unwrap().get(session_id, t) {
            trace_core::metrics::RECONSTRUCTION_CACHE_HITS_TOTAL.inc();
            return Ok(cached);
        }

        let nearest = self.snapshots.find_nearest(session_id, t).await?;
        let (mut state, base_ts) = match &nearest {
            Some(snapshot) => (
                self.snapshots.reconstruct(snapshot.id).await?,
                snapshot.timestamp,
            ),
            None => (SystemState::empty(i64::MIN), i64::MIN),
        };

        let mut events = self
            .store
            .get_traces_by_session(
                session_id,
                TraceQuery {
                    time_range: Some(base_ts..t.saturating_add(1)),
                    ..Default::default()
                },
            )
            .await?;
        events.retain(|e| e.timestamp > base_ts && e.timestamp <= t);
        sort_events(&mut events);

        for event in &events {
            crate::state_apply::apply_event(&mut state, event);
        }
        state.timestamp = t;

        self.cache.lock().unwrap().put(session_id, t, state.clone());
        Ok(state)
    }

    pub async fn diff(&self, session_id: Uuid, t1: i64, t2: i64) -> ReconstructResult<StateDelta> {
        let before = self.reconstruct(session_id, t1).await?;
        let after = self.reconstruct(session_id, t2).await?;
        Ok(StateDelta::diff(&before, &after))
    }

    /// Replays every event in `range` against the state as of `range.start`,
    /// invoking `callback(state_after_event, event)` in order.
    pub async fn replay<F>(
        &self,
        session_id: Uuid,
        range: Range<i64>,
        mut callback: F,
    ) -> ReconstructResult<()>
    where
        F: FnMut(&SystemState, &Event),
    {
        let mut state = self.reconstruct(session_id, range.start).await?;
        let mut events = self
            .store
            .get_traces_by_session(
                session_id,
                TraceQuery {
                    time_range: Some(range.clone()),
                    ..Default::default()
                },
            )
            .await?;
        events.retain(|e| e.timestamp > range.start);
        sort_events(&mut events);

        for event in &events {
            crate::state_apply::apply_event(&mut state, event);
            callback(&state, event);
        }
        Ok(())
    }

    /// Linear forward scan from session genesis up to `t_max`, returning the
    /// earliest event at which `predicate` transitions from false to true.
    pub async fn find_condition_origin<P>(
        &self,
        session_id: Uuid,
        predicate: P,
        t_max: i64,
    ) -> ReconstructResult<Option<(i64, Event)>>
    where
        P: Fn(&SystemState) -> bool,
    {
        let mut events = self
            .store
            .get_traces_by_session(
                session_id,
                TraceQuery {
                    time_range: Some(i64::MIN..t_max.saturating_add(1)),
                    ..Default::default()
                },
            )
            .await?;
        events.retain(|e| e.timestamp <= t_max);
        sort_events(&mut events);

        let mut state = SystemState::empty(i64::MIN);
        let mut previously_true = predicate(&state);

        for event in events {
            crate::state_apply::apply_event(&mut state, &event);
            let now_true = predicate(&state);
            if !previously_true && now_true {
                return Ok(Some((event.timestamp, event)));
            }
            previously_true = now_true;
        }
        Ok(None)
    }

    /// `critical_path(session, t_end)` per spec §4.6.
    pub async fn critical_path(
        &self,
        session_id: Uuid,
        t_end: i64,
    ) -> ReconstructResult<CriticalPathResult> {
        let mut events = self
            .store
            .get_traces_by_session(
                session_id,
                TraceQuery {
                    time_range: Some(i64::MIN..t_end.saturating_add(1)),
                    ..Default::default()
                },
            )
            .await?;
        events.retain(|e| e.timestamp <= t_end);
        sort_events(&mut events);

        debug!(%session_id, t_end, count = events.len(), "computing critical path");
        Ok(compute_critical_path(&events))
    }
}

/// Timestamp ascending, ties broken by event id lexicographic order
/// (spec §5 "Ordering guarantees").
fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use trace_core::{EventMetadata, EventType, Phase};
    use trace_snapshot::SnapshotManagerConfig;

    #[derive(Default)]
    struct InMemoryStore {
        events: StdMutex<Vec<Event>>,
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

        async fn store_batch(&self, batch: &[Event]) -> trace_store::StoreResult<()> {
            self.events.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }

        async fn get_trace(&self, id: Uuid) -> trace_store::StoreResult<Option<Event>> {
            Ok(self.events.lock().unwrap().iter().find(|e| e.id == id).cloned())
        }

        async fn get_traces_by_session(
            &self,
            session_id: Uuid,
            query: trace_store::TraceQuery,
        ) -> trace_store::StoreResult<Vec<Event>> {
            let events = self.events.lock().unwrap();
            Ok(events
                .iter()
                .filter(|e| e.session_id == session_id)
                .filter(|e| {
                    query
                        .time_range
                        .as_ref()
                        .map(|r| e.timestamp >= r.start && e.timestamp < r.end)
                        .unwrap_or(true)
                })
                .cloned()
                .collect())
        }

        async fn get_traces_by_agent(
            &self,
            agent_id: &str,
            _query: trace_store::TraceQuery,
        ) -> trace_store::StoreResult<Vec<Event>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.agent_id.as_deref() == Some(agent_id))
                .cloned()
                .collect())
        }

        async fn get_traces_by_time_range(
            &self,
            range: Range<i64>,
            _agent_ids: Option<Vec<String>>,
        ) -> trace_store::StoreResult<Vec<Event>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.timestamp >= range.start && e.timestamp < range.end)
                .cloned()
                .collect())
        }

        async fn store_snapshot(
            &self,
            _snapshot: &trace_core::Snapshot,
            _base_snapshot_id: Option<Uuid>,
            _bytes: &[u8],
        ) -> trace_store::StoreResult<()> {
            Ok(())
        }

        async fn get_snapshot(
            &self,
            _id: Uuid,
        ) -> trace_store::StoreResult<Option<(trace_core::Snapshot, Option<Uuid>, Vec<u8>)>> {
            Ok(None)
        }

        async fn delete_snapshot(&self, _id: Uuid) -> trace_store::StoreResult<()> {
            Ok(())
        }

        async fn list_snapshots(
            &self,
            _session_id: Option<Uuid>,
        ) -> trace_store::StoreResult<Vec<trace_store::SnapshotMeta>> {
            Ok(vec![])
        }

        async fn stats(&self) -> trace_store::StoreResult<trace_store::StoreStats> {
            Ok(trace_store::StoreStats::default())
        }

        async fn sweep_retention(&self) -> trace_store::StoreResult<u64> {
            Ok(0)
        }
    }

    fn event(session: Uuid, agent: &str, ts: i64, event_type: EventType, phase: Phase) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: ts,
            session_id: session,
            agent_id: Some(agent.to_string()),
            parent_id: None,
            correlation_id: None,
            event_type,
            phase,
            payload: serde_json::Map::new(),
            metadata: EventMetadata::default(),
            performance: None,
        }
    }

    fn build_reconstructor(store: Arc<InMemoryStore>) -> Reconstructor {
        let snapshots = Arc::new(SnapshotManager::new(store.clone(), SnapshotManagerConfig::default()));
        Reconstructor::new(store, snapshots)
    }

    #[tokio::test]
    async fn reconstruct_applies_events_up_to_t_inclusive() {
        let store = Arc::new(InMemoryStore::default());
        let session = Uuid::new_v4();
        store.events.lock().unwrap().push(event(
            session,
            "a1",
            1000,
            EventType::AgentSpawn,
            Phase::Start,
        ));
        store.events.lock().unwrap().push(event(
            session,
            "a1",
            2000,
            EventType::AgentDestroy,
            Phase::Complete,
        ));

        let reconstructor = build_reconstructor(store);
        let state_at_1500 = reconstructor.reconstruct(session, 1500).await.unwrap();
        assert_eq!(
            state_at_1500.agents["a1"].status,
            trace_core::AgentStatus::Idle
        );

        let state_at_2000 = reconstructor.reconstruct(session, 2000).await.unwrap();
        assert_eq!(
            state_at_2000.agents["a1"].status,
            trace_core::AgentStatus::Terminated
        );
    }

    #[tokio::test]
    async fn reconstruct_is_deterministic() {
        let store = Arc::new(InMemoryStore::default());
        let session = Uuid::new_v4();
        store.events.lock().unwrap().push(event(
            session,
            "a1",
            1000,
            EventType::AgentSpawn,
            Phase::Start,
        ));
        let reconstructor = build_reconstructor(store);

        let a = reconstructor.reconstruct(session, 1000).await.unwrap();
        let b = reconstructor.reconstruct(session, 1000).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn find_condition_origin_returns_earliest_transition() {
        let store = Arc::new(InMemoryStore::default());
        let session = Uuid::new_v4();
        store.events.lock().unwrap().push(event(
            session,
            "a1",
            1000,
            EventType::AgentSpawn,
            Phase::Start,
        ));
        store.events.lock().unwrap().push(event(
            session,
            "a1",
            2000,
            EventType::AgentDestroy,
            Phase::Complete,
        ));
        let reconstructor = build_reconstructor(store);

        let found = reconstructor
            .find_condition_origin(
                session,
                |s| {
                    s.agents
                        .get("a1")
                        .map(|a| a.status == trace_core::AgentStatus::Terminated)
                        .unwrap_or(false)
                },
                5000,
            )
            .await
            .unwrap();

        let (ts, _event) = found.expect("expected a transition");
        assert_eq!(ts, 2000);
    }

    #[tokio::test]
    async fn invalidate_clears_cached_entries() {
        let store = Arc::new(InMemoryStore::default());
        let session = Uuid::new_v4();
        let reconstructor = build_reconstructor(store);

        reconstructor.reconstruct(session, 1000).await.unwrap();
        assert!(reconstructor.cache.lock().unwrap().get(session, 1000).is_some());
        reconstructor.invalidate(session);
        assert!(reconstructor.cache.lock().unwrap().get(session, 1000).is_none());
    }
}
