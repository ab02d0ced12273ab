//! End-to-end pipeline scenarios (spec §8 scenarios A, B, D) against an
//! in-memory store stand-in.

use std::ops::Range;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map};
use uuid::Uuid;

use trace_collector::{Collector, CollectorConfig, TestClock};
use trace_core::{AgentStatus, Event, EventDraft, EventMetadata, EventType, Phase, Session, Severity};
use trace_store::{PersistentStore, StoreResult, StoreStats, TraceQuery};

#[derive(Default)]
struct InMemoryStore {
    events: Mutex<Vec<Event>>,
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn create_session(
        &self,
        _name: &str,
        _metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> StoreResult<Uuid> {
        Ok(Uuid::new_v4())
    }

    async fn get_session(&self, _id: Uuid) -> StoreResult<Option<Session>> {
        Ok(None)
    }

    async fn update_session(&self, _session: &Session) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert_session(&self, _session: &Session) -> StoreResult<()> {
        Ok(())
    }

    async fn store_batch(&self, batch: &[Event]) -> StoreResult<()> {
        self.events.lock().unwrap().extend(batch.iter().cloned());
        Ok(())
    }

    async fn get_trace(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.events.lock().unwrap().iter().find(|e| e.id == id).cloned())
    }

    async fn get_traces_by_session(
        &self,
        session_id: Uuid,
        _query: TraceQuery,
    ) -> StoreResult<Vec<Event>> {
        let mut out: Vec<Event> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }

    async fn get_traces_by_agent(&self, _agent_id: &str, _query: TraceQuery) -> StoreResult<Vec<Event>> {
        Ok(vec![])
    }

    async fn get_traces_by_time_range(
        &self,
        _range: Range<i64>,
        _agent_ids: Option<Vec<String>>,
    ) -> StoreResult<Vec<Event>> {
        Ok(vec![])
    }

    async fn store_snapshot(
        &self,
        _snapshot: &trace_core::Snapshot,
        _base_snapshot_id: Option<Uuid>,
        _bytes: &[u8],
    ) -> StoreResult<()> {
        Ok(())
    }

    async fn get_snapshot(
        &self,
        _id: Uuid,
    ) -> StoreResult<Option<(trace_core::Snapshot, Option<Uuid>, Vec<u8>)>> {
        Ok(None)
    }

    async fn delete_snapshot(&self, _id: Uuid) -> StoreResult<()> {
        Ok(())
    }

    async fn list_snapshots(&self, _session_id: Option<Uuid>) -> StoreResult<Vec<trace_store::SnapshotMeta>> {
        Ok(vec![])
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats::default())
    }

    async fn sweep_retention(&self) -> StoreResult<u64> {
        Ok(0)
    }
}

fn draft(event_type: EventType, agent: &str, ts: i64, severity: Severity) -> EventDraft {
    EventDraft {
        timestamp: Some(ts),
        agent_id: Some(agent.to_string()),
        event_type: Some(event_type),
        phase: Some(Phase::Start),
        metadata: EventMetadata {
            severity,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn scenario_a_single_session_round_trip() {
    let store = Arc::new(InMemoryStore::default());
    let clock = TestClock::new(1_000);
    let collector = Collector::with_clock(store.clone(), CollectorConfig::default(), clock);

    let session_id = Uuid::new_v4();

    collector
        .collect(session_id, draft(EventType::AgentSpawn, "a1", 1000, Severity::Low))
        .await
        .unwrap();

    let mut start_draft = draft(EventType::TaskStart, "a1", 1010, Severity::Low);
    start_draft
        .payload
        .insert("task_id".to_string(), json!("t1"));
    collector.collect(session_id, start_draft).await.unwrap();

    let mut complete_draft = draft(EventType::TaskComplete, "a1", 1050, Severity::Low);
    complete_draft
        .payload
        .insert("task_id".to_string(), json!("t1"));
    collector.collect(session_id, complete_draft).await.unwrap();

    collector.flush().await.unwrap();

    let stored = store.get_traces_by_session(session_id, TraceQuery::default()).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let agg = collector.agent_aggregate(session_id, "a1").unwrap();
    assert_eq!(agg.status, AgentStatus::Idle);
    assert_eq!(agg.task_count, 1);
    assert_eq!(agg.current_task, None);
}

#[tokio::test]
async fn scenario_b_drops_sensitive_fields_and_truncates() {
    let store = Arc::new(InMemoryStore::default());
    let collector = Collector::new(store.clone(), CollectorConfig::default());
    let session_id = Uuid::new_v4();

    let mut payload = Map::new();
    payload.insert("password".to_string(), json!("hunter2"));
    payload.insert("payload".to_string(), json!("x".repeat(2000)));

    let d = EventDraft {
        timestamp: Some(2000),
        agent_id: Some("a1".to_string()),
        event_type: Some(EventType::TaskStart),
        phase: Some(Phase::Start),
        payload,
        ..Default::default()
    };
    collector.collect(session_id, d).await.unwrap();
    collector.flush().await.unwrap();

    let stored = store.get_traces_by_session(session_id, TraceQuery::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    let event = &stored[0];
    assert_eq!(event.payload["password"], json!("[REDACTED]"));
    let truncated = event.payload["payload"].as_str().unwrap();
    assert_eq!(truncated.len(), 1015);
    assert!(truncated.ends_with(" ... [TRUNCATED]"));
}

#[tokio::test]
async fn scenario_d_backpressure_drops_oldest_low_severity_and_keeps_critical() {
    let store = Arc::new(InMemoryStore::default());
    let mut config = CollectorConfig::default();
    config.buffer_size = 10;
    config.batch_size = usize::MAX; // never auto-flush on size
    config.flush_interval_ms = i64::MAX; // never auto-flush on time
    let collector = Collector::new(store.clone(), config);
    let session_id = Uuid::new_v4();

    for i in 0..9 {
        collector
            .collect(
                session_id,
                draft(EventType::PerformanceMetric, "a1", 1000 + i, Severity::Low),
            )
            .await
            .unwrap();
    }

    collector
        .collect(
            session_id,
            draft(EventType::PerformanceMetric, "a1", 2000, Severity::Critical),
        )
        .await
        .unwrap();

    collector
        .collect(
            session_id,
            draft(EventType::PerformanceMetric, "a1", 3000, Severity::Medium),
        )
        .await
        .unwrap();

    collector.flush().await.unwrap();

    let stored = store.get_traces_by_session(session_id, TraceQuery::default()).await.unwrap();
    assert_eq!(stored.len(), 10);
    assert_eq!(
        stored.iter().filter(|e| e.metadata.severity == Severity::Critical).count(),
        1
    );
    assert_eq!(
        stored.iter().filter(|e| e.metadata.severity == Severity::Low).count(),
        8
    );
    assert!(!stored.iter().any(|e| e.timestamp == 1000));
}
