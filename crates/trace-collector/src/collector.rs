//! The admission pipeline (spec §4.4 "Collector"): a single path every
//! event traverses, producing durable storage batches and live-stream
//! batches tee'd to the streaming server.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use trace_core::{Event, EventDraft, EventType, Phase, Severity};
use trace_store::PersistentStore;

use crate::aggregate::AgentAggregate;
use crate::clock::{Clock, SystemClock};
use crate::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::error::{CollectorError, CollectorResult};
use crate::filter::{FilterChain, FilterConfig, UserPredicate};
use crate::rate_limiter::{KeyedRateLimiter, RateLimiterConfig};
use crate::sampler::Sampler;

/// Knobs recognized from spec §6 "Configuration" that bear on the
/// collector/sampler/rate-limiter.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub enabled: bool,
    pub sampling_rate: f64,
    pub buffer_size: usize,
    pub flush_interval_ms: i64,
    pub batch_size: usize,
    pub rate_limit: RateLimiterConfig,
    pub max_events_per_agent: usize,
    pub dead_letter_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_rate: 1.0,
            buffer_size: 10_000,
            flush_interval_ms: 1_000,
            batch_size: 500,
            rate_limit: RateLimiterConfig::default(),
            max_events_per_agent: crate::aggregate::DEFAULT_MAX_EVENTS_PER_AGENT,
            dead_letter_capacity: 1_000,
        }
    }
}

/// `metrics()` response from spec §4.4.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectorMetrics {
    pub total: u64,
    pub dropped: u64,
    pub errors: u64,
    pub avg_processing_ms: f64,
    pub events_per_sec: f64,
    pub buffer_util: f64,
    pub sampling_rate: f64,
    pub collection_overhead: f64,
}

struct OpenTrace {
    session_id: Uuid,
    agent_id: String,
    event_type: EventType,
    started_at_millis: i64,
}

pub struct Collector {
    config: CollectorConfig,
    store: Arc<dyn PersistentStore>,
    live_tx: Option<mpsc::Sender<Vec<Event>>>,
    clock: Arc<dyn Clock>,

    filter_chain: RwLock<FilterChain>,
    sampler: Sampler,
    rate_limiter: KeyedRateLimiter,

    pending: Mutex<Vec<Event>>,
    agent_aggregates: DashMap<(Uuid, String), AgentAggregate>,
    dead_letters: Mutex<DeadLetterQueue>,
    open_traces: DashMap<Uuid, OpenTrace>,

    total: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    processing_micros_sum: AtomicU64,
    started_at_millis: i64,
    last_flush_millis: AtomicI64,
    last_overhead_millionths: AtomicU64,
}

impl Collector {
    pub fn new(store: Arc<dyn PersistentStore>, config: CollectorConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn PersistentStore>,
        config: CollectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sampler = Sampler::new(config.sampling_rate);
        let rate_limiter = KeyedRateLimiter::new(config.rate_limit);
        let now = clock.now_millis();
        Self {
            dead_letters: Mutex::new(DeadLetterQueue::new(config.dead_letter_capacity)),
            config,
            store,
            live_tx: None,
            clock,
            filter_chain: RwLock::new(FilterChain::new(FilterConfig::default())),
            sampler,
            rate_limiter,
            pending: Mutex::new(Vec::new()),
            agent_aggregates: DashMap::new(),
            open_traces: DashMap::new(),
            total: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            processing_micros_sum: AtomicU64::new(0),
            started_at_millis: now,
            last_flush_millis: AtomicI64::new(now),
            last_overhead_millionths: AtomicU64::new(0),
        }
    }

    pub fn with_live_tee(mut self, tx: mpsc::Sender<Vec<Event>>) -> Self {
        self.live_tx = Some(tx);
        self
    }

    pub fn add_filter(&self, predicate: UserPredicate) {
        self.filter_chain.write().unwrap().add_filter(predicate);
    }

    pub fn clear_filters(&self) {
        self.filter_chain.write().unwrap().clear_filters();
    }

    pub fn set_global_filter(&self, config: FilterConfig) {
        self.filter_chain.write().unwrap().set_global_config(config);
    }

    /// The fixed-order admission pipeline (spec §4.4 "Pipeline ordering").
    /// Never returns an error for a dropped event: `INVALID_EVENT`,
    /// `RATE_LIMITED`, and `BACKPRESSURE` are silent per spec §7.
    pub async fn collect(&self, session_id: Uuid, draft: EventDraft) -> CollectorResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let pipeline_start = self.clock.now_millis();
        self.total.fetch_add(1, Ordering::Relaxed);
        trace_core::metrics::EVENTS_COLLECTED_TOTAL.inc();
        let _timer = trace_core::metrics::COLLECT_DURATION_SECONDS.start_timer();

        // 1. Cheap validity check.
        if !draft.is_structurally_valid() {
            self.record_drop();
            self.record_processing_time(pipeline_start);
            return Ok(());
        }

        let severity = draft.metadata.severity;
        let event_type = draft
            .event_type
            .expect("is_structurally_valid guarantees event_type");
        let agent_id = draft
            .agent_id
            .clone()
            .expect("is_structurally_valid guarantees agent_id");

        // 2. Sampler decision. Critical events bypass sampling entirely.
        if !severity.is_critical() && !self.sampler.admit() {
            self.record_drop();
            self.record_processing_time(pipeline_start);
            return Ok(());
        }

        // 3. Per-(agent, type) rate limiter.
        if !self
            .rate_limiter
            .check(&agent_id, event_type, pipeline_start)
        {
            self.record_drop();
            self.record_processing_time(pipeline_start);
            return Ok(());
        }

        // Materialize defaults now so filters see a fully-shaped event; the
        // literal "fill missing id/timestamp" preprocessing happens here,
        // sanitize/truncate happens below as spec's stage 5 names both.
        let mut event = self.build_event(session_id, draft);

        // 4. Global + user filters. Applies uniformly; invariant 8 exempts
        // critical events from the sampler and backpressure only.
        if !self.filter_chain.read().unwrap().should_accept(&event) {
            self.record_drop();
            self.record_processing_time(pipeline_start);
            return Ok(());
        }

        // 5. Sanitize sensitive fields, truncate oversized strings.
        crate::sanitize::sanitize_payload(&mut event.payload);

        // 6. Backpressure gate.
        if !self.apply_backpressure(event.metadata.severity) {
            self.record_drop();
            self.record_processing_time(pipeline_start);
            return Ok(());
        }

        // 7. Append to batch, update the owning agent aggregate.
        {
            let mut pending = self.pending.lock().unwrap();
            pending.push(event.clone());
        }
        {
            let mut agg = self
                .agent_aggregates
                .entry((session_id, agent_id))
                .or_insert_with(|| AgentAggregate::new(self.config.max_events_per_agent));
            agg.apply(&event);
        }

        self.record_processing_time(pipeline_start);
        self.maybe_run_adaptive_control();

        // 8. Flush on size or time threshold.
        let should_flush = {
            let pending = self.pending.lock().unwrap();
            pending.len() >= self.config.batch_size
        } || (self.clock.now_millis() - self.last_flush_millis.load(Ordering::SeqCst))
            >= self.config.flush_interval_ms;

        if should_flush {
            self.flush().await?;
        }

        Ok(())
    }

    fn build_event(&self, session_id: Uuid, draft: EventDraft) -> Event {
        let now = self.clock.now_millis();
        Event {
            id: draft.id.unwrap_or_else(Uuid::new_v4),
            timestamp: draft.timestamp.unwrap_or(now),
            session_id,
            agent_id: draft.agent_id,
            parent_id: draft.parent_id,
            correlation_id: Some(draft.correlation_id.unwrap_or_else(Uuid::new_v4)),
            event_type: draft
                .event_type
                .expect("is_structurally_valid guarantees event_type"),
            phase: draft.phase.unwrap_or(Phase::Start),
            payload: draft.payload,
            metadata: draft.metadata,
            performance: draft.performance,
        }
    }

    /// Spec §4.4 stage 6: drop the lowest-severity buffered event to make
    /// room, or the incoming event if none is found. Critical events are
    /// never evicted and never dropped here (invariant 8). Counts exactly
    /// one drop per call that evicts a buffered event; a drop of the
    /// incoming event itself is left to the caller's `record_drop` so the
    /// same drop is never counted twice.
    fn apply_backpressure(&self, incoming_severity: Severity) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let utilization = pending.len() as f64 / self.config.buffer_size as f64;
        if utilization <= 0.9 {
            return true;
        }

        let evictable = pending
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_critical())
            .min_by_key(|(_, e)| e.metadata.severity)
            .map(|(idx, _)| idx);

        match evictable {
            Some(idx) => {
                pending.remove(idx);
                drop(pending);
                self.record_drop();
                true
            }
            None if incoming_severity.is_critical() => true,
            None => false,
        }
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        trace_core::metrics::EVENTS_DROPPED_TOTAL.inc();
    }

    fn record_processing_time(&self, pipeline_start_millis: i64) {
        let elapsed_micros = (self.clock.now_millis() - pipeline_start_millis).max(0) as u64 * 1000;
        self.processing_micros_sum
            .fetch_add(elapsed_micros, Ordering::Relaxed);
    }

    fn avg_processing_ms(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let sum_micros = self.processing_micros_sum.load(Ordering::Relaxed);
        (sum_micros as f64 / total as f64) / 1000.0
    }

    fn events_per_second(&self, now_millis: i64) -> f64 {
        let elapsed_secs = ((now_millis - self.started_at_millis) as f64 / 1000.0).max(0.001);
        self.total.load(Ordering::Relaxed) as f64 / elapsed_secs
    }

    fn maybe_run_adaptive_control(&self) {
        let now = self.clock.now_millis();
        let avg_ms = self.avg_processing_ms();
        let events_per_sec = self.events_per_second(now);
        if let Some(overhead) = self.sampler.maybe_adjust(now, avg_ms, events_per_sec) {
            self.last_overhead_millionths
                .store((overhead * 1_000_000.0).round() as u64, Ordering::SeqCst);
        }
    }

    /// Drains the pending batch to storage and tees it to the streaming
    /// channel. On storage failure, re-queues if the buffer has headroom,
    /// otherwise moves the batch to the dead-letter ring (spec §7
    /// `STORAGE_ERROR`).
    pub async fn flush(&self) -> CollectorResult<()> {
        let batch = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *pending)
        };
        self.last_flush_millis
            .store(self.clock.now_millis(), Ordering::SeqCst);

        match self.store.store_batch(&batch).await {
            Ok(()) => {
                trace_core::metrics::BATCHES_PERSISTED_TOTAL.inc();
                if let Some(tx) = &self.live_tx {
                    if tx.send(batch).await.is_err() {
                        debug!("live streaming channel closed, dropping tee'd batch");
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                let mut pending = self.pending.lock().unwrap();
                let headroom = self.config.buffer_size.saturating_sub(pending.len());
                if headroom >= batch.len() {
                    pending.extend(batch);
                } else {
                    drop(pending);
                    warn!(error = %e, "storage batch failed and buffer has no headroom, moving to dead-letter queue");
                    self.dead_letters.lock().unwrap().push(batch, e.to_string());
                }
                Err(CollectorError::from(e))
            }
        }
    }

    pub fn metrics(&self) -> CollectorMetrics {
        let now = self.clock.now_millis();
        let buffer_util = {
            let pending = self.pending.lock().unwrap();
            pending.len() as f64 / self.config.buffer_size as f64
        };
        CollectorMetrics {
            total: self.total.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            avg_processing_ms: self.avg_processing_ms(),
            events_per_sec: self.events_per_second(now),
            buffer_util,
            sampling_rate: self.sampler.rate(),
            collection_overhead: self.last_overhead_millionths.load(Ordering::Relaxed) as f64
                / 1_000_000.0,
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.lock().unwrap().entries().cloned().collect()
    }

    pub fn agent_aggregate(&self, session_id: Uuid, agent_id: &str) -> Option<AgentAggregate> {
        self.agent_aggregates
            .get(&(session_id, agent_id.to_string()))
            .map(|r| r.clone())
    }

    /// Helper: emits a `start` event and remembers its opening timestamp so
    /// `complete_trace`/`error_trace` can compute a duration.
    pub async fn start_trace(
        &self,
        id: Uuid,
        event_type: EventType,
        agent_id: impl Into<String>,
        session_id: Uuid,
        data: serde_json::Map<String, Value>,
    ) -> CollectorResult<()> {
        let agent_id = agent_id.into();
        let started_at_millis = self.clock.now_millis();
        self.open_traces.insert(
            id,
            OpenTrace {
                session_id,
                agent_id: agent_id.clone(),
                event_type,
                started_at_millis,
            },
        );

        let draft = EventDraft {
            id: Some(id),
            timestamp: Some(started_at_millis),
            agent_id: Some(agent_id),
            phase: Some(Phase::Start),
            event_type: Some(event_type),
            payload: data,
            ..Default::default()
        };
        self.collect(session_id, draft).await
    }

    /// Looks up the opening event by `id`, computes its duration, and emits
    /// a `complete` event (spec §4.4 `complete_trace`).
    pub async fn complete_trace(&self, id: Uuid, result: Value) -> CollectorResult<()> {
        let Some((_, opened)) = self.open_traces.remove(&id) else {
            warn!(trace_id = %id, "complete_trace called with no matching open trace");
            return Ok(());
        };

        let now = self.clock.now_millis();
        let duration_ms = now - opened.started_at_millis;

        let mut payload = serde_json::Map::new();
        payload.insert("result".to_string(), result);

        let completion_type = match opened.event_type {
            EventType::TaskStart => EventType::TaskComplete,
            EventType::AgentSpawn => EventType::AgentDestroy,
            other => other,
        };

        let draft = EventDraft {
            timestamp: Some(now),
            agent_id: Some(opened.agent_id),
            parent_id: Some(id),
            correlation_id: Some(id),
            phase: Some(Phase::Complete),
            event_type: Some(completion_type),
            payload,
            performance: Some(trace_core::PerformanceRecord {
                duration_ms: Some(duration_ms),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.collect(opened.session_id, draft).await
    }

    /// Emits an `error` event for a previously opened trace (spec §4.4
    /// `error_trace`).
    pub async fn error_trace(&self, id: Uuid, err: impl Into<String>) -> CollectorResult<()> {
        let Some((_, opened)) = self.open_traces.remove(&id) else {
            warn!(trace_id = %id, "error_trace called with no matching open trace");
            return Ok(());
        };

        let now = self.clock.now_millis();
        let duration_ms = now - opened.started_at_millis;

        let mut payload = serde_json::Map::new();
        payload.insert("error".to_string(), Value::String(err.into()));

        let error_type = match opened.event_type {
            EventType::TaskStart => EventType::TaskFail,
            other => other,
        };

        let mut metadata = trace_core::EventMetadata::default();
        metadata.severity = Severity::High;

        let draft = EventDraft {
            timestamp: Some(now),
            agent_id: Some(opened.agent_id),
            parent_id: Some(id),
            correlation_id: Some(id),
            phase: Some(Phase::Error),
            event_type: Some(error_type),
            payload,
            metadata,
            performance: Some(trace_core::PerformanceRecord {
                duration_ms: Some(duration_ms),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.collect(opened.session_id, draft).await
    }
}
