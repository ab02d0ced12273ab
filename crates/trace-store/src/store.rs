//! Persistent store (C2): session registry, time-/agent-indexed event
//! retrieval, snapshot storage, and retention.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use tracing::info;
use uuid::Uuid;

use trace_core::{Event, Session, Snapshot};

use crate::error::{StoreError, StoreResult};
use crate::models::{EventRow, SessionRow, SnapshotRow};
use crate::schema::{events, sessions, snapshots};

type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

/// Connection and batching knobs for [`PostgresStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub connection_pool_size: u32,
    /// Default event retention; overridable per session via `retention_error`.
    pub retention_default_ms: i64,
    /// Retention applied to `error`-phase events, generally longer-lived.
    pub retention_error_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/tracebackbone".to_string(),
            connection_pool_size: 10,
            retention_default_ms: 24 * 60 * 60 * 1000,
            retention_error_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// `stats()` response from spec §4.2.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub session_count: u64,
    pub trace_count: u64,
    pub total_bytes: u64,
}

/// Optional filters for `get_traces_by_session` / `get_traces_by_time_range`.
#[derive(Debug, Clone, Default)]
pub struct TraceQuery {
    pub time_range: Option<Range<i64>>,
    pub event_types: Option<Vec<String>>,
    pub agent_ids: Option<Vec<String>>,
    pub limit: Option<i64>,
}

/// Snapshot metadata without the body bytes, for search/`find_nearest`
/// without paying for blob I/O (spec §4.5 "search").
#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    pub id: Uuid,
    pub session_id: Uuid,
    pub timestamp: i64,
    pub snapshot_type: trace_core::SnapshotType,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub base_snapshot_id: Option<Uuid>,
    pub compressed: bool,
    pub size: u64,
    pub compressed_size: Option<u64>,
    pub checksum: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The C2 contract: durable session/event/snapshot storage with
/// time- and agent-indexed retrieval, per spec §4.2.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn create_session(
        &self,
        name: &str,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> StoreResult<Uuid>;

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>>;

    async fn update_session(&self, session: &Session) -> StoreResult<()>;

    /// Inserts a session using the caller-chosen id, updating it in place
    /// if it already exists. Used by bundle import, where the original id
    /// must be preserved so its events and snapshots still resolve to it.
    async fn upsert_session(&self, session: &Session) -> StoreResult<()>;

    /// Atomic per-batch: all-or-nothing. Callers re-queue on `STORAGE_ERROR`.
    async fn store_batch(&self, batch: &[Event]) -> StoreResult<()>;

    async fn get_trace(&self, id: Uuid) -> StoreResult<Option<Event>>;

    async fn get_traces_by_session(
        &self,
        session_id: Uuid,
        query: TraceQuery,
    ) -> StoreResult<Vec<Event>>;

    async fn get_traces_by_agent(
        &self,
        agent_id: &str,
        query: TraceQuery,
    ) -> StoreResult<Vec<Event>>;

    async fn get_traces_by_time_range(
        &self,
        range: Range<i64>,
        agent_ids: Option<Vec<String>>,
    ) -> StoreResult<Vec<Event>>;

    /// `base_snapshot_id` is `Some` iff `snapshot` is incremental; it is
    /// carried as a plain column so the store can walk chains without
    /// decoding snapshot bodies.
    async fn store_snapshot(
        &self,
        snapshot: &Snapshot,
        base_snapshot_id: Option<Uuid>,
        bytes: &[u8],
    ) -> StoreResult<()>;

    async fn get_snapshot(
        &self,
        id: Uuid,
    ) -> StoreResult<Option<(Snapshot, Option<Uuid>, Vec<u8>)>>;

    async fn delete_snapshot(&self, id: Uuid) -> StoreResult<()>;

    /// Metadata for snapshots, optionally scoped to one session, ordered by
    /// timestamp ascending, body bytes excluded.
    async fn list_snapshots(&self, session_id: Option<Uuid>) -> StoreResult<Vec<SnapshotMeta>>;

    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Deletes events older than the session's retention window, excluding
    /// active sessions and tagged snapshots. Returns the number of rows removed.
    async fn sweep_retention(&self) -> StoreResult<u64>;
}

/// PostgreSQL-backed [`PersistentStore`].
pub struct PostgresStore {
    pool: Arc<PgPool>,
    config: StoreConfig,
}

impl PostgresStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
        let pool = Pool::builder()
            .max_size(config.connection_pool_size)
            .build(manager)
            .map_err(|e| StoreError::Storage {
                message: format!("failed to create connection pool: {e}"),
            })?;

        Ok(Self {
            pool: Arc::new(pool),
            config,
        })
    }

    fn get_connection(&self) -> StoreResult<PgPooled> {
        Ok(self.pool.get()?)
    }
}

#[async_trait]
impl PersistentStore for PostgresStore {
    async fn create_session(
        &self,
        name: &str,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> StoreResult<Uuid> {
        let mut conn = self.get_connection()?;
        let mut session = Session::new(Uuid::new_v4(), name, chrono::Utc::now().timestamp_millis());
        session.metadata = metadata;
        let row = SessionRow::from(&session);

        diesel::insert_into(sessions::table)
            .values(&row)
            .execute(&mut conn)?;

        Ok(session.id)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let mut conn = self.get_connection()?;
        let row: Option<SessionRow> = sessions::table
            .filter(sessions::id.eq(id))
            .first(&mut conn)
            .optional()?;

        row.map(Session::try_from).transpose()
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        let mut conn = self.get_connection()?;
        let row = SessionRow::from(session);

        diesel::update(sessions::table.filter(sessions::id.eq(session.id)))
            .set(&row)
            .execute(&mut conn)?;

        Ok(())
    }

    async fn upsert_session(&self, session: &Session) -> StoreResult<()> {
        let mut conn = self.get_connection()?;
        let row = SessionRow::from(session);

        diesel::insert_into(sessions::table)
            .values(&row)
            .on_conflict(sessions::id)
            .do_update()
            .set(&row)
            .execute(&mut conn)?;

        Ok(())
    }

    async fn store_batch(&self, batch: &[Event]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.get_connection()?;
        let rows: Vec<EventRow> = batch.iter().map(EventRow::from).collect();

        conn.transaction::<_, StoreError, _>(|conn| {
            diesel::insert_into(events::table)
                .values(&rows)
                .execute(conn)?;
            Ok(())
        })
    }

    async fn get_trace(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let mut conn = self.get_connection()?;
        let row: Option<EventRow> = events::table
            .filter(events::id.eq(id))
            .first(&mut conn)
            .optional()?;

        row.map(Event::try_from).transpose()
    }

    async fn get_traces_by_session(
        &self,
        session_id: Uuid,
        query: TraceQuery,
    ) -> StoreResult<Vec<Event>> {
        let mut conn = self.get_connection()?;
        let mut q = events::table
            .filter(events::session_id.eq(session_id))
            .into_boxed();

        if let Some(range) = &query.time_range {
            q = q
                .filter(events::timestamp.ge(range.start))
                .filter(events::timestamp.lt(range.end));
        }
        if let Some(types) = &query.event_types {
            q = q.filter(events::event_type.eq_any(types));
        }
        if let Some(agents) = &query.agent_ids {
            q = q.filter(events::agent_id.eq_any(agents));
        }

        q = q.order(events::timestamp.asc());
        if let Some(limit) = query.limit {
            q = q.limit(limit);
        }

        let rows: Vec<EventRow> = q.load(&mut conn)?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn get_traces_by_agent(
        &self,
        agent_id: &str,
        query: TraceQuery,
    ) -> StoreResult<Vec<Event>> {
        let mut conn = self.get_connection()?;
        let mut q = events::table
            .filter(events::agent_id.eq(agent_id))
            .into_boxed();

        if let Some(range) = &query.time_range {
            q = q
                .filter(events::timestamp.ge(range.start))
                .filter(events::timestamp.lt(range.end));
        }
        if let Some(types) = &query.event_types {
            q = q.filter(events::event_type.eq_any(types));
        }

        q = q.order(events::timestamp.asc());
        if let Some(limit) = query.limit {
            q = q.limit(limit);
        }

        let rows: Vec<EventRow> = q.load(&mut conn)?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn get_traces_by_time_range(
        &self,
        range: Range<i64>,
        agent_ids: Option<Vec<String>>,
    ) -> StoreResult<Vec<Event>> {
        let mut conn = self.get_connection()?;
        let mut q = events::table
            .filter(events::timestamp.ge(range.start))
            .filter(events::timestamp.lt(range.end))
            .into_boxed();

        if let Some(agents) = &agent_ids {
            q = q.filter(events::agent_id.eq_any(agents));
        }

        q = q.order(events::timestamp.asc());

        let rows: Vec<EventRow> = q.load(&mut conn)?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn store_snapshot(
        &self,
        snapshot: &Snapshot,
        base_snapshot_id: Option<Uuid>,
        bytes: &[u8],
    ) -> StoreResult<()> {
        let mut conn = self.get_connection()?;

        let snapshot_type_str = match &snapshot.snapshot_type {
            trace_core::SnapshotType::Full => "full",
            trace_core::SnapshotType::Incremental => "incremental",
            trace_core::SnapshotType::Tagged => "tagged",
        };

        let row = SnapshotRow {
            id: snapshot.id,
            session_id: snapshot.session_id,
            timestamp: snapshot.timestamp,
            snapshot_type: snapshot_type_str.to_string(),
            tags: snapshot.tags.clone(),
            description: snapshot.description.clone(),
            base_snapshot_id,
            compressed: snapshot.compressed,
            size: snapshot.size as i64,
            compressed_size: snapshot.compressed_size.map(|s| s as i64),
            checksum: snapshot.checksum.clone(),
            body: bytes.to_vec(),
            created_at: snapshot.created_at,
            expires_at: snapshot.expires_at,
        };

        diesel::insert_into(snapshots::table)
            .values(&row)
            .execute(&mut conn)?;

        Ok(())
    }

    async fn get_snapshot(
        &self,
        id: Uuid,
    ) -> StoreResult<Option<(Snapshot, Option<Uuid>, Vec<u8>)>> {
        let mut conn = self.get_connection()?;
        let row: Option<SnapshotRow> = snapshots::table
            .filter(snapshots::id.eq(id))
            .first(&mut conn)
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let snapshot_type = match row.snapshot_type.as_str() {
            "full" => trace_core::SnapshotType::Full,
            "incremental" => trace_core::SnapshotType::Incremental,
            "tagged" => trace_core::SnapshotType::Tagged,
            other => {
                return Err(StoreError::Serialization {
                    message: format!("unknown snapshot type {other}"),
                })
            }
        };

        let snapshot = Snapshot {
            id: row.id,
            session_id: row.session_id,
            timestamp: row.timestamp,
            snapshot_type,
            tags: row.tags,
            description: row.description,
            compressed: row.compressed,
            size: row.size as u64,
            compressed_size: row.compressed_size.map(|s| s as u64),
            checksum: row.checksum,
            created_at: row.created_at,
            expires_at: row.expires_at,
        };

        Ok(Some((snapshot, row.base_snapshot_id, row.body)))
    }

    async fn delete_snapshot(&self, id: Uuid) -> StoreResult<()> {
        let mut conn = self.get_connection()?;
        let affected = diesel::delete(snapshots::table.filter(snapshots::id.eq(id)))
            .execute(&mut conn)?;

        if affected == 0 {
            return Err(StoreError::SnapshotNotFound { id });
        }
        Ok(())
    }

    async fn list_snapshots(&self, session_id: Option<Uuid>) -> StoreResult<Vec<SnapshotMeta>> {
        let mut conn = self.get_connection()?;

        type Row = (
            Uuid,
            Uuid,
            i64,
            String,
            Vec<String>,
            Option<String>,
            Option<Uuid>,
            bool,
            i64,
            Option<i64>,
            String,
            chrono::DateTime<chrono::Utc>,
            Option<chrono::DateTime<chrono::Utc>>,
        );

        let mut q = snapshots::table.into_boxed();
        if let Some(session_id) = session_id {
            q = q.filter(snapshots::session_id.eq(session_id));
        }

        let rows: Vec<Row> = q
            .select((
                snapshots::id,
                snapshots::session_id,
                snapshots::timestamp,
                snapshots::snapshot_type,
                snapshots::tags,
                snapshots::description,
                snapshots::base_snapshot_id,
                snapshots::compressed,
                snapshots::size,
                snapshots::compressed_size,
                snapshots::checksum,
                snapshots::created_at,
                snapshots::expires_at,
            ))
            .order(snapshots::timestamp.asc())
            .load(&mut conn)?;

        rows.into_iter()
            .map(
                |(
                    id,
                    session_id,
                    timestamp,
                    snapshot_type,
                    tags,
                    description,
                    base_snapshot_id,
                    compressed,
                    size,
                    compressed_size,
                    checksum,
                    created_at,
                    expires_at,
                )| {
                    let snapshot_type = match snapshot_type.as_str() {
                        "full" => trace_core::SnapshotType::Full,
                        "incremental" => trace_core::SnapshotType::Incremental,
                        "tagged" => trace_core::SnapshotType::Tagged,
                        other => {
                            return Err(StoreError::Serialization {
                                message: format!("unknown snapshot type {other}"),
                            })
                        }
                    };
                    Ok(SnapshotMeta {
                        id,
                        session_id,
                        timestamp,
                        snapshot_type,
                        tags,
                        description,
                        base_snapshot_id,
                        compressed,
                        size: size as u64,
                        compressed_size: compressed_size.map(|s| s as u64),
                        checksum,
                        created_at,
                        expires_at,
                    })
                },
            )
            .collect()
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let mut conn = self.get_connection()?;

        let session_count: i64 = sessions::table.count().get_result(&mut conn)?;
        let trace_count: i64 = events::table.count().get_result(&mut conn)?;
        let total_bytes: Option<i64> = snapshots::table
            .select(diesel::dsl::sum(snapshots::size))
            .first(&mut conn)?;

        Ok(StoreStats {
            session_count: session_count as u64,
            trace_count: trace_count as u64,
            total_bytes: total_bytes.unwrap_or(0) as u64,
        })
    }

    async fn sweep_retention(&self) -> StoreResult<u64> {
        let mut conn = self.get_connection()?;
        let now = chrono::Utc::now().timestamp_millis();

        let active_sessions: Vec<Uuid> = sessions::table
            .filter(sessions::status.eq("active"))
            .select(sessions::id)
            .load(&mut conn)?;

        let default_cutoff = now - self.config.retention_default_ms;
        let error_cutoff = now - self.config.retention_error_ms;

        let deleted_default = diesel::delete(
            events::table
                .filter(events::phase.ne("error"))
                .filter(events::timestamp.lt(default_cutoff))
                .filter(events::session_id.ne_all(&active_sessions)),
        )
        .execute(&mut conn)?;

        let deleted_error = diesel::delete(
            events::table
                .filter(events::phase.eq("error"))
                .filter(events::timestamp.lt(error_cutoff))
                .filter(events::session_id.ne_all(&active_sessions)),
        )
        .execute(&mut conn)?;

        let total = (deleted_default + deleted_error) as u64;
        if total > 0 {
            info!(deleted = total, "retention sweep removed expired events");
        }
        Ok(total)
    }
}
