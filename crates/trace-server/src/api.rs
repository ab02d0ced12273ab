//! Synchronous REST mirror of the streaming server's historical surface
//! (spec-full §2.6): callers that prefer request/response over a
//! long-lived socket get the same session/history/time-travel/snapshot
//! operations the streaming protocol exposes as `request_history` and
//! `time_travel` messages, plus session creation and direct event
//! ingestion for producers that don't want a WebSocket either. Grounded
//! in the teacher's `api/` route modules (plain `actix-web` handlers
//! returning `web::Json`, errors mapped to HTTP status via `ResponseError`).

use std::sync::{Arc, RwLock};

use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trace_collector::Collector;
use trace_core::EventDraft;
use trace_reconstruct::Reconstructor;
use trace_snapshot::{
    bundle, CreateSnapshotOptions, ExportOptions, ImportOptions, SearchFilters, SnapshotManager,
};
use trace_store::{PersistentStore, TraceQuery};

use crate::supervisor::ReconstructorStateProvider;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn PersistentStore>,
    pub collector: Arc<Collector>,
    pub snapshots: Arc<SnapshotManager>,
    pub reconstructor: Arc<Reconstructor>,
    /// Sessions created through this process, fed to the performance
    /// monitor so it knows which sessions to emit `PERFORMANCE_METRIC`
    /// events for. Not a substitute for `PersistentStore` — just the set
    /// this process itself has touched.
    pub known_sessions: Arc<RwLock<Vec<Uuid>>>,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let body = serde_json::json!({ "error": self.to_string() });
        match self {
            ApiError::NotFound(_) => HttpResponse::NotFound().json(body),
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(body),
            ApiError::Internal(_) => HttpResponse::InternalServerError().json(body),
        }
    }
}

impl From<trace_store::StoreError> for ApiError {
    fn from(e: trace_store::StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<trace_snapshot::SnapshotError> for ApiError {
    fn from(e: trace_snapshot::SnapshotError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<trace_reconstruct::ReconstructError> for ApiError {
    fn from(e: trace_reconstruct::ReconstructError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct CreateSessionBody {
    name: String,
    #[serde(default)]
    metadata: std::collections::HashMap<String, serde_json::Value>,
}

async fn create_session(state: web::Data<ApiState>, body: web::Json<CreateSessionBody>) -> ApiResult<HttpResponse> {
    let id = state.store.create_session(&body.name, body.metadata.clone()).await?;
    state.known_sessions.write().unwrap().push(id);
    state
        .snapshots
        .start_automatic(id, Arc::new(ReconstructorStateProvider::new(Arc::clone(&state.reconstructor))));
    Ok(HttpResponse::Created().json(serde_json::json!({ "session_id": id })))
}

async fn get_session(state: web::Data<ApiState>, path: web::Path<Uuid>) -> ApiResult<HttpResponse> {
    let session = state
        .store
        .get_session(path.into_inner())
        .await?
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;
    Ok(HttpResponse::Ok().json(session))
}

#[derive(Debug, Deserialize)]
struct IngestBody {
    session_id: Uuid,
    #[serde(flatten)]
    draft: EventDraft,
}

/// Non-blocking mirror of `Collector::collect`: drop semantics match the
/// socket/in-process path exactly (spec §7 — invalid/rate-limited/backpressured
/// events never surface as an error here either).
async fn ingest_event(state: web::Data<ApiState>, body: web::Json<IngestBody>) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    state
        .collector
        .collect(body.session_id, body.draft)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(HttpResponse::Accepted().finish())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    start: Option<i64>,
    end: Option<i64>,
    limit: Option<i64>,
}

async fn get_history(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> ApiResult<HttpResponse> {
    let time_range = match (query.start, query.end) {
        (Some(start), Some(end)) => Some(start..end),
        _ => None,
    };
    let traces = state
        .store
        .get_traces_by_session(
            path.into_inner(),
            TraceQuery {
                time_range,
                limit: query.limit,
                ..Default::default()
            },
        )
        .await?;
    Ok(HttpResponse::Ok().json(traces))
}

#[derive(Debug, Deserialize)]
struct TimestampQuery {
    timestamp: i64,
}

async fn time_travel(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    query: web::Query<TimestampQuery>,
) -> ApiResult<HttpResponse> {
    let system_state = state
        .reconstructor
        .reconstruct(path.into_inner(), query.timestamp)
        .await?;
    Ok(HttpResponse::Ok().json(system_state))
}

#[derive(Debug, Deserialize)]
struct DiffQuery {
    t1: i64,
    t2: i64,
}

async fn diff(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    query: web::Query<DiffQuery>,
) -> ApiResult<HttpResponse> {
    let delta = state.reconstructor.diff(path.into_inner(), query.t1, query.t2).await?;
    Ok(HttpResponse::Ok().json(delta))
}

#[derive(Debug, Deserialize)]
struct CriticalPathQuery {
    t_end: i64,
}

async fn critical_path(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    query: web::Query<CriticalPathQuery>,
) -> ApiResult<HttpResponse> {
    let result = state
        .reconstructor
        .critical_path(path.into_inner(), query.t_end)
        .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[derive(Debug, Deserialize)]
struct CreateSnapshotBody {
    session_id: Uuid,
    #[serde(default)]
    tags: Vec<String>,
    description: Option<String>,
}

async fn create_snapshot(
    state: web::Data<ApiState>,
    body: web::Json<CreateSnapshotBody>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    let current = state
        .reconstructor
        .reconstruct(body.session_id, chrono::Utc::now().timestamp_millis())
        .await?;
    let id = state
        .snapshots
        .create_snapshot(
            body.session_id,
            current,
            CreateSnapshotOptions {
                tags: body.tags,
                description: body.description,
                snapshot_type: None,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "snapshot_id": id })))
}

async fn get_snapshot(state: web::Data<ApiState>, path: web::Path<Uuid>) -> ApiResult<HttpResponse> {
    let (snapshot, _body) = state.snapshots.get_snapshot(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

async fn delete_snapshot(state: web::Data<ApiState>, path: web::Path<Uuid>) -> ApiResult<HttpResponse> {
    state.snapshots.delete_snapshot(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
struct SearchSnapshotsQuery {
    session_id: Option<Uuid>,
    #[serde(default)]
    tags: Vec<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn search_snapshots(
    state: web::Data<ApiState>,
    query: web::Query<SearchSnapshotsQuery>,
) -> ApiResult<HttpResponse> {
    let query = query.into_inner();
    let results = state
        .snapshots
        .search(SearchFilters {
            session_id: query.session_id,
            tags: query.tags,
            time_range: None,
            snapshot_type: None,
            descending: false,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;
    Ok(HttpResponse::Ok().json(results))
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ExportQuery {
    #[serde(default)]
    include_events: bool,
}

async fn export_session(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    query: web::Query<ExportQuery>,
) -> ApiResult<HttpResponse> {
    let bundle = bundle::export(
        &state.store,
        path.into_inner(),
        ExportOptions {
            time_range: None,
            include_events: query.include_events,
        },
    )
    .await?;
    Ok(HttpResponse::Ok().json(bundle))
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    bundle: bundle::Bundle,
    #[serde(default)]
    validate_integrity: bool,
    #[serde(default)]
    overwrite: bool,
}

async fn import_session(state: web::Data<ApiState>, body: web::Json<ImportBody>) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    let report = bundle::import(
        &state.store,
        body.bundle,
        ImportOptions {
            validate_integrity: body.validate_integrity,
            overwrite: body.overwrite,
        },
    )
    .await?;
    Ok(HttpResponse::Ok().json(report))
}

async fn stats(state: web::Data<ApiState>) -> ApiResult<HttpResponse> {
    let stats = state.store.stats().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "session_count": stats.session_count,
        "trace_count": stats.trace_count,
        "total_bytes": stats.total_bytes,
        "collector": collector_metrics_json(state.collector.metrics()),
    })))
}

fn collector_metrics_json(m: trace_collector::CollectorMetrics) -> serde_json::Value {
    serde_json::json!({
        "total": m.total,
        "dropped": m.dropped,
        "errors": m.errors,
        "avg_processing_ms": m.avg_processing_ms,
        "events_per_sec": m.events_per_sec,
        "buffer_util": m.buffer_util,
        "sampling_rate": m.sampling_rate,
        "collection_overhead": m.collection_overhead,
    })
}

async fn collector_metrics(state: web::Data<ApiState>) -> HttpResponse {
    HttpResponse::Ok().json(collector_metrics_json(state.collector.metrics()))
}

/// Binds the REST mirror on its own port, alongside (not instead of) the
/// WebSocket streaming server.
pub async fn run(port: u16, state: ApiState) -> std::io::Result<()> {
    tracing::info!(port, "REST API listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/sessions", web::post().to(create_session))
            .route("/sessions/{id}", web::get().to(get_session))
            .route("/sessions/{id}/history", web::get().to(get_history))
            .route("/sessions/{id}/time-travel", web::get().to(time_travel))
            .route("/sessions/{id}/diff", web::get().to(diff))
            .route("/sessions/{id}/critical-path", web::get().to(critical_path))
            .route("/sessions/{id}/export", web::get().to(export_session))
            .route("/events", web::post().to(ingest_event))
            .route("/snapshots", web::post().to(create_snapshot))
            .route("/snapshots/search", web::get().to(search_snapshots))
            .route("/snapshots/import", web::post().to(import_session))
            .route("/snapshots/{id}", web::get().to(get_snapshot))
            .route("/snapshots/{id}", web::delete().to(delete_snapshot))
            .route("/stats", web::get().to(stats))
            .route("/collector/metrics", web::get().to(collector_metrics))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
