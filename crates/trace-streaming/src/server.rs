//! Actix-web app wiring for the streaming server (spec §4.7, §6 external
//! interfaces): `/ws` upgrade, `/healthz`, and `/metrics`, sharing one
//! [`AppState`] across workers.

use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use trace_core::Event;
use trace_reconstruct::Reconstructor;
use trace_store::PersistentStore;

use crate::broadcaster::{self, ClientTable};
use crate::config::StreamingConfig;
use crate::handler::{self, AppState};

/// Starts the broadcaster task and binds the HTTP/WebSocket listener.
/// Returns once the server stops accepting connections (spec §5
/// "Cancellation": closing `batches` unwinds the broadcaster cleanly).
pub async fn run(
    config: StreamingConfig,
    store: Arc<dyn PersistentStore>,
    reconstructor: Arc<Reconstructor>,
    batches: mpsc::Receiver<Vec<Event>>,
) -> std::io::Result<()> {
    let clients: ClientTable = Arc::new(DashMap::new());
    let port = config.port;
    let state = AppState {
        store,
        reconstructor,
        clients: Arc::clone(&clients),
        config: Arc::new(config),
    };

    let broadcaster_clients = Arc::clone(&clients);
    tokio::spawn(broadcaster::run(batches, broadcaster_clients));

    info!(port, "streaming server listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/ws", web::get().to(ws_route))
            .route("/healthz", web::get().to(healthz))
            .route("/metrics", web::get().to(metrics))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn ws_route(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    if state.clients.len() >= state.config.max_connections {
        warn!(max = state.config.max_connections, "connection limit reached");
        return Ok(HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": "server at capacity",
        })));
    }

    let (response, session, stream) = actix_ws::handle(&req, body)?;
    let state = state.get_ref().clone();
    actix_web::rt::spawn(async move {
        handler::run_connection(state, session, stream).await;
    });
    Ok(response)
}

async fn healthz(state: web::Data<AppState>) -> HttpResponse {
    match state.store.stats().await {
        Ok(stats) => HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "connected_clients": state.clients.len(),
            "sessions": stats.session_count,
        })),
        Err(e) => {
            error!(error = %e, "health check storage probe failed");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unhealthy",
                "reason": e.to_string(),
            }))
        }
    }
}

/// Prometheus text exposition, gathered from the process-wide registry
/// shared across every crate (spec "ambient stack": metrics).
async fn metrics() -> HttpResponse {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = trace_core::metrics::registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App};
    use async_trait::async_trait;
    use std::ops::Range;
    use trace_snapshot::{SnapshotManager, SnapshotManagerConfig};
    use trace_store::{SnapshotMeta, StoreResult, StoreStats, TraceQuery};

    struct EmptyStore;

    #[async_trait]
    impl PersistentStore for EmptyStore {
        async fn create_session(
            &self,
            _name: &str,
            _metadata: std::collections::HashMap<String, serde_json::Value>,
        ) -> StoreResult<uuid::Uuid> {
            Ok(uuid::Uuid::new_v4())
        }
        async fn get_session(&self, _id: uuid::Uuid) -> StoreResult<Option<trace_core::Session>> {
            Ok(None)
        }
        async fn update_session(&self, _session: &trace_core::Session) -> StoreResult<()> {
            Ok(())
        }
        async fn upsert_session(&self, _session: &trace_core::Session) -> StoreResult<()> {
            Ok(())
        }
        async fn store_batch(&self, _batch: &[Event]) -> StoreResult<()> {
            Ok(())
        }
        async fn get_trace(&self, _id: uuid::Uuid) -> StoreResult<Option<Event>> {
            Ok(None)
        }
        async fn get_traces_by_session(
            &self,
            _session_id: uuid::Uuid,
            _query: TraceQuery,
        ) -> StoreResult<Vec<Event>> {
            Ok(vec![])
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
            _base_snapshot_id: Option<uuid::Uuid>,
            _bytes: &[u8],
        ) -> StoreResult<()> {
            Ok(())
        }
        async fn get_snapshot(
            &self,
            _id: uuid::Uuid,
        ) -> StoreResult<Option<(trace_core::Snapshot, Option<uuid::Uuid>, Vec<u8>)>> {
            Ok(None)
        }
        async fn delete_snapshot(&self, _id: uuid::Uuid) -> StoreResult<()> {
            Ok(())
        }
        async fn list_snapshots(&self, _session_id: Option<uuid::Uuid>) -> StoreResult<Vec<SnapshotMeta>> {
            Ok(vec![])
        }
        async fn stats(&self) -> StoreResult<StoreStats> {
            Ok(StoreStats {
                session_count: 3,
                trace_count: 10,
                total_bytes: 1024,
            })
        }
        async fn sweep_retention(&self) -> StoreResult<u64> {
            Ok(0)
        }
    }

    fn test_state() -> AppState {
        let store: Arc<dyn PersistentStore> = Arc::new(EmptyStore);
        let snapshots = Arc::new(SnapshotManager::new(Arc::clone(&store), SnapshotManagerConfig::default()));
        let reconstructor = Arc::new(Reconstructor::new(Arc::clone(&store), snapshots));
        AppState {
            store,
            reconstructor,
            clients: Arc::new(DashMap::new()),
            config: Arc::new(StreamingConfig::default()),
        }
    }

    #[actix_web::test]
    async fn healthz_reports_session_count_from_the_store() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/healthz", web::get().to(healthz)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/healthz").to_request()).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["sessions"], 3);
        assert_eq!(body["connected_clients"], 0);
    }

    #[actix_web::test]
    async fn metrics_endpoint_serves_prometheus_text_format() {
        let app = test::init_service(App::new().route("/metrics", web::get().to(metrics))).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert!(resp.status().is_success());
    }
}
