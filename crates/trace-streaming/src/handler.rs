//! Per-connection lifecycle (spec §4.7 "Connection lifecycle", "Concurrency"):
//! reader, writer, and heartbeat run as three independent tasks sharing one
//! [`ClientState`], in the teacher's tokio-task + `actix_ws` direct-API style
//! rather than the actor framework.

use std::sync::Arc;
use std::time::Duration;

use actix_ws::Message;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use trace_core::{Event, Severity};
use trace_reconstruct::Reconstructor;
use trace_store::{PersistentStore, TraceQuery};

use crate::auth::AuthMode;
use crate::broadcaster::ClientTable;
use crate::client::ClientState;
use crate::config::StreamingConfig;
use crate::messages::{ChunkInfo, ClientMessage, Limits, ServerInfo, ServerMessage, TimeRange};

/// Shared handles every connection needs; built once at server startup.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PersistentStore>,
    pub reconstructor: Arc<Reconstructor>,
    pub clients: ClientTable,
    pub config: Arc<StreamingConfig>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drives one accepted WebSocket connection end to end: registers the
/// client, spawns its writer and heartbeat tasks, then reads until the
/// socket closes or the connection goes stale.
pub async fn run_connection(
    state: AppState,
    mut session: actix_ws::Session,
    mut stream: actix_ws::MessageStream,
) {
    let client_id = Uuid::new_v4();
    let client = Arc::new(ClientState::new(client_id, &state.config, now_millis()));
    state.clients.insert(client_id, Arc::clone(&client));
    trace_core::metrics::STREAMING_CLIENTS_CONNECTED.inc();
    info!(%client_id, "streaming client connected");

    client.enqueue_message(
        &ServerMessage::Connection {
            client_id,
            server_info: ServerInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                capabilities: vec![
                    "subscribe_session".to_string(),
                    "request_history".to_string(),
                    "time_travel".to_string(),
                    "filter_agents".to_string(),
                ],
                limits: Limits {
                    max_message_size: state.config.max_message_size,
                    batch_size: state.config.historical_data_limit,
                },
            },
        },
        Severity::Low,
    );

    let auth_mode = AuthMode::from_config(&state.config.auth);
    if !auth_mode.requires_auth() {
        client.set_authenticated(true);
    }

    let writer_client = Arc::clone(&client);
    let writer_session = session.clone();
    let writer_handle = tokio::spawn(async move { writer_task(writer_client, writer_session).await });

    let heartbeat_client = Arc::clone(&client);
    let heartbeat_config = Arc::clone(&state.config);
    let heartbeat_handle =
        tokio::spawn(async move { heartbeat_task(heartbeat_client, heartbeat_config).await });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handle_text(&state, &client, &auth_mode, text.as_ref()).await;
            }
            Ok(Message::Ping(bytes)) => {
                let _ = session.pong(&bytes).await;
            }
            Ok(Message::Pong(_)) => {
                client.record_pong(now_millis());
            }
            Ok(Message::Close(reason)) => {
                debug!(%client_id, ?reason, "client closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%client_id, error = %e, "websocket stream error");
                break;
            }
        }
    }

    client.closed.notify_waiters();
    writer_handle.abort();
    heartbeat_handle.abort();
    state.clients.remove(&client_id);
    trace_core::metrics::STREAMING_CLIENTS_CONNECTED.dec();
    info!(%client_id, "streaming client disconnected");
}

/// Drains the client's outbound queue into the socket, woken by
/// `outbound_ready` rather than polling (spec §9 "per-client writer queue").
async fn writer_task(client: Arc<ClientState>, mut session: actix_ws::Session) {
    loop {
        while let Some(body) = client.dequeue() {
            if session.text(body.to_string()).await.is_err() {
                return;
            }
        }
        tokio::select! {
            _ = client.outbound_ready.notified() => {}
            _ = client.closed.notified() => return,
        }
    }
}

/// Periodic ping plus stale-connection detection (spec §4.7 "Heartbeat").
async fn heartbeat_task(client: Arc<ClientState>, config: Arc<StreamingConfig>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.heartbeat_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = client.closed.notified() => return,
        }
        let now = now_millis();
        if client.is_stale(now, config.stale_timeout_ms) {
            warn!(client_id = %client.id, "client connection stale, closing");
            client.closed.notify_waiters();
            return;
        }
        client.record_ping(now);
        client.enqueue_message(
            &ServerMessage::Heartbeat {
                timestamp: now,
                metrics: serde_json::json!({ "latency_ms": client.health().latency_ms }),
            },
            Severity::Low,
        );
    }
}

async fn handle_text(state: &AppState, client: &Arc<ClientState>, auth_mode: &AuthMode, text: &str) {
    if !client.check_rate_limit(now_millis(), text.len() as u64) {
        client.enqueue_message(&ServerMessage::error("RATE_LIMITED", "slow down"), Severity::Medium);
        return;
    }

    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            client.enqueue_message(
                &ServerMessage::error("INVALID_REQUEST", format!("malformed message: {e}")),
                Severity::Low,
            );
            return;
        }
    };

    if !client.is_authenticated() {
        match &message {
            ClientMessage::Auth { token } => {
                let ok = auth_mode.verify(token);
                client.set_authenticated(ok);
                client.enqueue_message(&ServerMessage::AuthResponse { authenticated: ok }, Severity::Low);
                if !ok {
                    client.enqueue_message(&ServerMessage::error("AUTH_FAILED", "invalid credentials"), Severity::Low);
                }
            }
            _ => {
                client.enqueue_message(&ServerMessage::error("AUTH_FAILED", "authenticate first"), Severity::Low);
            }
        }
        return;
    }

    match message {
        ClientMessage::Auth { token } => {
            let ok = auth_mode.verify(&token);
            client.enqueue_message(&ServerMessage::AuthResponse { authenticated: ok }, Severity::Low);
        }
        ClientMessage::SubscribeSession { session_id } => {
            subscribe_session(state, client, session_id).await;
        }
        ClientMessage::FilterAgents { agent_ids } => {
            client.with_subscription(|sub| {
                sub.agent_filter = if agent_ids.is_empty() {
                    None
                } else {
                    Some(agent_ids.into_iter().collect())
                };
            });
        }
        ClientMessage::RequestHistory { time_range } => {
            request_history(state, client, time_range).await;
        }
        ClientMessage::TimeTravel { timestamp } => {
            time_travel(state, client, timestamp).await;
        }
        ClientMessage::SetBreakpoint { .. } | ClientMessage::RemoveBreakpoint { .. } => {
            // Breakpoint evaluation belongs to the reconstructor's replay path;
            // acknowledged here so clients can poll history around the trace
            // instead of blocking on a live server-side watch.
            client.enqueue_message(
                &ServerMessage::error("INVALID_REQUEST", "breakpoints are resolved via request_history replay"),
                Severity::Low,
            );
        }
        ClientMessage::Heartbeat {} => {
            client.record_pong(now_millis());
        }
    }
}

async fn subscribe_session(state: &AppState, client: &Arc<ClientState>, session_id: Uuid) {
    match state.store.get_session(session_id).await {
        Ok(Some(session)) => {
            client.with_subscription(|sub| {
                sub.session_ids.insert(session_id);
            });
            client.enqueue_message(&ServerMessage::SessionInfo { session }, Severity::Low);

            let query = TraceQuery {
                limit: Some(state.config.historical_data_limit as i64),
                ..Default::default()
            };
            match state.store.get_traces_by_session(session_id, query).await {
                Ok(traces) => {
                    client.enqueue_message(&ServerMessage::InitialTraces { traces }, Severity::Low)
                }
                Err(e) => client.enqueue_message(
                    &ServerMessage::error("HISTORY_ERROR", e.to_string()),
                    Severity::Medium,
                ),
            }
        }
        Ok(None) => client.enqueue_message(
            &ServerMessage::error("SESSION_ERROR", format!("unknown session {session_id}")),
            Severity::Low,
        ),
        Err(e) => client.enqueue_message(
            &ServerMessage::error("SESSION_ERROR", e.to_string()),
            Severity::Medium,
        ),
    }
}

/// Delivers history in chunks of `historical_data_limit` so one request
/// can't monopolize the outbound queue (spec §4.7 "Historical Data Request").
async fn request_history(state: &AppState, client: &Arc<ClientState>, time_range: TimeRange) {
    let session_ids: Vec<Uuid> = client.with_subscription(|sub| sub.session_ids.iter().copied().collect());
    if session_ids.is_empty() {
        client.enqueue_message(
            &ServerMessage::error("INVALID_REQUEST", "subscribe to a session before requesting history"),
            Severity::Low,
        );
        return;
    }

    let chunk_size = state.config.historical_data_limit.max(1);
    for session_id in session_ids {
        let query = TraceQuery {
            time_range: Some(time_range.into()),
            ..Default::default()
        };
        let traces = match state.store.get_traces_by_session(session_id, query).await {
            Ok(t) => t,
            Err(e) => {
                client.enqueue_message(&ServerMessage::error("HISTORY_ERROR", e.to_string()), Severity::Medium);
                continue;
            }
        };
        let total = traces.len();
        let chunks: Vec<&[Event]> = traces.chunks(chunk_size).collect();
        let chunk_count = chunks.len().max(1);
        for (idx, chunk) in chunks.into_iter().enumerate() {
            client.enqueue_message(
                &ServerMessage::HistoricalData {
                    time_range,
                    traces: chunk.to_vec(),
                    chunk_info: ChunkInfo {
                        current: idx + 1,
                        total: chunk_count,
                        is_last: idx + 1 == chunk_count,
                    },
                    total,
                },
                Severity::Low,
            );
        }
    }
}

async fn time_travel(state: &AppState, client: &Arc<ClientState>, timestamp: i64) {
    let session_ids: Vec<Uuid> = client.with_subscription(|sub| sub.session_ids.iter().copied().collect());
    if session_ids.is_empty() {
        client.enqueue_message(
            &ServerMessage::error("INVALID_REQUEST", "subscribe to a session before time travel"),
            Severity::Low,
        );
        return;
    }

    for session_id in session_ids {
        let deadline = Duration::from_millis(state.config.historical_query_timeout_ms);
        // `reconstruct` validates the point in time is servable (cache-aware,
        // backed by the nearest snapshot) before we report the event trail
        // that produced that state.
        let result = tokio::time::timeout(deadline, state.reconstructor.reconstruct(session_id, timestamp)).await;
        match result {
            Ok(Ok(_system_state)) => {
                let query = TraceQuery {
                    time_range: Some(i64::MIN..timestamp.saturating_add(1)),
                    limit: Some(state.config.historical_data_limit as i64),
                    ..Default::default()
                };
                match state.store.get_traces_by_session(session_id, query).await {
                    Ok(traces) => {
                        let total = traces.len();
                        client.enqueue_message(
                            &ServerMessage::TimeTravelState { timestamp, traces, total },
                            Severity::Low,
                        );
                    }
                    Err(e) => client.enqueue_message(
                        &ServerMessage::error("TIME_TRAVEL_ERROR", e.to_string()),
                        Severity::Medium,
                    ),
                }
            }
            Ok(Err(e)) => client.enqueue_message(
                &ServerMessage::error("TIME_TRAVEL_ERROR", e.to_string()),
                Severity::Medium,
            ),
            Err(_) => client.enqueue_message(
                &ServerMessage::error("TIME_TRAVEL_ERROR", "reconstruction timed out"),
                Severity::Medium,
            ),
        }
    }
}
