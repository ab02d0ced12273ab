//! Per-client connection state (spec §4.7 "Connection lifecycle",
//! "Concurrency"): subscription, outbound queue, rate limiter, and health.
//!
//! A [`ClientState`] is shared (`Arc`) between the connection's reader task,
//! its writer task, and the broadcaster. All mutable fields are behind their
//! own short-critical-section lock; the socket itself is touched only by
//! the writer task (spec §9 "per-connection wrapped socket").

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use uuid::Uuid;

use trace_core::{Event, Severity};

use crate::backpressure::OutboundQueue;
use crate::config::StreamingConfig;
use crate::messages::ServerMessage;
use crate::rate_limit::ClientRateLimiter;
use crate::subscription::Subscription;

/// Per-client health sampled by the heartbeat timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientHealth {
    pub last_ping_millis: i64,
    pub last_pong_millis: i64,
    pub latency_ms: Option<i64>,
}

pub struct ClientState {
    pub id: Uuid,
    authenticated: Mutex<bool>,
    subscription: Mutex<Subscription>,
    health: Mutex<ClientHealth>,
    outbound: Mutex<OutboundQueue>,
    rate_limiter: Mutex<ClientRateLimiter>,
    /// Wakes the writer task after `enqueue` adds a message.
    pub outbound_ready: Notify,
    /// Set by the writer task (or stale sweeper) to signal the reader and
    /// heartbeat tasks to unwind.
    pub closed: Notify,
}

impl ClientState {
    pub fn new(id: Uuid, config: &StreamingConfig, now_millis: i64) -> Self {
        Self {
            id,
            authenticated: Mutex::new(!config.auth.enabled),
            subscription: Mutex::new(Subscription::default()),
            health: Mutex::new(ClientHealth {
                last_ping_millis: now_millis,
                last_pong_millis: now_millis,
                latency_ms: None,
            }),
            outbound: Mutex::new(OutboundQueue::new(config.backpressure)),
            rate_limiter: Mutex::new(ClientRateLimiter::new(config.rate_limit, now_millis)),
            outbound_ready: Notify::new(),
            closed: Notify::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.lock().unwrap()
    }

    pub fn set_authenticated(&self, value: bool) {
        *self.authenticated.lock().unwrap() = value;
    }

    pub fn with_subscription<R>(&self, f: impl FnOnce(&mut Subscription) -> R) -> R {
        f(&mut self.subscription.lock().unwrap())
    }

    /// Interest test folding in the auth gate from spec §4.7: unauthenticated
    /// clients may only receive `auth_response` and `error`, sent directly
    /// rather than through this path.
    pub fn is_interested(&self, event: &Event) -> bool {
        self.is_authenticated() && self.subscription.lock().unwrap().is_interested(event)
    }

    /// Enqueues a pre-serialized body shared across every interested
    /// client (spec §4.7 "Fan-out": serialize once, send without
    /// per-client re-serialization). Never blocks.
    pub fn enqueue_raw(&self, body: Arc<str>, severity: Severity) {
        self.outbound.lock().unwrap().push(body, severity);
        self.outbound_ready.notify_one();
    }

    /// Convenience for single-client sends (connection/auth/history
    /// replies) where there's no shared body to reuse.
    pub fn enqueue_message(&self, message: &ServerMessage, severity: Severity) {
        self.enqueue_raw(Arc::from(message.to_json()), severity);
    }

    pub fn dequeue(&self) -> Option<Arc<str>> {
        self.outbound.lock().unwrap().pop()
    }

    pub fn record_ping(&self, now_millis: i64) {
        self.health.lock().unwrap().last_ping_millis = now_millis;
    }

    pub fn record_pong(&self, now_millis: i64) {
        let mut health = self.health.lock().unwrap();
        health.latency_ms = Some((now_millis - health.last_ping_millis).max(0));
        health.last_pong_millis = now_millis;
    }

    pub fn health(&self) -> ClientHealth {
        *self.health.lock().unwrap()
    }

    pub fn is_stale(&self, now_millis: i64, stale_timeout_ms: u64) -> bool {
        let health = self.health.lock().unwrap();
        now_millis - health.last_pong_millis > stale_timeout_ms as i64
    }

    pub fn check_rate_limit(&self, now_millis: i64, message_bytes: u64) -> bool {
        self.rate_limiter.lock().unwrap().admit(now_millis, message_bytes)
    }
}
