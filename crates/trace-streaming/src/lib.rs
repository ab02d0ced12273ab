//! Live and historical event streaming server (C7): WebSocket fan-out with
//! per-client auth, subscription filters, backpressure, and rate limits.

pub mod auth;
pub mod backpressure;
pub mod broadcaster;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod messages;
pub mod rate_limit;
pub mod server;
pub mod subscription;

pub use client::{ClientHealth, ClientState};
pub use config::{AuthConfig, BackpressureConfig, RateLimitConfig, StreamingConfig};
pub use error::{StreamingError, StreamingResult};
pub use handler::AppState;
pub use messages::{ClientMessage, ServerMessage};
pub use subscription::Subscription;
