//! Recognized configuration keys from spec §6 ("Streaming: ...").

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window_ms: i64,
    pub max_messages: u32,
    pub max_bytes_per_window: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_messages: 600,
            max_bytes_per_window: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub high_water: usize,
    pub low_water: usize,
    pub max_queue_size: usize,
    pub drop_oldest: bool,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_water: 1_000_000,
            low_water: 250_000,
            max_queue_size: 10_000,
            drop_oldest: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub port: u16,
    pub max_connections: usize,
    pub heartbeat_interval_ms: u64,
    pub stale_timeout_ms: u64,
    pub max_message_size: usize,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub backpressure: BackpressureConfig,
    pub binary_protocol: bool,
    pub historical_data_limit: usize,
    pub historical_query_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_connections: 10_000,
            heartbeat_interval_ms: 15_000,
            stale_timeout_ms: 60_000,
            max_message_size: 1024 * 1024,
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            backpressure: BackpressureConfig::default(),
            binary_protocol: false,
            historical_data_limit: 100,
            historical_query_timeout_ms: 30_000,
        }
    }
}
