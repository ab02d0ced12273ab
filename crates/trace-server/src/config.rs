//! Process configuration: TOML file plus environment-variable overrides,
//! in the teacher's `GatewayConfig::from_env` style (serde `Deserialize`
//! for the file shape, then `env::var(...).unwrap_or_else(...)` reads
//! layered on top for anything an operator needs to override without
//! editing the file). Recognizes every key in spec §6.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use trace_collector::{CollectorConfig, RateLimiterConfig};
use trace_snapshot::SnapshotManagerConfig;
use trace_store::StoreConfig;
use trace_streaming::{AuthConfig, BackpressureConfig, RateLimitConfig, StreamingConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorFileConfig {
    pub enabled: bool,
    pub sampling_rate: f64,
    pub buffer_size: usize,
    pub flush_interval_ms: i64,
    pub batch_size: usize,
    pub rate_limit_window_ms: i64,
    pub rate_limit_max_events_per_window: u64,
    pub max_events_per_agent: usize,
    pub dead_letter_capacity: usize,
}

impl Default for CollectorFileConfig {
    fn default() -> Self {
        let c = CollectorConfig::default();
        Self {
            enabled: c.enabled,
            sampling_rate: c.sampling_rate,
            buffer_size: c.buffer_size,
            flush_interval_ms: c.flush_interval_ms,
            batch_size: c.batch_size,
            rate_limit_window_ms: c.rate_limit.window_ms,
            rate_limit_max_events_per_window: c.rate_limit.max_events_per_window,
            max_events_per_agent: c.max_events_per_agent,
            dead_letter_capacity: c.dead_letter_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreFileConfig {
    pub database_url: String,
    pub connection_pool_size: u32,
    pub storage_retention_ms: i64,
    pub storage_retention_error_ms: i64,
}

impl Default for StoreFileConfig {
    fn default() -> Self {
        let c = StoreConfig::default();
        Self {
            database_url: c.database_url,
            connection_pool_size: c.connection_pool_size,
            storage_retention_ms: c.retention_default_ms,
            storage_retention_error_ms: c.retention_error_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotFileConfig {
    pub compression_threshold_bytes: usize,
    pub max_retention_ms: i64,
    pub max_snapshots_per_session: usize,
    pub incremental_enabled: bool,
    pub checksum_validation: bool,
    pub automatic_interval_ms: u64,
}

impl Default for SnapshotFileConfig {
    fn default() -> Self {
        let c = SnapshotManagerConfig::default();
        Self {
            compression_threshold_bytes: c.compression_threshold_bytes,
            max_retention_ms: c.max_retention_ms,
            max_snapshots_per_session: c.max_snapshots_per_session,
            incremental_enabled: c.incremental_enabled,
            checksum_validation: c.checksum_validation,
            automatic_interval_ms: c.automatic_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingFileConfig {
    pub port: u16,
    pub max_connections: usize,
    pub heartbeat_interval_ms: u64,
    pub stale_timeout_ms: u64,
    pub max_message_size: usize,
    pub binary_protocol: bool,
    pub historical_data_limit: usize,
    pub historical_query_timeout_ms: u64,
    pub auth_enabled: bool,
    pub auth_api_keys: Vec<String>,
    pub rate_limit_window_ms: i64,
    pub rate_limit_max_messages: u32,
    pub rate_limit_max_bytes_per_window: u64,
    pub backpressure_high_water: usize,
    pub backpressure_low_water: usize,
    pub backpressure_max_queue_size: usize,
    pub backpressure_drop_oldest: bool,
}

impl Default for StreamingFileConfig {
    fn default() -> Self {
        let c = StreamingConfig::default();
        Self {
            port: c.port,
            max_connections: c.max_connections,
            heartbeat_interval_ms: c.heartbeat_interval_ms,
            stale_timeout_ms: c.stale_timeout_ms,
            max_message_size: c.max_message_size,
            binary_protocol: c.binary_protocol,
            historical_data_limit: c.historical_data_limit,
            historical_query_timeout_ms: c.historical_query_timeout_ms,
            auth_enabled: c.auth.enabled,
            auth_api_keys: c.auth.api_keys,
            rate_limit_window_ms: c.rate_limit.window_ms,
            rate_limit_max_messages: c.rate_limit.max_messages,
            rate_limit_max_bytes_per_window: c.rate_limit.max_bytes_per_window,
            backpressure_high_water: c.backpressure.high_water,
            backpressure_low_water: c.backpressure.low_water,
            backpressure_max_queue_size: c.backpressure.max_queue_size,
            backpressure_drop_oldest: c.backpressure.drop_oldest,
        }
    }
}

/// Top-level on-disk/env shape. `realtime_streaming` and
/// `performance_monitoring` gate ambient behavior that `trace-server`
/// wires up (the tee channel and the periodic `PERFORMANCE_METRIC`
/// emitter) rather than belonging to any one subsystem config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub realtime_streaming: bool,
    pub performance_monitoring: bool,
    pub log_level: String,
    pub collector: CollectorFileConfig,
    pub store: StoreFileConfig,
    pub snapshot: SnapshotFileConfig,
    pub streaming: StreamingFileConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            realtime_streaming: true,
            performance_monitoring: false,
            log_level: "info".to_string(),
            collector: CollectorFileConfig::default(),
            store: StoreFileConfig::default(),
            snapshot: SnapshotFileConfig::default(),
            streaming: StreamingFileConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Fully resolved configuration, split into the typed sub-configs each
/// subsystem constructor expects (spec-full §2.2).
#[derive(Debug, Clone)]
pub struct Config {
    pub realtime_streaming: bool,
    pub performance_monitoring: bool,
    pub log_level: String,
    pub collector: CollectorConfig,
    pub store: StoreConfig,
    pub snapshot: SnapshotManagerConfig,
    pub streaming: StreamingConfig,
}

impl Config {
    /// Loads `path` if it exists (TOML), otherwise starts from defaults,
    /// then layers environment-variable overrides on top, matching the
    /// teacher's `GatewayConfig::from_env` pattern of checking `env::var`
    /// for anything operationally sensitive (ports, secrets, DB URL).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                })?;
                toml::from_str::<FileConfig>(&contents).map_err(|e| ConfigError::Parse {
                    path: path.display().to_string(),
                    source: e,
                })?
            }
            _ => FileConfig::default(),
        };

        let mut config = Config::from_file(file);
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: FileConfig) -> Self {
        Self {
            realtime_streaming: file.realtime_streaming,
            performance_monitoring: file.performance_monitoring,
            log_level: file.log_level,
            collector: CollectorConfig {
                enabled: file.collector.enabled,
                sampling_rate: file.collector.sampling_rate,
                buffer_size: file.collector.buffer_size,
                flush_interval_ms: file.collector.flush_interval_ms,
                batch_size: file.collector.batch_size,
                rate_limit: RateLimiterConfig {
                    window_ms: file.collector.rate_limit_window_ms,
                    max_events_per_window: file.collector.rate_limit_max_events_per_window,
                },
                max_events_per_agent: file.collector.max_events_per_agent,
                dead_letter_capacity: file.collector.dead_letter_capacity,
            },
            store: StoreConfig {
                database_url: file.store.database_url,
                connection_pool_size: file.store.connection_pool_size,
                retention_default_ms: file.store.storage_retention_ms,
                retention_error_ms: file.store.storage_retention_error_ms,
            },
            snapshot: SnapshotManagerConfig {
                compression_threshold_bytes: file.snapshot.compression_threshold_bytes,
                max_retention_ms: file.snapshot.max_retention_ms,
                max_snapshots_per_session: file.snapshot.max_snapshots_per_session,
                incremental_enabled: file.snapshot.incremental_enabled,
                checksum_validation: file.snapshot.checksum_validation,
                automatic_interval_ms: file.snapshot.automatic_interval_ms,
            },
            streaming: StreamingConfig {
                port: file.streaming.port,
                max_connections: file.streaming.max_connections,
                heartbeat_interval_ms: file.streaming.heartbeat_interval_ms,
                stale_timeout_ms: file.streaming.stale_timeout_ms,
                max_message_size: file.streaming.max_message_size,
                auth: AuthConfig {
                    enabled: file.streaming.auth_enabled,
                    api_keys: file.streaming.auth_api_keys,
                },
                rate_limit: RateLimitConfig {
                    window_ms: file.streaming.rate_limit_window_ms,
                    max_messages: file.streaming.rate_limit_max_messages,
                    max_bytes_per_window: file.streaming.rate_limit_max_bytes_per_window,
                },
                backpressure: BackpressureConfig {
                    high_water: file.streaming.backpressure_high_water,
                    low_water: file.streaming.backpressure_low_water,
                    max_queue_size: file.streaming.backpressure_max_queue_size,
                    drop_oldest: file.streaming.backpressure_drop_oldest,
                },
                binary_protocol: file.streaming.binary_protocol,
                historical_data_limit: file.streaming.historical_data_limit,
                historical_query_timeout_ms: file.streaming.historical_query_timeout_ms,
            },
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.store.database_url = url;
        }
        if let Ok(port) = env::var("TRACEBACKBONE_PORT") {
            if let Ok(port) = port.parse() {
                self.streaming.port = port;
            }
        }
        if let Ok(level) = env::var("RUST_LOG") {
            self.log_level = level;
        }
        if let Ok(keys) = env::var("TRACEBACKBONE_API_KEYS") {
            self.streaming.auth.api_keys =
                keys.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            if !self.streaming.auth.api_keys.is_empty() {
                self.streaming.auth.enabled = true;
            }
        }
        if let Ok(rate) = env::var("TRACEBACKBONE_SAMPLING_RATE") {
            if let Ok(rate) = rate.parse() {
                self.collector.sampling_rate = rate;
            }
        }
    }

    /// Validation failures map to process exit code 2 (spec §6).
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.collector.sampling_rate) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "sampling_rate must be in [0, 1], got {}",
                    self.collector.sampling_rate
                ),
            });
        }
        if self.collector.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                message: "buffer_size must be greater than zero".to_string(),
            });
        }
        if self.collector.batch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "batch_size must be greater than zero".to_string(),
            });
        }
        if self.store.database_url.is_empty() {
            return Err(ConfigError::Invalid {
                message: "store.database_url must not be empty".to_string(),
            });
        }
        if self.streaming.backpressure.low_water >= self.streaming.backpressure.high_water {
            return Err(ConfigError::Invalid {
                message: "streaming.backpressure low_water must be below high_water".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let config = Config::from_file(FileConfig::default());
        config.validate().expect("defaults should be valid");
    }

    #[test]
    fn out_of_range_sampling_rate_is_rejected() {
        let mut file = FileConfig::default();
        file.collector.sampling_rate = 2.0;
        let config = Config::from_file(file);
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_changes_port() {
        env::set_var("TRACEBACKBONE_PORT", "9999");
        let mut config = Config::from_file(FileConfig::default());
        config.apply_env_overrides();
        assert_eq!(config.streaming.port, 9999);
        env::remove_var("TRACEBACKBONE_PORT");
    }

    #[test]
    fn toml_round_trip_parses_nested_sections() {
        let toml_src = r#"
            realtime_streaming = true

            [collector]
            sampling_rate = 0.5
            batch_size = 250

            [streaming]
            port = 9100
            auth_enabled = true
            auth_api_keys = ["abc", "def"]
        "#;
        let file: FileConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(file.collector.sampling_rate, 0.5);
        assert_eq!(file.collector.batch_size, 250);
        assert_eq!(file.streaming.port, 9100);
        assert_eq!(file.streaming.auth_api_keys, vec!["abc", "def"]);
    }
}
