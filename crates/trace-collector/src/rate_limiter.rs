//! Per-(agent, event type) fixed-window rate limiter (spec §4.4 pipeline
//! stage 3: "fixed window (1 s, 100 events per key by default). Over-limit
//! drops.").

use dashmap::DashMap;
use trace_core::EventType;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub window_ms: i64,
    pub max_events_per_window: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: 1_000,
            max_events_per_window: 100,
        }
    }
}

struct Window {
    started_at_millis: i64,
    count: u64,
}

pub struct KeyedRateLimiter {
    config: RateLimiterConfig,
    windows: DashMap<(String, EventType), Window>,
}

impl KeyedRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Returns `true` if the event is admitted, `false` if the key's window
    /// is already at capacity.
    pub fn check(&self, agent_id: &str, event_type: EventType, now_millis: i64) -> bool {
        let key = (agent_id.to_string(), event_type);
        let mut window = self.windows.entry(key).or_insert_with(|| Window {
            started_at_millis: now_millis,
            count: 0,
        });

        if now_millis - window.started_at_millis >= self.config.window_ms {
            window.started_at_millis = now_millis;
            window.count = 0;
        }

        if window.count >= self.config.max_events_per_window {
            false
        } else {
            window.count += 1;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_window_limit_then_drops() {
        let limiter = KeyedRateLimiter::new(RateLimiterConfig {
            window_ms: 1_000,
            max_events_per_window: 3,
        });

        assert!(limiter.check("a1", EventType::TaskStart, 0));
        assert!(limiter.check("a1", EventType::TaskStart, 10));
        assert!(limiter.check("a1", EventType::TaskStart, 20));
        assert!(!limiter.check("a1", EventType::TaskStart, 30));
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = KeyedRateLimiter::new(RateLimiterConfig {
            window_ms: 1_000,
            max_events_per_window: 1,
        });

        assert!(limiter.check("a1", EventType::TaskStart, 0));
        assert!(!limiter.check("a1", EventType::TaskStart, 500));
        assert!(limiter.check("a1", EventType::TaskStart, 1_001));
    }

    #[test]
    fn keys_are_independent_per_agent_and_type() {
        let limiter = KeyedRateLimiter::new(RateLimiterConfig {
            window_ms: 1_000,
            max_events_per_window: 1,
        });

        assert!(limiter.check("a1", EventType::TaskStart, 0));
        assert!(limiter.check("a1", EventType::TaskComplete, 0));
        assert!(limiter.check("a2", EventType::TaskStart, 0));
    }
}
