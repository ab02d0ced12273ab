//! Per-client inbound rate limit (spec §4.7 "Per-client rate limit"):
//! fixed window over message count and byte volume.

use crate::config::RateLimitConfig;

pub struct ClientRateLimiter {
    config: RateLimitConfig,
    window_start_millis: i64,
    messages_in_window: u32,
    bytes_in_window: u64,
}

impl ClientRateLimiter {
    pub fn new(config: RateLimitConfig, now_millis: i64) -> Self {
        Self {
            config,
            window_start_millis: now_millis,
            messages_in_window: 0,
            bytes_in_window: 0,
        }
    }

    /// Returns `true` if the message is admitted, `false` if it exceeds the
    /// window's message or byte budget and should be dropped.
    pub fn admit(&mut self, now_millis: i64, message_bytes: u64) -> bool {
        if now_millis - self.window_start_millis >= self.config.window_ms {
            self.window_start_millis = now_millis;
            self.messages_in_window = 0;
            self.bytes_in_window = 0;
        }

        if self.messages_in_window >= self.config.max_messages
            || self.bytes_in_window + message_bytes > self.config.max_bytes_per_window
        {
            return false;
        }

        self.messages_in_window += 1;
        self.bytes_in_window += message_bytes;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_message_cap_then_rejects() {
        let config = RateLimitConfig {
            window_ms: 1_000,
            max_messages: 2,
            max_bytes_per_window: 1_000_000,
        };
        let mut limiter = ClientRateLimiter::new(config, 0);
        assert!(limiter.admit(0, 10));
        assert!(limiter.admit(0, 10));
        assert!(!limiter.admit(0, 10));
    }

    #[test]
    fn window_resets_after_the_configured_duration() {
        let config = RateLimitConfig {
            window_ms: 1_000,
            max_messages: 1,
            max_bytes_per_window: 1_000_000,
        };
        let mut limiter = ClientRateLimiter::new(config, 0);
        assert!(limiter.admit(0, 10));
        assert!(!limiter.admit(500, 10));
        assert!(limiter.admit(1_000, 10));
    }

    #[test]
    fn byte_budget_is_enforced_independently_of_message_count() {
        let config = RateLimitConfig {
            window_ms: 1_000,
            max_messages: 100,
            max_bytes_per_window: 15,
        };
        let mut limiter = ClientRateLimiter::new(config, 0);
        assert!(limiter.admit(0, 10));
        assert!(!limiter.admit(0, 10));
    }
}
