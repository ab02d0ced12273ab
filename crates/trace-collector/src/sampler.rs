//! Deterministic counter-based sampler with adaptive rate control
//! (spec §4.3 "Sampling is deterministic counter-based, not random").

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

const ADJUSTMENT_INTERVAL_MS: i64 = 5_000;
const RATE_FLOOR: f64 = 0.1;
const RATE_CEIL: f64 = 1.0;
const OVERHEAD_HIGH: f64 = 0.05;
const OVERHEAD_LOW: f64 = 0.025;
const DECREASE_FACTOR: f64 = 0.8;
const INCREASE_FACTOR: f64 = 1.1;

/// Stores the rate as rate * 1_000_000 in a `u64` so it can be read/written
/// atomically without a lock on the hot path.
pub struct Sampler {
    rate_millionths: AtomicU64,
    counter: AtomicU64,
    last_adjustment_millis: AtomicI64,
}

impl Sampler {
    pub fn new(initial_rate: f64) -> Self {
        Self {
            rate_millionths: AtomicU64::new(rate_to_millionths(initial_rate)),
            counter: AtomicU64::new(0),
            last_adjustment_millis: AtomicI64::new(0),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate_millionths.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }

    fn set_rate(&self, rate: f64) {
        self.rate_millionths
            .store(rate_to_millionths(rate), Ordering::SeqCst);
    }

    /// Candidate admission: increments the counter and admits when it
    /// crosses `ceil(1/rate)`, then resets. Callers must check
    /// `Severity::is_critical` themselves and bypass this call entirely for
    /// critical events (spec: "Severity-critical events bypass sampling
    /// entirely").
    pub fn admit(&self) -> bool {
        let rate = self.rate();
        if rate >= RATE_CEIL {
            return true;
        }
        let threshold = (1.0 / rate).ceil() as u64;
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= threshold {
            self.counter.store(0, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Runs the 5-second adaptive-control window if due. Returns the
    /// computed overhead when an adjustment check ran, for the collector's
    /// `collection_overhead` metric.
    pub fn maybe_adjust(
        &self,
        now_millis: i64,
        avg_processing_ms: f64,
        events_per_second: f64,
    ) -> Option<f64> {
        let last = self.last_adjustment_millis.load(Ordering::SeqCst);
        if now_millis - last < ADJUSTMENT_INTERVAL_MS {
            return None;
        }
        self.last_adjustment_millis.store(now_millis, Ordering::SeqCst);

        let overhead = avg_processing_ms * events_per_second / 1000.0;
        let current = self.rate();
        if overhead > OVERHEAD_HIGH {
            self.set_rate(current * DECREASE_FACTOR);
        } else if overhead < OVERHEAD_LOW {
            self.set_rate(current * INCREASE_FACTOR);
        }
        Some(overhead)
    }
}

fn rate_to_millionths(rate: f64) -> u64 {
    (rate.clamp(RATE_FLOOR, RATE_CEIL) * 1_000_000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_every_nth_candidate_deterministically() {
        let sampler = Sampler::new(0.25); // threshold = 4
        let admits: Vec<bool> = (0..8).map(|_| sampler.admit()).collect();
        assert_eq!(
            admits,
            vec![false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn full_rate_admits_everything() {
        let sampler = Sampler::new(1.0);
        for _ in 0..20 {
            assert!(sampler.admit());
        }
    }

    #[test]
    fn adaptive_control_decreases_rate_on_high_overhead_until_floor() {
        let sampler = Sampler::new(1.0);
        let mut now = 0i64;
        let mut last_rate = sampler.rate();
        for _ in 0..10 {
            now += ADJUSTMENT_INTERVAL_MS;
            sampler.maybe_adjust(now, 10.0, 10_000.0); // overhead = 0.10 > 0.05
            let rate = sampler.rate();
            assert!(rate <= last_rate);
            last_rate = rate;
        }
        assert!((sampler.rate() - RATE_FLOOR).abs() < 1e-9);
    }

    #[test]
    fn adjustment_is_a_noop_before_the_window_elapses() {
        let sampler = Sampler::new(0.5);
        assert!(sampler.maybe_adjust(6_000, 100.0, 100.0).is_some());
        assert!(sampler.maybe_adjust(7_000, 100.0, 100.0).is_none());
    }
}
