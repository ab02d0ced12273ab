//! Filter/sampler (C3) and admission pipeline (C4) for the tracing backbone.
//!
//! Every event submitted to the system passes through a single [`Collector`]
//! instance: validate, sample, rate-limit, filter, sanitize, backpressure,
//! batch, and finally persist plus tee to the streaming fan-out.

pub mod aggregate;
pub mod clock;
pub mod collector;
pub mod dead_letter;
pub mod error;
pub mod filter;
pub mod rate_limiter;
pub mod sampler;
pub mod sanitize;

pub use aggregate::{AgentAggregate, DEFAULT_MAX_EVENTS_PER_AGENT};
pub use clock::{Clock, SystemClock, TestClock};
pub use collector::{Collector, CollectorConfig, CollectorMetrics};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use error::{CollectorError, CollectorResult};
pub use filter::{FilterChain, FilterConfig, UserPredicate};
pub use rate_limiter::{KeyedRateLimiter, RateLimiterConfig};
pub use sampler::Sampler;
