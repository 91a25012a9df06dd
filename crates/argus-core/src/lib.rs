//! Core types, resilience primitives, and orchestration for Argus.
//!
//! The engines that actually touch the network live in `argus-client`;
//! everything here is runtime-agnostic orchestration wired together through
//! the traits in [`traits`].

pub mod aggregator;
pub mod cache;
pub mod circuit_breaker;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod source;
pub mod testutil;
pub mod traits;
pub mod util;

pub use aggregator::{AggregateOptions, MultiSourceAggregator};
pub use cache::{CacheConfig, CacheEntry, ScrapeCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::ScrapeError;
pub use models::{
    Entity, MultiSearchResult, Officer, QueryOptions, ScrapeQuery, ScrapeResult, SourceHealth,
};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use registry::Registry;
pub use router::UnifiedRouter;
pub use source::{SelectorStrategy, Source, SourceConfig, Tier, Transform};
pub use traits::{DetailEnricher, DurableStore, NullEnricher, NullStore, TierEngine, UnavailableEngine};
