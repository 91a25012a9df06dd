//! Owned container for all per-source protection state.
//!
//! Breakers, the rate limiter, and the cache live here and are passed by
//! reference to the router. No module-level globals: tests and embedders
//! construct isolated instances.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::cache::{CacheConfig, ScrapeCache};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::models::SourceHealth;
use crate::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::source::Source;
use crate::traits::{DurableStore, NullStore};

pub struct Registry<D: DurableStore = NullStore> {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
    limiter: RateLimiter,
    cache: ScrapeCache<D>,
}

impl Registry<NullStore> {
    pub fn new() -> Self {
        Self::with_parts(
            CircuitBreakerConfig::default(),
            RateLimiter::new(RateLimiterConfig::default()),
            ScrapeCache::new(CacheConfig::default()),
        )
    }
}

impl Default for Registry<NullStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DurableStore> Registry<D> {
    pub fn with_parts(
        breaker_config: CircuitBreakerConfig,
        limiter: RateLimiter,
        cache: ScrapeCache<D>,
    ) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            breaker_config,
            limiter,
            cache,
        }
    }

    /// The breaker for a source, created lazily on first use. The returned
    /// handle shares state with the registry's copy.
    pub fn breaker(&self, source_id: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        breakers
            .entry(source_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(source_id, self.breaker_config.clone()))
            .clone()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ScrapeCache<D> {
        &self.cache
    }

    /// Per-source operational health snapshot.
    pub fn health(&self, sources: &[Source]) -> Vec<SourceHealth> {
        sources
            .iter()
            .map(|source| {
                let stats = self.breaker(&source.id).stats();
                SourceHealth {
                    source: source.id.clone(),
                    tier: source.tier,
                    circuit_state: stats.state,
                    failure_count: stats.failure_count,
                    is_available: stats.state != crate::circuit_breaker::CircuitState::Open,
                    retry_after_ms: stats
                        .time_until_half_open
                        .map(|d| d.as_millis() as u64),
                }
            })
            .collect()
    }

    /// Force a source's breaker back to closed. Returns false when the
    /// source has no breaker yet (nothing to reset).
    pub fn reset(&self, source_id: &str) -> bool {
        let breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        match breakers.get(source_id) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::error::ScrapeError;
    use crate::source::Tier;
    use crate::testutil::make_source;

    #[test]
    fn test_breaker_created_lazily_and_shared() {
        let registry = Registry::new();
        let a = registry.breaker("fl_sunbiz");
        let b = registry.breaker("fl_sunbiz");

        a.record_failure(&ScrapeError::Network("down".into()));
        assert_eq!(b.stats().failure_count, 1, "handles must share state");
    }

    #[test]
    fn test_health_reports_open_breaker() {
        let registry = Registry::with_parts(
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            RateLimiter::default(),
            ScrapeCache::new(CacheConfig::default()),
        );
        let sources = vec![make_source("fl_sunbiz", Tier::Http), make_source("ga_sos", Tier::Api)];

        registry
            .breaker("fl_sunbiz")
            .record_failure(&ScrapeError::Timeout(30));

        let health = registry.health(&sources);
        assert_eq!(health.len(), 2);

        let fl = health.iter().find(|h| h.source == "fl_sunbiz").unwrap();
        assert_eq!(fl.circuit_state, CircuitState::Open);
        assert!(!fl.is_available);
        assert!(fl.retry_after_ms.is_some());

        let ga = health.iter().find(|h| h.source == "ga_sos").unwrap();
        assert_eq!(ga.circuit_state, CircuitState::Closed);
        assert!(ga.is_available);
    }

    #[test]
    fn test_reset() {
        let registry = Registry::with_parts(
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            RateLimiter::default(),
            ScrapeCache::new(CacheConfig::default()),
        );

        assert!(!registry.reset("fl_sunbiz"), "no breaker yet");

        let breaker = registry.breaker("fl_sunbiz");
        breaker.record_failure(&ScrapeError::Timeout(30));
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(registry.reset("fl_sunbiz"));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
