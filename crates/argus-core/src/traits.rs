use std::future::Future;

use crate::cache::CacheEntry;
use crate::error::ScrapeError;
use crate::models::{Entity, ScrapeQuery, ScrapeResult};
use crate::source::Source;

/// A tier engine: one access technique for fetching results from a source.
///
/// Engines return `Ok` only for a completed scrape; every failure mode is a
/// `ScrapeError`, which the router converts into a structured result and
/// records against the breaker.
pub trait TierEngine: Send + Sync + Clone {
    fn scrape(
        &self,
        source: &Source,
        query: &ScrapeQuery,
    ) -> impl Future<Output = Result<ScrapeResult, ScrapeError>> + Send;
}

/// Engine slot for a tier this build cannot serve (e.g. the browser engine
/// when the `browser` feature is off). Always fails with a per-source
/// configuration error, which does not trip the breaker.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableEngine {
    pub reason: &'static str,
}

impl UnavailableEngine {
    pub fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl TierEngine for UnavailableEngine {
    async fn scrape(
        &self,
        source: &Source,
        _query: &ScrapeQuery,
    ) -> Result<ScrapeResult, ScrapeError> {
        Err(ScrapeError::Config {
            source_id: source.id.clone(),
            message: self.reason.to_string(),
        })
    }
}

/// Follow-up enrichment of result stubs from per-entity detail pages.
///
/// Infallible by contract: a failed detail fetch keeps the original stub,
/// so the implementation returns the (possibly partially) enriched batch
/// plus human-readable warnings.
pub trait DetailEnricher: Send + Sync + Clone {
    fn enrich(
        &self,
        source: &Source,
        entities: Vec<Entity>,
    ) -> impl Future<Output = (Vec<Entity>, Vec<String>)> + Send;
}

/// Enricher that passes stubs through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEnricher;

impl DetailEnricher for NullEnricher {
    async fn enrich(&self, _source: &Source, entities: Vec<Entity>) -> (Vec<Entity>, Vec<String>) {
        (entities, Vec::new())
    }
}

/// Durable second cache tier (disk, Redis, …). The in-process tier is
/// always present; this one is optional and best-effort.
pub trait DurableStore: Send + Sync + Clone {
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<CacheEntry>, ScrapeError>> + Send;

    fn put(&self, entry: &CacheEntry) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    fn clear_source(&self, source_id: &str)
    -> impl Future<Output = Result<(), ScrapeError>> + Send;
}

/// A no-op DurableStore for cache setups without a durable tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl DurableStore for NullStore {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, ScrapeError> {
        Ok(None)
    }

    async fn put(&self, _entry: &CacheEntry) -> Result<(), ScrapeError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), ScrapeError> {
        Ok(())
    }

    async fn clear_source(&self, _source_id: &str) -> Result<(), ScrapeError> {
        Ok(())
    }
}
