//! Per-source scrape orchestration.
//!
//! One `scrape` call walks the full protection pipeline:
//! cache → circuit check → rate-limit acquire → tier dispatch (with one
//! escalation on a blocking signal) → breaker record → cache write-through.
//!
//! The router never propagates engine errors across its boundary: every
//! outcome, including circuit-open rejections and unexpected engine
//! failures, comes back as a structured [`ScrapeResult`].

use std::sync::Arc;
use std::time::Instant;

use crate::error::ScrapeError;
use crate::models::{ScrapeQuery, ScrapeResult};
use crate::registry::Registry;
use crate::source::{Source, Tier};
use crate::traits::{DetailEnricher, DurableStore, NullEnricher, NullStore, TierEngine};

pub struct UnifiedRouter<A, H, B, E = NullEnricher, D = NullStore>
where
    A: TierEngine,
    H: TierEngine,
    B: TierEngine,
    E: DetailEnricher,
    D: DurableStore,
{
    api: A,
    http: H,
    browser: B,
    enricher: E,
    registry: Arc<Registry<D>>,
}

impl<A, H, B> UnifiedRouter<A, H, B>
where
    A: TierEngine,
    H: TierEngine,
    B: TierEngine,
{
    pub fn new(api: A, http: H, browser: B, registry: Arc<Registry>) -> Self {
        Self {
            api,
            http,
            browser,
            enricher: NullEnricher,
            registry,
        }
    }
}

impl<A, H, B, E, D> UnifiedRouter<A, H, B, E, D>
where
    A: TierEngine,
    H: TierEngine,
    B: TierEngine,
    E: DetailEnricher,
    D: DurableStore,
{
    pub fn with_enricher<E2: DetailEnricher>(self, enricher: E2) -> UnifiedRouter<A, H, B, E2, D> {
        UnifiedRouter {
            api: self.api,
            http: self.http,
            browser: self.browser,
            enricher,
            registry: self.registry,
        }
    }

    pub fn with_registry<D2: DurableStore>(
        self,
        registry: Arc<Registry<D2>>,
    ) -> UnifiedRouter<A, H, B, E, D2> {
        UnifiedRouter {
            api: self.api,
            http: self.http,
            browser: self.browser,
            enricher: self.enricher,
            registry,
        }
    }

    pub fn registry(&self) -> &Registry<D> {
        &self.registry
    }

    /// Scrape one source through the full protection pipeline.
    pub async fn scrape(&self, source: &Source, query: &ScrapeQuery) -> ScrapeResult {
        let started = Instant::now();
        let term = query.term();

        if !query.options.skip_cache
            && let Some(entry) = self.registry.cache().get(&source.id, query).await
        {
            tracing::debug!(source = %source.id, query = %term, "Cache hit");
            let mut result =
                ScrapeResult::success(&source.id, term, entry.data, entry.total_found);
            result.scraped_at = entry.created_at;
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        let breaker = self.registry.breaker(&source.id);
        if !breaker.is_allowed() {
            let retry_after = breaker.retry_after().unwrap_or_default();
            let err = ScrapeError::CircuitOpen {
                source_id: source.id.clone(),
                retry_after_ms: retry_after.as_millis() as u64,
            };
            tracing::warn!(source = %source.id, retry_after_ms = retry_after.as_millis() as u64,
                "Skipping source, circuit open");
            return Self::finalize(ScrapeResult::failure(&source.id, term, &err), started);
        }

        self.registry.limiter().acquire(source).await;

        match self.dispatch(source, query).await {
            Ok(mut result) => {
                breaker.record_success();

                let (data, warnings) = self.enricher.enrich(source, result.data).await;
                result.data = data;
                result.warnings.extend(warnings);
                result.total_found = result.total_found.max(result.data.len());

                if !query.options.skip_cache {
                    self.registry
                        .cache()
                        .put(&source.id, query, result.data.clone(), result.total_found)
                        .await;
                }

                tracing::info!(source = %source.id, query = %term,
                    found = result.total_found, "Scrape succeeded");
                Self::finalize(result, started)
            }
            Err(e) => {
                if e.should_trip_circuit() {
                    breaker.record_failure(&e);
                }
                tracing::warn!(source = %source.id, query = %term, error = %e, "Scrape failed");
                Self::finalize(ScrapeResult::failure(&source.id, term, &e), started)
            }
        }
    }

    /// Dispatch to the source's tier engine, escalating once when a cheap
    /// tier hits a blocking signal.
    async fn dispatch(
        &self,
        source: &Source,
        query: &ScrapeQuery,
    ) -> Result<ScrapeResult, ScrapeError> {
        match source.tier {
            Tier::Api => match self.api.scrape(source, query).await {
                Ok(result) => Ok(result),
                Err(e) if source.config.scraping.is_some() => {
                    tracing::warn!(source = %source.id, error = %e,
                        "API tier failed, falling back to HTTP engine");
                    let mut result = self.http.scrape(source, query).await?;
                    result
                        .warnings
                        .push(format!("api tier failed ({e}); served by http fallback"));
                    Ok(result)
                }
                Err(e) => Err(e),
            },
            Tier::Http => match self.http.scrape(source, query).await {
                Ok(result) => Ok(result),
                Err(e) if e.is_blocking() => {
                    tracing::warn!(source = %source.id, signal = %e,
                        "Blocking signal, escalating to browser tier");
                    let mut result = self.browser.scrape(source, query).await?;
                    result
                        .warnings
                        .push("escalated to browser tier after blocking signal".to_string());
                    Ok(result)
                }
                Err(e) => Err(e),
            },
            Tier::Browser | Tier::BrowserCaptcha => self.browser.scrape(source, query).await,
        }
    }

    fn finalize(mut result: ScrapeResult, started: Instant) -> ScrapeResult {
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}
