//! Detail-page enrichment.
//!
//! Result lists carry stubs; the full officer roster, registered agent, and
//! addresses usually live one click deeper. This engine follows each stub's
//! detail URL in fixed-size concurrent batches with an inter-batch delay.
//! A per-item failure keeps the original stub untouched; partial
//! enrichment is batch success, not failure.

use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use reqwest::header::USER_AGENT;

use argus_core::error::ScrapeError;
use argus_core::models::Entity;
use argus_core::source::{DetailConfig, Source};
use argus_core::traits::DetailEnricher;
use argus_core::util;

use crate::extract;
use crate::http_engine::USER_AGENTS;

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Detail pages fetched concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay: Duration,
    pub timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Bounded-concurrency detail fetcher for enriching result stubs.
#[derive(Clone)]
pub struct DetailEnrichmentEngine {
    client: Client,
    config: EnrichmentConfig,
}

impl DetailEnrichmentEngine {
    pub fn new() -> Result<Self, ScrapeError> {
        Self::with_config(EnrichmentConfig::default())
    }

    pub fn with_config(config: EnrichmentConfig) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ScrapeError::Http(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn fetch_detail(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, *util::pick(USER_AGENTS))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScrapeError::Timeout(self.config.timeout.as_secs())
                } else {
                    ScrapeError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ScrapeError::Http(format!(
                "HTTP {} for detail page",
                response.status().as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ScrapeError::Http(format!("Failed to read detail body: {e}")))
    }

    /// Fetch and merge one entity's detail page. Returns the entity (always)
    /// and whether the fetch failed.
    async fn enrich_one(&self, config: &DetailConfig, mut entity: Entity) -> (Entity, bool) {
        let Some(url) = entity.detail_url.clone() else {
            return (entity, false);
        };

        match self.fetch_detail(&url).await {
            Ok(html) => {
                let detail = extract::parse_detail(&html, config);
                extract::apply_detail(&mut entity, detail);
                (entity, false)
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Detail fetch failed, keeping stub");
                (entity, true)
            }
        }
    }
}

impl DetailEnricher for DetailEnrichmentEngine {
    async fn enrich(&self, source: &Source, entities: Vec<Entity>) -> (Vec<Entity>, Vec<String>) {
        let Some(detail_config) = source
            .config
            .scraping
            .as_ref()
            .and_then(|s| s.detail.as_ref())
        else {
            return (entities, Vec::new());
        };

        let total = entities.len();
        let mut enriched = Vec::with_capacity(total);
        let mut failures = 0usize;

        for (i, batch) in into_batches(entities, self.config.batch_size)
            .into_iter()
            .enumerate()
        {
            if i > 0 {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            let outcomes = join_all(
                batch
                    .into_iter()
                    .map(|entity| self.enrich_one(detail_config, entity)),
            )
            .await;

            for (entity, failed) in outcomes {
                if failed {
                    failures += 1;
                }
                enriched.push(entity);
            }
        }

        let mut warnings = Vec::new();
        if failures > 0 {
            tracing::warn!(source = %source.id, failures, total, "Partial detail enrichment");
            warnings.push(format!(
                "{failures} of {total} detail fetches failed; original stubs kept"
            ));
        }

        (enriched, warnings)
    }
}

fn into_batches<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::new();
    let mut batch = Vec::with_capacity(size);
    for item in items {
        batch.push(item);
        if batch.len() == size {
            batches.push(std::mem::take(&mut batch));
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}
