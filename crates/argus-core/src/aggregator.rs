//! Fan-out of one query across many sources.
//!
//! Sources run in bounded concurrent batches; a failing source never aborts
//! its siblings, and every failure is reported in the aggregate result.
//! Merged entities are deduplicated by normalized name + entity number.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{Entity, MultiSearchResult, ScrapeQuery, SourceFailure};
use crate::router::UnifiedRouter;
use crate::source::Source;
use crate::traits::{DetailEnricher, DurableStore, TierEngine};

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Sources scraped concurrently per batch.
    pub max_concurrent: usize,
    /// When false, a batch containing a failure stops later batches from
    /// being scheduled; in-flight siblings still run to completion.
    pub continue_on_error: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            continue_on_error: true,
        }
    }
}

pub struct MultiSourceAggregator<A, H, B, E, D>
where
    A: TierEngine,
    H: TierEngine,
    B: TierEngine,
    E: DetailEnricher,
    D: DurableStore,
{
    router: Arc<UnifiedRouter<A, H, B, E, D>>,
}

impl<A, H, B, E, D> MultiSourceAggregator<A, H, B, E, D>
where
    A: TierEngine,
    H: TierEngine,
    B: TierEngine,
    E: DetailEnricher,
    D: DurableStore,
{
    pub fn new(router: Arc<UnifiedRouter<A, H, B, E, D>>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &UnifiedRouter<A, H, B, E, D> {
        &self.router
    }

    /// Run one query against every given source and merge the outcomes.
    pub async fn search_many(
        &self,
        query: &ScrapeQuery,
        sources: &[Source],
        options: &AggregateOptions,
    ) -> MultiSearchResult {
        let started = Instant::now();
        let batch_size = options.max_concurrent.max(1);

        let mut merged: Vec<Entity> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut total_found = 0usize;
        let mut sources_searched = Vec::new();
        let mut sources_succeeded = Vec::new();
        let mut sources_failed = Vec::new();
        let mut warnings = Vec::new();

        tracing::info!(query = %query.term(), sources = sources.len(),
            batch_size, "Starting multi-source search");

        for batch in sources.chunks(batch_size) {
            let results =
                futures::future::join_all(batch.iter().map(|s| self.router.scrape(s, query)))
                    .await;

            let mut batch_failed = false;
            for (source, result) in batch.iter().zip(results) {
                sources_searched.push(source.id.clone());

                if result.success {
                    sources_succeeded.push(source.id.clone());
                    total_found += result.total_found;
                    for warning in result.warnings {
                        warnings.push(format!("{}: {warning}", source.id));
                    }
                    for entity in result.data {
                        match index.get(&entity.dedup_key()) {
                            Some(&pos) => merged[pos].merge(entity),
                            None => {
                                index.insert(entity.dedup_key(), merged.len());
                                merged.push(entity);
                            }
                        }
                    }
                } else {
                    batch_failed = true;
                    sources_failed.push(SourceFailure {
                        source: source.id.clone(),
                        error: result
                            .error
                            .unwrap_or_else(|| "unknown failure".to_string()),
                    });
                }
            }

            if batch_failed && !options.continue_on_error {
                tracing::warn!(
                    completed = sources_searched.len(),
                    remaining = sources.len() - sources_searched.len(),
                    "Stopping after failed batch (continue_on_error=false)"
                );
                break;
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            merged = merged.len(),
            succeeded = sources_succeeded.len(),
            failed = sources_failed.len(),
            duration_ms,
            "Multi-source search complete"
        );

        MultiSearchResult {
            success: !sources_succeeded.is_empty(),
            total_found,
            results: merged,
            sources_searched,
            sources_succeeded,
            sources_failed,
            duration_ms,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use crate::models::Officer;
    use crate::registry::Registry;
    use crate::source::Tier;
    use crate::testutil::{MockEngine, make_entity, make_source};

    fn aggregator(
        http: MockEngine,
        browser: MockEngine,
    ) -> MultiSourceAggregator<
        MockEngine,
        MockEngine,
        MockEngine,
        crate::traits::NullEnricher,
        crate::traits::NullStore,
    > {
        let router = UnifiedRouter::new(
            MockEngine::unreachable("api"),
            http,
            browser,
            Arc::new(Registry::new()),
        );
        MultiSourceAggregator::new(Arc::new(router))
    }

    #[tokio::test]
    async fn test_one_bad_source_never_aborts_siblings() {
        // Sources 1,2,4,5 are http-tier and succeed; source 3 is
        // browser-tier and always fails.
        let http = MockEngine::with_responses(vec![]);
        let browser = MockEngine::with_error(ScrapeError::Timeout(30));
        let agg = aggregator(http, browser);

        let sources = vec![
            make_source("s1", Tier::Http),
            make_source("s2", Tier::Http),
            make_source("s3", Tier::Browser),
            make_source("s4", Tier::Http),
            make_source("s5", Tier::Http),
        ];

        let result = agg
            .search_many(&ScrapeQuery::new("acme"), &sources, &AggregateOptions::default())
            .await;

        assert!(result.success);
        assert_eq!(result.sources_searched.len(), 5);
        assert_eq!(result.sources_succeeded.len(), 4);
        assert_eq!(result.sources_failed.len(), 1);
        assert_eq!(result.sources_failed[0].source, "s3");
        assert!(result.sources_failed[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_stop_scheduling_when_continue_on_error_off() {
        // Batch 1: s1 (browser, fails) + s2 (http, succeeds).
        // Batch 2: s3 (http) must never be scheduled.
        let http = MockEngine::with_responses(vec![]);
        let browser = MockEngine::with_error(ScrapeError::Timeout(30));
        let agg = aggregator(http.clone(), browser);

        let sources = vec![
            make_source("s1", Tier::Browser),
            make_source("s2", Tier::Http),
            make_source("s3", Tier::Http),
        ];

        let result = agg
            .search_many(
                &ScrapeQuery::new("acme"),
                &sources,
                &AggregateOptions {
                    max_concurrent: 2,
                    continue_on_error: false,
                },
            )
            .await;

        assert_eq!(result.sources_searched, vec!["s1", "s2"]);
        assert_eq!(result.sources_succeeded, vec!["s2"]);
        assert_eq!(result.sources_failed.len(), 1);
        assert_eq!(http.call_count(), 1, "s3 must not be scheduled");
    }

    #[tokio::test]
    async fn test_dedup_merges_identical_entities_across_sources() {
        let mut from_fl = make_entity("Acme Holdings, LLC", "s1");
        from_fl.entity_number = Some("L2100012".into());
        from_fl.officers.push(Officer {
            name: "Jane Roe".into(),
            role: Some("Manager".into()),
        });

        let mut from_ga = make_entity("ACME HOLDINGS LLC", "s2");
        from_ga.entity_number = Some("L2100012".into());
        from_ga.status = Some("Active".into());
        from_ga.officers.push(Officer {
            name: "Jane Roe".into(),
            role: Some("Manager".into()),
        });
        from_ga.officers.push(Officer {
            name: "John Doe".into(),
            role: Some("CFO".into()),
        });

        let http = MockEngine::with_responses(vec![
            Ok(crate::models::ScrapeResult::success("s1", "acme", vec![from_fl], 1)),
            Ok(crate::models::ScrapeResult::success("s2", "acme", vec![from_ga], 1)),
        ]);
        let agg = aggregator(http, MockEngine::unreachable("browser"));

        let sources = vec![make_source("s1", Tier::Http), make_source("s2", Tier::Http)];
        let result = agg
            .search_many(
                &ScrapeQuery::new("acme"),
                &sources,
                &AggregateOptions {
                    max_concurrent: 1,
                    continue_on_error: true,
                },
            )
            .await;

        assert_eq!(result.results.len(), 1, "identical entities must collapse");
        let entity = &result.results[0];
        assert_eq!(entity.officers.len(), 2, "officer lists unioned, not duplicated");
        assert_eq!(entity.sources.len(), 2);
        assert_eq!(entity.status.as_deref(), Some("Active"));
        assert_eq!(result.total_found, 2);
    }

    #[tokio::test]
    async fn test_different_entity_numbers_do_not_collapse() {
        let mut a = make_entity("Acme LLC", "s1");
        a.entity_number = Some("L100".into());
        let mut b = make_entity("Acme LLC", "s2");
        b.entity_number = Some("L200".into());

        let http = MockEngine::with_responses(vec![
            Ok(crate::models::ScrapeResult::success("s1", "acme", vec![a], 1)),
            Ok(crate::models::ScrapeResult::success("s2", "acme", vec![b], 1)),
        ]);
        let agg = aggregator(http, MockEngine::unreachable("browser"));

        let sources = vec![make_source("s1", Tier::Http), make_source("s2", Tier::Http)];
        let result = agg
            .search_many(
                &ScrapeQuery::new("acme"),
                &sources,
                &AggregateOptions {
                    max_concurrent: 1,
                    continue_on_error: true,
                },
            )
            .await;

        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_unsuccessful_but_complete() {
        let http = MockEngine::with_responses(vec![
            Err(ScrapeError::Timeout(30)),
            Err(ScrapeError::Network("refused".into())),
        ]);
        let agg = aggregator(http, MockEngine::unreachable("browser"));

        let sources = vec![make_source("s1", Tier::Http), make_source("s2", Tier::Http)];
        let result = agg
            .search_many(
                &ScrapeQuery::new("acme"),
                &sources,
                &AggregateOptions {
                    max_concurrent: 1,
                    continue_on_error: true,
                },
            )
            .await;

        assert!(!result.success);
        assert!(result.results.is_empty());
        assert_eq!(result.sources_failed.len(), 2);
        assert_eq!(result.sources_searched.len(), 2);
    }
}
