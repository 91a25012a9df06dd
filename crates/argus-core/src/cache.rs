//! Two-tier TTL'd result cache.
//!
//! The in-process tier is a bounded [`moka`] cache shared by all scrape
//! flows. An optional durable tier ([`DurableStore`]) survives restarts;
//! it is consulted first when configured and written best-effort; a
//! durable-tier failure is logged and never fails the calling scrape.
//!
//! Expiry is lazy on both tiers: an entry past `expires_at` is treated as
//! a miss and evicted opportunistically.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::models::{Entity, ScrapeQuery, compute_hash};
use crate::traits::{DurableStore, NullStore};

/// Cache sizing and lifetime knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a scrape result stays servable.
    pub ttl: Duration,
    /// In-process tier entry bound.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    /// 15 minutes matches how often registry search indexes realistically
    /// change; 1000 entries keeps the hot set of a busy aggregation run.
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            max_entries: 1000,
        }
    }
}

/// One cached scrape outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 over source id, normalized query term, and options.
    pub key: String,
    pub source: String,
    pub query: String,
    pub data: Vec<Entity>,
    pub total_found: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Stable cache key for a (source, query, options) triple.
pub fn cache_key(source_id: &str, query: &ScrapeQuery) -> String {
    let limit = query
        .options
        .limit
        .map(|l| l.to_string())
        .unwrap_or_default();
    compute_hash(&format!("{source_id}|{}|{limit}", query.term()))
}

/// Keyed, TTL'd scrape-result store with an in-process tier and an
/// optional durable tier.
#[derive(Clone)]
pub struct ScrapeCache<D: DurableStore = NullStore> {
    memory: Cache<String, Arc<CacheEntry>>,
    durable: Option<D>,
    ttl: Duration,
}

impl ScrapeCache<NullStore> {
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }
}

impl<D: DurableStore> ScrapeCache<D> {
    pub fn with_durable(config: CacheConfig, durable: D) -> Self {
        Self::build(config, Some(durable))
    }

    fn build(config: CacheConfig, durable: Option<D>) -> ScrapeCache<D> {
        let memory = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .support_invalidation_closures()
            .build();
        ScrapeCache {
            memory,
            durable,
            ttl: config.ttl,
        }
    }

    /// Look up a cached result. Expired entries are invisible and evicted.
    pub async fn get(&self, source_id: &str, query: &ScrapeQuery) -> Option<CacheEntry> {
        let key = cache_key(source_id, query);

        if let Some(durable) = &self.durable {
            match durable.get(&key).await {
                Ok(Some(entry)) if !entry.is_expired() => {
                    // Warm the in-process tier so repeat hits skip the
                    // durable round trip.
                    self.memory.insert(key, Arc::new(entry.clone())).await;
                    return Some(entry);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(source = %source_id, error = %e, "Durable cache read failed");
                }
            }
        }

        match self.memory.get(&key).await {
            Some(entry) if !entry.is_expired() => Some(entry.as_ref().clone()),
            Some(_) => {
                self.memory.invalidate(&key).await;
                None
            }
            None => None,
        }
    }

    /// Store a successful scrape. The in-process write is synchronous; the
    /// durable mirror is best-effort and never fails the caller.
    pub async fn put(
        &self,
        source_id: &str,
        query: &ScrapeQuery,
        data: Vec<Entity>,
        total_found: usize,
    ) {
        let key = cache_key(source_id, query);
        let created_at = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            source: source_id.to_string(),
            query: query.term().to_string(),
            data,
            total_found,
            created_at,
            expires_at: created_at
                + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero()),
        };

        self.memory.insert(key, Arc::new(entry.clone())).await;

        if let Some(durable) = &self.durable
            && let Err(e) = durable.put(&entry).await
        {
            tracing::warn!(source = %source_id, error = %e, "Durable cache write failed");
        }
    }

    /// Drop every cached entry.
    pub async fn clear(&self) {
        self.memory.invalidate_all();
        if let Some(durable) = &self.durable
            && let Err(e) = durable.clear().await
        {
            tracing::warn!(error = %e, "Durable cache clear failed");
        }
    }

    /// Drop cached entries for one source.
    pub async fn clear_source(&self, source_id: &str) {
        let id = source_id.to_string();
        if let Err(e) = self
            .memory
            .invalidate_entries_if(move |_key, entry| entry.source == id)
        {
            tracing::warn!(source = %source_id, error = %e, "In-process cache invalidation failed");
        }
        if let Some(durable) = &self.durable
            && let Err(e) = durable.clear_source(source_id).await
        {
            tracing::warn!(source = %source_id, error = %e, "Durable cache clear failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryOptions;
    use crate::testutil::{MockDurableStore, make_entity};

    fn short_ttl(ms: u64) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_millis(ms),
            max_entries: 100,
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = ScrapeCache::new(CacheConfig::default());
        let query = ScrapeQuery::new("acme holdings");
        let data = vec![make_entity("Acme Holdings LLC", "fl_sunbiz")];

        cache.put("fl_sunbiz", &query, data.clone(), 12).await;

        let hit = cache.get("fl_sunbiz", &query).await.expect("cache hit");
        assert_eq!(hit.data.len(), 1);
        assert_eq!(hit.total_found, 12);
        assert_eq!(hit.data[0].name, "Acme Holdings LLC");
    }

    #[tokio::test]
    async fn test_normalized_queries_share_an_entry() {
        let cache = ScrapeCache::new(CacheConfig::default());
        cache
            .put("fl_sunbiz", &ScrapeQuery::new("Acme  Holdings"), vec![], 0)
            .await;

        assert!(
            cache
                .get("fl_sunbiz", &ScrapeQuery::new("  ACME HOLDINGS "))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_options_are_part_of_the_key() {
        let cache = ScrapeCache::new(CacheConfig::default());
        let limited = ScrapeQuery::new("acme").with_options(QueryOptions {
            limit: Some(5),
            skip_cache: false,
        });

        cache.put("fl_sunbiz", &limited, vec![], 0).await;

        assert!(cache.get("fl_sunbiz", &limited).await.is_some());
        assert!(cache.get("fl_sunbiz", &ScrapeQuery::new("acme")).await.is_none());
    }

    #[tokio::test]
    async fn test_sources_do_not_share_entries() {
        let cache = ScrapeCache::new(CacheConfig::default());
        let query = ScrapeQuery::new("acme");
        cache.put("fl_sunbiz", &query, vec![], 0).await;

        assert!(cache.get("ga_sos", &query).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = ScrapeCache::new(short_ttl(40));
        let query = ScrapeQuery::new("acme");
        cache.put("fl_sunbiz", &query, vec![], 3).await;

        assert!(cache.get("fl_sunbiz", &query).await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("fl_sunbiz", &query).await.is_none());
    }

    #[tokio::test]
    async fn test_durable_tier_consulted_first() {
        let durable = MockDurableStore::default();
        let cache = ScrapeCache::with_durable(CacheConfig::default(), durable.clone());
        let query = ScrapeQuery::new("acme");

        // Seed only the durable tier, simulating a fresh process.
        let created_at = Utc::now();
        durable
            .put(&CacheEntry {
                key: cache_key("fl_sunbiz", &query),
                source: "fl_sunbiz".into(),
                query: query.term().into(),
                data: vec![make_entity("Acme LLC", "fl_sunbiz")],
                total_found: 1,
                created_at,
                expires_at: created_at + chrono::Duration::minutes(5),
            })
            .await
            .unwrap();

        let hit = cache.get("fl_sunbiz", &query).await.expect("durable hit");
        assert_eq!(hit.data[0].name, "Acme LLC");
    }

    #[tokio::test]
    async fn test_durable_write_failure_is_non_fatal() {
        let durable = MockDurableStore::failing();
        let cache = ScrapeCache::with_durable(CacheConfig::default(), durable);
        let query = ScrapeQuery::new("acme");

        cache.put("fl_sunbiz", &query, vec![], 0).await;

        // The in-process tier still serves the entry.
        assert!(cache.get("fl_sunbiz", &query).await.is_some());
    }

    #[tokio::test]
    async fn test_put_mirrors_to_durable_tier() {
        let durable = MockDurableStore::default();
        let cache = ScrapeCache::with_durable(CacheConfig::default(), durable.clone());
        let query = ScrapeQuery::new("acme");

        cache.put("fl_sunbiz", &query, vec![], 7).await;

        let stored = durable.entries();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].total_found, 7);
    }

    #[tokio::test]
    async fn test_clear_source_leaves_other_sources() {
        let cache = ScrapeCache::new(CacheConfig::default());
        let query = ScrapeQuery::new("acme");
        cache.put("fl_sunbiz", &query, vec![], 1).await;
        cache.put("ga_sos", &query, vec![], 1).await;

        cache.clear_source("fl_sunbiz").await;

        assert!(cache.get("fl_sunbiz", &query).await.is_none());
        assert!(cache.get("ga_sos", &query).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let cache = ScrapeCache::new(CacheConfig::default());
        let query = ScrapeQuery::new("acme");
        cache.put("fl_sunbiz", &query, vec![], 1).await;
        cache.put("ga_sos", &query, vec![], 1).await;

        cache.clear().await;

        assert!(cache.get("fl_sunbiz", &query).await.is_none());
        assert!(cache.get("ga_sos", &query).await.is_none());
    }
}
