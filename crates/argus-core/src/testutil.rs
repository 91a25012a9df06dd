//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks use
//! `Arc<Mutex<_>>` for interior mutability, allowing test assertions on
//! recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cache::CacheEntry;
use crate::error::ScrapeError;
use crate::models::{Entity, ScrapeQuery, ScrapeResult};
use crate::source::{Source, Tier};
use crate::traits::{DetailEnricher, DurableStore, TierEngine};

// ---------------------------------------------------------------------------
// MockEngine
// ---------------------------------------------------------------------------

/// Mock tier engine with a queue of canned responses.
///
/// Each `scrape` call pops the first queued response and records the source
/// id it was called for. An empty queue yields an empty successful result.
#[derive(Clone)]
pub struct MockEngine {
    responses: Arc<Mutex<Vec<Result<ScrapeResult, ScrapeError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockEngine {
    pub fn ok(entities: Vec<Entity>) -> Self {
        let total = entities.len();
        Self::with_responses(vec![Ok(ScrapeResult::success("mock", "", entities, total))])
    }

    pub fn with_error(error: ScrapeError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<ScrapeResult, ScrapeError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Engine that must never be invoked; panics with the given label if it is.
    pub fn unreachable(label: &'static str) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![Err(ScrapeError::Http(format!(
                "engine '{label}' must not be called"
            )))])),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Source ids this engine was invoked for, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl TierEngine for MockEngine {
    async fn scrape(
        &self,
        source: &Source,
        query: &ScrapeQuery,
    ) -> Result<ScrapeResult, ScrapeError> {
        self.calls.lock().unwrap().push(source.id.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(ScrapeResult::success(&source.id, query.term(), vec![], 0))
        } else {
            // Re-stamp canned results with the real source/query so router
            // tests can assert on them.
            responses.remove(0).map(|mut r| {
                r.source = source.id.clone();
                r.query = query.term().to_string();
                r
            })
        }
    }
}

// ---------------------------------------------------------------------------
// MockDurableStore
// ---------------------------------------------------------------------------

/// In-memory DurableStore with an optional write-failure mode.
#[derive(Clone, Default)]
pub struct MockDurableStore {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    fail_writes: bool,
}

impl MockDurableStore {
    pub fn failing() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            fail_writes: true,
        }
    }

    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }
}

impl DurableStore for MockDurableStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, ScrapeError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), ScrapeError> {
        if self.fail_writes {
            return Err(ScrapeError::Cache("durable tier unreachable".into()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), ScrapeError> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }

    async fn clear_source(&self, source_id: &str) -> Result<(), ScrapeError> {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, e| e.source != source_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockEnricher
// ---------------------------------------------------------------------------

/// Enricher that applies a fixed closure-free mutation and records calls.
#[derive(Clone, Default)]
pub struct MockEnricher {
    calls: Arc<Mutex<Vec<String>>>,
    pub agent_name: Option<String>,
}

impl MockEnricher {
    /// Enricher that fills `registered_agent` on every entity.
    pub fn with_agent(name: &str) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            agent_name: Some(name.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl DetailEnricher for MockEnricher {
    async fn enrich(&self, source: &Source, mut entities: Vec<Entity>) -> (Vec<Entity>, Vec<String>) {
        self.calls.lock().unwrap().push(source.id.clone());
        if let Some(agent) = &self.agent_name {
            for entity in &mut entities {
                entity.registered_agent = Some(agent.clone());
            }
        }
        (entities, Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a bare test source with no access config.
pub fn make_source(id: &str, tier: Tier) -> Source {
    Source {
        id: id.to_string(),
        name: format!("Test source {id}"),
        jurisdiction: "XX".to_string(),
        tier,
        config: Default::default(),
    }
}

/// A test source whose tier-2 scraping config is present (content is
/// irrelevant to router tests; engines are mocked).
pub fn make_scraping_source(id: &str, tier: Tier) -> Source {
    let mut source = make_source(id, tier);
    source.config.scraping = Some(crate::source::ScrapingConfig {
        search_url: format!("https://{id}.example.gov/search"),
        method: Default::default(),
        form_fields: Default::default(),
        query_field: None,
        submit_selector: None,
        wait_for_selector: None,
        result_row: crate::source::SelectorStrategy::new("table.results tr"),
        fields: Default::default(),
        detail: None,
    });
    source
}

/// Create a dummy entity attributed to the given source.
pub fn make_entity(name: &str, source_id: &str) -> Entity {
    Entity::new(name, source_id, "XX")
}
