use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::circuit_breaker::CircuitState;
use crate::source::Tier;

/// A normalized search query plus its immutable options bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeQuery {
    term: String,
    pub options: QueryOptions,
}

impl ScrapeQuery {
    /// Normalizes the term on construction: trimmed, lowercased, inner
    /// whitespace collapsed. Two queries differing only in case or spacing
    /// hit the same cache entry.
    pub fn new(term: &str) -> Self {
        Self {
            term: normalize_term(term),
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn term(&self) -> &str {
        &self.term
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Cap on returned entities per source.
    pub limit: Option<usize>,
    /// Bypass the cache for this call (read and write).
    pub skip_cache: bool,
}

/// One officer/director record attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Officer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Canonical business-entity record merged from heterogeneous source shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    /// Lowercased, punctuation-stripped form used for deduplication.
    pub normalized_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub jurisdiction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub officers: Vec<Officer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_url: Option<String>,
    /// Ids of every source that contributed to this record.
    pub sources: Vec<String>,
}

impl Entity {
    pub fn new(name: &str, source_id: &str, jurisdiction: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            normalized_name: normalize_name(name),
            entity_number: None,
            status: None,
            entity_type: None,
            jurisdiction: jurisdiction.to_string(),
            registered_agent: None,
            officers: Vec::new(),
            address: None,
            formation_date: None,
            detail_url: None,
            sources: vec![source_id.to_string()],
        }
    }

    /// Composite deduplication key: normalized name plus entity number when
    /// one is known. Entities with and without a number never collapse.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}",
            self.normalized_name,
            self.entity_number.as_deref().unwrap_or("")
        )
    }

    /// Merge another record for the same entity into this one. Scalar
    /// fields are filled only where absent; officer and source lists are
    /// unioned, never duplicated.
    pub fn merge(&mut self, other: Entity) {
        fill(&mut self.entity_number, other.entity_number);
        fill(&mut self.status, other.status);
        fill(&mut self.entity_type, other.entity_type);
        fill(&mut self.registered_agent, other.registered_agent);
        fill(&mut self.address, other.address);
        fill(&mut self.formation_date, other.formation_date);
        fill(&mut self.detail_url, other.detail_url);

        for officer in other.officers {
            if !self.officers.contains(&officer) {
                self.officers.push(officer);
            }
        }
        for source in other.sources {
            if !self.sources.contains(&source) {
                self.sources.push(source);
            }
        }
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Outcome of one `Router::scrape` call against one source.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub success: bool,
    pub data: Vec<Entity>,
    pub total_found: usize,
    pub source: String,
    pub query: String,
    pub scraped_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ScrapeResult {
    pub fn success(source: &str, query: &str, data: Vec<Entity>, total_found: usize) -> Self {
        Self {
            success: true,
            data,
            total_found,
            source: source.to_string(),
            query: query.to_string(),
            scraped_at: Utc::now(),
            duration_ms: 0,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failure(source: &str, query: &str, error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            total_found: 0,
            source: source.to_string(),
            query: query.to_string(),
            scraped_at: Utc::now(),
            duration_ms: 0,
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// One failed source within an aggregate search.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

/// Aggregate outcome of fanning one query across many sources. Failed
/// sources are always listed, never silently dropped.
#[derive(Debug, Clone, Serialize)]
pub struct MultiSearchResult {
    pub success: bool,
    pub total_found: usize,
    pub results: Vec<Entity>,
    pub sources_searched: Vec<String>,
    pub sources_succeeded: Vec<String>,
    pub sources_failed: Vec<SourceFailure>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Operational health snapshot for one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub source: String,
    pub tier: Tier,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub is_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize a search term: trim, lowercase, collapse inner whitespace.
pub fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize an entity name for deduplication: lowercase, strip
/// punctuation, collapse whitespace. "Acme Holdings, L.L.C." and
/// "ACME HOLDINGS LLC" map to the same key.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    normalize_term(&cleaned)
}
