use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification of a source by the minimum access technique it needs.
///
/// Lower tiers are cheaper; the router always tries the tier the source is
/// classified at and escalates only on a blocking signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// Structured JSON API (Socrata and friends).
    Api,
    /// Plain HTTP fetch + selector extraction.
    Http,
    /// Headless browser with fingerprint evasion.
    Browser,
    /// Headless browser where a CAPTCHA is expected on most sessions.
    BrowserCaptcha,
}

impl Tier {
    pub fn as_u8(self) -> u8 {
        match self {
            Tier::Api => 1,
            Tier::Http => 2,
            Tier::Browser => 3,
            Tier::BrowserCaptcha => 4,
        }
    }

    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            1 => Some(Tier::Api),
            2 => Some(Tier::Http),
            3 => Some(Tier::Browser),
            4 => Some(Tier::BrowserCaptcha),
            _ => None,
        }
    }

    /// Whether this tier is served by the headless browser engine.
    pub fn needs_browser(self) -> bool {
        matches!(self, Tier::Browser | Tier::BrowserCaptcha)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u8>()
            .ok()
            .and_then(Tier::from_u8)
            .ok_or_else(|| format!("Unknown tier: {s}"))
    }
}

impl Serialize for Tier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Tier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = u8::deserialize(deserializer)?;
        Tier::from_u8(n).ok_or_else(|| serde::de::Error::custom(format!("tier must be 1-4, got {n}")))
    }
}

/// A single public-record source (one state registry, one county portal, …).
///
/// The `config` bag is owned by the per-source configuration collaborator;
/// the orchestration core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Stable identifier, e.g. "fl_sunbiz".
    pub id: String,
    /// Human-readable name, e.g. "Florida Division of Corporations".
    pub name: String,
    /// Jurisdiction code stamped onto every entity, e.g. "FL".
    pub jurisdiction: String,
    pub tier: Tier,
    #[serde(default)]
    pub config: SourceConfig,
}

/// Access configuration for one source. All parts are optional; the engines
/// fail with a per-source configuration error when the part they need is
/// absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub base_url: String,
    pub api: Option<ApiConfig>,
    pub scraping: Option<ScrapingConfig>,
    /// Per-source rate limit override; unset sources use the limiter default.
    pub requests_per_minute: Option<u32>,
    /// Tier-4 sources set this so the browser engine reports a CAPTCHA wall
    /// as expected rather than anomalous.
    #[serde(default)]
    pub captcha_expected: bool,
}

/// Configuration for the structured-API tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Endpoint path or absolute URL; joined onto `base_url` when relative.
    pub endpoint: String,
    /// Name of the query parameter carrying the search term (e.g. "q", "$q").
    pub query_param: String,
    /// Static parameters appended to every request (API keys, format flags).
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
    /// Parameter used to cap result count, if the API supports one.
    pub limit_param: Option<String>,
    /// Dotted path to the results array within the response body.
    /// When unset, well-known shapes are auto-detected.
    pub results_path: Option<String>,
    /// Dotted path to the total-match count within the response body.
    pub total_path: Option<String>,
    pub field_map: FieldMap,
}

/// Maps canonical entity fields to paths within one API response row.
///
/// Paths are dotted, e.g. "attributes.agent.name". Only `name` is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMap {
    pub name: String,
    pub entity_number: Option<String>,
    pub status: Option<String>,
    pub entity_type: Option<String>,
    pub registered_agent: Option<String>,
    pub address: Option<String>,
    pub formation_date: Option<String>,
    pub detail_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Configuration for the HTML tiers (HTTP fetch and headless browser).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingConfig {
    /// Search page / form-action URL. May contain `{query}` for GET sources
    /// that encode the term in the path.
    pub search_url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Form fields submitted with the search. Values may contain the
    /// `{query}` placeholder.
    #[serde(default)]
    pub form_fields: BTreeMap<String, String>,
    /// CSS selector of the search input, for browser-driven form entry.
    pub query_field: Option<String>,
    /// CSS selector of the submit control; the browser engine presses Enter
    /// in the query field when unset.
    pub submit_selector: Option<String>,
    /// Selector that must appear before the result page is considered loaded.
    pub wait_for_selector: Option<String>,
    /// Strategy locating one result row.
    pub result_row: SelectorStrategy,
    /// Per-field strategies evaluated within each row. Keys are canonical
    /// entity field names ("name", "entity_number", "status", …).
    #[serde(default)]
    pub fields: BTreeMap<String, SelectorStrategy>,
    /// Selectors for the per-entity detail page, used by enrichment.
    pub detail: Option<DetailConfig>,
}

/// Selectors applied to a detail page to fill in nested data the result
/// list omits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailConfig {
    pub officer_row: Option<SelectorStrategy>,
    pub officer_name: Option<SelectorStrategy>,
    pub officer_role: Option<SelectorStrategy>,
    pub registered_agent: Option<SelectorStrategy>,
    pub address: Option<SelectorStrategy>,
    pub formation_date: Option<SelectorStrategy>,
}

/// Declarative extraction strategy: primary selector, ordered fallbacks,
/// optional attribute read, optional regex refinement, optional transform.
///
/// Extraction is data, not code; sources differ only in these trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorStrategy {
    pub selector: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// Read this attribute instead of the element's text.
    pub attribute: Option<String>,
    /// Applied to the raw value; the first capture group wins, falling back
    /// to the whole match.
    pub regex: Option<String>,
    pub transform: Option<Transform>,
}

impl SelectorStrategy {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            fallbacks: Vec::new(),
            attribute: None,
            regex: None,
            transform: None,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// All selectors to try, in order.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.selector.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// Post-extraction value transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    /// Keep ASCII digits only (phone numbers, file numbers).
    Digits,
    CollapseWhitespace,
}

impl Transform {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Transform::Trim => value.trim().to_string(),
            Transform::Lowercase => value.to_lowercase(),
            Transform::Uppercase => value.to_uppercase(),
            Transform::Digits => value.chars().filter(char::is_ascii_digit).collect(),
            Transform::CollapseWhitespace => {
                value.split_whitespace().collect::<Vec<_>>().join(" ")
            }
        }
    }
}
