//! Tier-1 engine: structured JSON APIs.
//!
//! The cheapest access path. Each source supplies a query-parameter name, a
//! results path, and a field map; the engine normalizes whatever row shape
//! the API returns into canonical entities.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use argus_core::error::ScrapeError;
use argus_core::models::{Entity, ScrapeQuery, ScrapeResult};
use argus_core::source::{FieldMap, Source};
use argus_core::traits::TierEngine;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "argus/0.2 (public-records aggregator)";

/// JSON API client for tier-1 sources.
#[derive(Clone)]
pub struct ApiEngine {
    client: Client,
    timeout_secs: u64,
}

impl ApiEngine {
    pub fn new() -> Result<Self, ScrapeError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Http(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl TierEngine for ApiEngine {
    async fn scrape(
        &self,
        source: &Source,
        query: &ScrapeQuery,
    ) -> Result<ScrapeResult, ScrapeError> {
        let api = source.config.api.as_ref().ok_or_else(|| ScrapeError::Config {
            source_id: source.id.clone(),
            message: "tier-1 source has no api config".into(),
        })?;

        let endpoint = resolve_endpoint(&source.config.base_url, &api.endpoint).map_err(|e| {
            ScrapeError::Config {
                source_id: source.id.clone(),
                message: format!("bad endpoint: {e}"),
            }
        })?;

        let mut params: Vec<(String, String)> =
            vec![(api.query_param.clone(), query.term().to_string())];
        for (k, v) in &api.extra_params {
            params.push((k.clone(), v.clone()));
        }
        if let (Some(limit_param), Some(limit)) = (&api.limit_param, query.options.limit) {
            params.push((limit_param.clone(), limit.to_string()));
        }

        tracing::debug!(source = %source.id, endpoint = %endpoint, "API query");

        let response = self
            .client
            .get(endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScrapeError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    ScrapeError::Network(format!("Connection failed: {e}"))
                } else {
                    ScrapeError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            429 => return Err(ScrapeError::RateLimited),
            403 => return Err(ScrapeError::Blocked("HTTP 403 from API".into())),
            _ if !status.is_success() => {
                return Err(ScrapeError::Http(format!(
                    "HTTP {} from {}",
                    status.as_u16(),
                    source.id
                )));
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ScrapeError::Parse(format!("invalid JSON from {}: {e}", source.id)))?;

        let rows = locate_rows(&body, api.results_path.as_deref()).ok_or_else(|| {
            // An error-shaped body with no rows is a failure, not an
            // empty result set.
            match body.get("error").or_else(|| body.get("message")) {
                Some(err) => ScrapeError::Http(format!("API error from {}: {err}", source.id)),
                None => ScrapeError::Parse(format!("no results array in {} response", source.id)),
            }
        })?;

        let total_found = api
            .total_path
            .as_deref()
            .and_then(|p| value_at_path(&body, p))
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(rows.len());

        let mut entities: Vec<Entity> = rows
            .iter()
            .filter_map(|row| map_row(row, &api.field_map, source))
            .collect();
        if let Some(limit) = query.options.limit {
            entities.truncate(limit);
        }

        Ok(ScrapeResult::success(
            &source.id,
            query.term(),
            entities,
            total_found,
        ))
    }
}

fn resolve_endpoint(base_url: &str, endpoint: &str) -> Result<url::Url, url::ParseError> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        url::Url::parse(endpoint)
    } else {
        url::Url::parse(base_url)?.join(endpoint)
    }
}

/// Find the row array in a response body: the configured path when given,
/// otherwise the top-level array or a well-known wrapper key.
fn locate_rows<'a>(body: &'a Value, results_path: Option<&str>) -> Option<&'a Vec<Value>> {
    if let Some(path) = results_path {
        return value_at_path(body, path)?.as_array();
    }
    if let Some(rows) = body.as_array() {
        return Some(rows);
    }
    for key in ["results", "data", "items", "records", "entities"] {
        if let Some(rows) = body.get(key).and_then(Value::as_array) {
            return Some(rows);
        }
    }
    None
}

/// Read a dotted path ("attributes.agent.name") out of a JSON value.
fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn string_at_path(row: &Value, path: &str) -> Option<String> {
    match value_at_path(row, path)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn map_row(row: &Value, fields: &FieldMap, source: &Source) -> Option<Entity> {
    let name = string_at_path(row, &fields.name)?;
    let mut entity = Entity::new(&name, &source.id, &source.jurisdiction);

    entity.entity_number = fields
        .entity_number
        .as_deref()
        .and_then(|p| string_at_path(row, p));
    entity.status = fields.status.as_deref().and_then(|p| string_at_path(row, p));
    entity.entity_type = fields
        .entity_type
        .as_deref()
        .and_then(|p| string_at_path(row, p));
    entity.registered_agent = fields
        .registered_agent
        .as_deref()
        .and_then(|p| string_at_path(row, p));
    entity.address = fields.address.as_deref().and_then(|p| string_at_path(row, p));
    entity.formation_date = fields
        .formation_date
        .as_deref()
        .and_then(|p| string_at_path(row, p));
    entity.detail_url = fields
        .detail_url
        .as_deref()
        .and_then(|p| string_at_path(row, p))
        .map(|link| crate::extract::resolve_url(&source.config.base_url, &link));

    Some(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::source::ApiConfig;
    use serde_json::json;

    fn field_map() -> FieldMap {
        FieldMap {
            name: "entity_name".into(),
            entity_number: Some("document_number".into()),
            status: Some("status".into()),
            entity_type: None,
            registered_agent: Some("agent.name".into()),
            address: None,
            formation_date: Some("filed_date".into()),
            detail_url: Some("links.detail".into()),
        }
    }

    fn api_source() -> Source {
        let mut source = argus_core::testutil::make_source("fl_api", argus_core::Tier::Api);
        source.config.base_url = "https://api.example.gov".into();
        source.config.api = Some(ApiConfig {
            endpoint: "/v1/corporations".into(),
            query_param: "q".into(),
            extra_params: Default::default(),
            limit_param: Some("limit".into()),
            results_path: None,
            total_path: Some("meta.total".into()),
            field_map: field_map(),
        });
        source
    }

    #[test]
    fn test_value_at_path() {
        let v = json!({"a": {"b": {"c": 42}}});
        assert_eq!(value_at_path(&v, "a.b.c"), Some(&json!(42)));
        assert_eq!(value_at_path(&v, "a.x"), None);
    }

    #[test]
    fn test_locate_rows_auto_detects_wrappers() {
        let top = json!([{"n": 1}]);
        assert_eq!(locate_rows(&top, None).unwrap().len(), 1);

        let wrapped = json!({"results": [{"n": 1}, {"n": 2}]});
        assert_eq!(locate_rows(&wrapped, None).unwrap().len(), 2);

        let data = json!({"data": [{"n": 1}]});
        assert_eq!(locate_rows(&data, None).unwrap().len(), 1);

        let error_shaped = json!({"error": "query too broad"});
        assert!(locate_rows(&error_shaped, None).is_none());
    }

    #[test]
    fn test_locate_rows_explicit_path() {
        let nested = json!({"response": {"hits": [{"n": 1}]}});
        assert_eq!(locate_rows(&nested, Some("response.hits")).unwrap().len(), 1);
    }

    #[test]
    fn test_map_row_full() {
        let source = api_source();
        let row = json!({
            "entity_name": "  Acme Holdings LLC ",
            "document_number": "L2100012",
            "status": "ACTIVE",
            "agent": {"name": "CORPORATE AGENTS INC"},
            "filed_date": "2021-03-09",
            "links": {"detail": "/v1/corporations/L2100012"}
        });

        let entity = map_row(
            &row,
            &source.config.api.as_ref().unwrap().field_map,
            &source,
        )
        .unwrap();

        assert_eq!(entity.name, "Acme Holdings LLC");
        assert_eq!(entity.entity_number.as_deref(), Some("L2100012"));
        assert_eq!(entity.registered_agent.as_deref(), Some("CORPORATE AGENTS INC"));
        assert_eq!(
            entity.detail_url.as_deref(),
            Some("https://api.example.gov/v1/corporations/L2100012")
        );
    }

    #[test]
    fn test_map_row_without_name_is_dropped() {
        let source = api_source();
        let row = json!({"document_number": "L2100012"});
        assert!(
            map_row(&row, &source.config.api.as_ref().unwrap().field_map, &source).is_none()
        );
    }

    #[test]
    fn test_map_row_numeric_values_stringified() {
        let source = api_source();
        let row = json!({"entity_name": "Acme", "document_number": 99001122});
        let entity = map_row(
            &row,
            &source.config.api.as_ref().unwrap().field_map,
            &source,
        )
        .unwrap();
        assert_eq!(entity.entity_number.as_deref(), Some("99001122"));
    }

    #[test]
    fn test_resolve_endpoint() {
        assert_eq!(
            resolve_endpoint("https://api.example.gov", "/v1/corps")
                .unwrap()
                .as_str(),
            "https://api.example.gov/v1/corps"
        );
        assert_eq!(
            resolve_endpoint("https://api.example.gov", "https://other.example.gov/x")
                .unwrap()
                .as_str(),
            "https://other.example.gov/x"
        );
    }

    #[tokio::test]
    async fn test_missing_api_config_is_a_config_error() {
        let engine = ApiEngine::new().unwrap();
        let source = argus_core::testutil::make_source("bare", argus_core::Tier::Api);

        let err = engine
            .scrape(&source, &ScrapeQuery::new("acme"))
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Config { .. }));
    }
}
