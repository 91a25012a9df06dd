//! Selector-driven DOM extraction.
//!
//! A [`SelectorStrategy`] is applied as: primary selector → ordered
//! fallbacks → optional regex refinement → optional transform. Extraction
//! runs against a real parsed DOM (the `scraper` crate), not string
//! munging; the regex step only refines an already-extracted value.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use argus_core::models::{Entity, Officer};
use argus_core::source::{DetailConfig, ScrapingConfig, SelectorStrategy};
use argus_core::Source;

fn compile(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::debug!(selector, error = %e, "Skipping unparsable selector");
            None
        }
    }
}

/// Apply one strategy within a scope, trying each candidate selector in
/// order until one yields a non-empty value.
pub fn extract_value(scope: ElementRef<'_>, strategy: &SelectorStrategy) -> Option<String> {
    for candidate in strategy.candidates() {
        let Some(selector) = compile(candidate) else {
            continue;
        };
        if let Some(element) = scope.select(&selector).next()
            && let Some(value) = read_value(element, strategy)
        {
            return Some(value);
        }
    }
    None
}

fn read_value(element: ElementRef<'_>, strategy: &SelectorStrategy) -> Option<String> {
    let raw = match &strategy.attribute {
        Some(attr) => element.value().attr(attr)?.to_string(),
        None => element.text().collect::<Vec<_>>().join(" "),
    };

    let refined = match &strategy.regex {
        Some(pattern) => {
            let re = Regex::new(pattern).ok()?;
            let caps = re.captures(&raw)?;
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())?
        }
        None => raw,
    };

    let transformed = match &strategy.transform {
        Some(t) => t.apply(&refined),
        None => refined.split_whitespace().collect::<Vec<_>>().join(" "),
    };

    (!transformed.is_empty()).then_some(transformed)
}

/// Find result rows, falling through the strategy's selector list until one
/// matches at least one element.
pub fn select_rows<'a>(doc: &'a Html, strategy: &SelectorStrategy) -> Vec<ElementRef<'a>> {
    for candidate in strategy.candidates() {
        let Some(selector) = compile(candidate) else {
            continue;
        };
        let rows: Vec<_> = doc.select(&selector).collect();
        if !rows.is_empty() {
            return rows;
        }
    }
    Vec::new()
}

/// Parse a result page into entities per the source's scraping config.
///
/// Returns the extracted entities and the total row count before any limit
/// was applied.
pub fn extract_entities(
    html: &str,
    scraping: &ScrapingConfig,
    source: &Source,
    limit: Option<usize>,
) -> (Vec<Entity>, usize) {
    let doc = Html::parse_document(html);
    let rows = select_rows(&doc, &scraping.result_row);
    let total = rows.len();

    let mut entities = Vec::new();
    for row in rows {
        if let Some(max) = limit
            && entities.len() >= max
        {
            break;
        }

        let name = match scraping.fields.get("name") {
            Some(strategy) => extract_value(row, strategy),
            // No name strategy: the row's own text is the name.
            None => {
                let text = row.text().collect::<Vec<_>>().join(" ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                (!text.is_empty()).then_some(text)
            }
        };
        let Some(name) = name else {
            continue;
        };

        let mut entity = Entity::new(&name, &source.id, &source.jurisdiction);
        for (field, strategy) in &scraping.fields {
            if field == "name" {
                continue;
            }
            if let Some(value) = extract_value(row, strategy) {
                set_field(&mut entity, field, value, &source.config.base_url);
            }
        }
        entities.push(entity);
    }

    (entities, total)
}

fn set_field(entity: &mut Entity, field: &str, value: String, base_url: &str) {
    match field {
        "entity_number" => entity.entity_number = Some(value),
        "status" => entity.status = Some(value),
        "entity_type" => entity.entity_type = Some(value),
        "registered_agent" => entity.registered_agent = Some(value),
        "address" => entity.address = Some(value),
        "formation_date" => entity.formation_date = Some(value),
        "detail_url" => entity.detail_url = Some(resolve_url(base_url, &value)),
        other => {
            tracing::debug!(field = other, "Ignoring unknown field mapping");
        }
    }
}

/// Resolve a possibly-relative link against the source's base URL.
pub fn resolve_url(base_url: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    match url::Url::parse(base_url).and_then(|base| base.join(link)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => link.to_string(),
    }
}

/// Nested data pulled from one detail page.
#[derive(Debug, Default)]
pub struct DetailData {
    pub officers: Vec<Officer>,
    pub registered_agent: Option<String>,
    pub address: Option<String>,
    pub formation_date: Option<String>,
}

/// Parse a detail page per the source's detail selectors.
pub fn parse_detail(html: &str, config: &DetailConfig) -> DetailData {
    let doc = Html::parse_document(html);
    let root = doc.root_element();
    let mut detail = DetailData::default();

    if let Some(row_strategy) = &config.officer_row {
        for row in select_rows(&doc, row_strategy) {
            let name = match &config.officer_name {
                Some(strategy) => extract_value(row, strategy),
                None => {
                    let text = row.text().collect::<Vec<_>>().join(" ");
                    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                    (!text.is_empty()).then_some(text)
                }
            };
            if let Some(name) = name {
                detail.officers.push(Officer {
                    name,
                    role: config
                        .officer_role
                        .as_ref()
                        .and_then(|strategy| extract_value(row, strategy)),
                });
            }
        }
    }

    detail.registered_agent = config
        .registered_agent
        .as_ref()
        .and_then(|s| extract_value(root, s));
    detail.address = config.address.as_ref().and_then(|s| extract_value(root, s));
    detail.formation_date = config
        .formation_date
        .as_ref()
        .and_then(|s| extract_value(root, s));

    detail
}

/// Merge detail-page data into a result stub. Existing values win; officer
/// lists are unioned.
pub fn apply_detail(entity: &mut Entity, detail: DetailData) {
    for officer in detail.officers {
        if !entity.officers.contains(&officer) {
            entity.officers.push(officer);
        }
    }
    if entity.registered_agent.is_none() {
        entity.registered_agent = detail.registered_agent;
    }
    if entity.address.is_none() {
        entity.address = detail.address;
    }
    if entity.formation_date.is_none() {
        entity.formation_date = detail.formation_date;
    }
}
