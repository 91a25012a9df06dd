//! Tier-2 engine: plain HTTP fetch + selector extraction.
//!
//! Sends realistic browser headers, retries transient network errors with a
//! fixed backoff, and classifies challenge pages as a blocking signal so
//! the router can escalate to the browser tier instead of retrying blindly.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use url::Url;

use argus_core::error::ScrapeError;
use argus_core::models::{ScrapeQuery, ScrapeResult};
use argus_core::source::{HttpMethod, ScrapingConfig, Source};
use argus_core::traits::TierEngine;
use argus_core::util;

use crate::extract;

/// Desktop browser user agents rotated per request.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
];

/// Body substrings that mark a challenge page rather than real results.
const BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "cf-chl",
    "challenge-platform",
    "unusual traffic",
    "access denied",
    "are you a robot",
    "request blocked",
    "enable javascript and cookies to continue",
    "verifying you are human",
];

/// Classify a response body as a challenge page. Returns the matched marker.
pub fn detect_block_signal(body: &str) -> Option<&'static str> {
    let haystack = body.to_lowercase();
    BLOCK_MARKERS.iter().find(|m| haystack.contains(**m)).copied()
}

#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    /// Local retries for transient network errors, with fixed delay.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    /// Refuse targets that are IP-literal private/loopback hosts.
    pub guard_private_hosts: bool,
}

impl Default for HttpEngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            guard_private_hosts: true,
        }
    }
}

/// HTTP fetch engine for tier-2 sources.
#[derive(Clone)]
pub struct HttpEngine {
    client: Client,
    config: HttpEngineConfig,
}

impl HttpEngine {
    pub fn new() -> Result<Self, ScrapeError> {
        Self::with_config(HttpEngineConfig::default())
    }

    pub fn with_config(config: HttpEngineConfig) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ScrapeError::Http(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn fetch(
        &self,
        source: &Source,
        scraping: &ScrapingConfig,
        term: &str,
    ) -> Result<String, ScrapeError> {
        let url = substitute_query(&scraping.search_url, term);
        validate_target(&url, self.config.guard_private_hosts)?;

        let fields: Vec<(String, String)> = scraping
            .form_fields
            .iter()
            .map(|(k, v)| (k.clone(), substitute_query(v, term)))
            .collect();

        let request = match scraping.method {
            HttpMethod::Get => self.client.get(&url).query(&fields),
            HttpMethod::Post => self.client.post(&url).form(&fields),
        };

        let response = request
            .headers(browser_headers())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScrapeError::Timeout(self.config.timeout.as_secs())
                } else if e.is_connect() {
                    ScrapeError::Network(format!("Connection failed: {e}"))
                } else {
                    ScrapeError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            403 => return Err(ScrapeError::Blocked("HTTP 403 challenge".into())),
            429 => return Err(ScrapeError::RateLimited),
            _ if !status.is_success() => {
                return Err(ScrapeError::Http(format!(
                    "HTTP {} for {}",
                    status.as_u16(),
                    source.id
                )));
            }
            _ => {}
        }

        response
            .text()
            .await
            .map_err(|e| ScrapeError::Http(format!("Failed to read response body: {e}")))
    }
}

impl TierEngine for HttpEngine {
    async fn scrape(
        &self,
        source: &Source,
        query: &ScrapeQuery,
    ) -> Result<ScrapeResult, ScrapeError> {
        let scraping = source
            .config
            .scraping
            .as_ref()
            .ok_or_else(|| ScrapeError::Config {
                source_id: source.id.clone(),
                message: "source has no scraping config".into(),
            })?;

        let term = query.term();
        let mut attempt = 0u32;
        let body = loop {
            match self.fetch(source, scraping, term).await {
                Ok(body) => break body,
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::debug!(source = %source.id, error = %e, attempt,
                        "Transient fetch error, retrying after fixed delay");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(signal) = detect_block_signal(&body) {
            return Err(ScrapeError::Blocked(format!("challenge page ({signal})")));
        }

        let (entities, total_found) =
            extract::extract_entities(&body, scraping, source, query.options.limit);
        tracing::debug!(source = %source.id, rows = total_found, "Parsed result page");

        Ok(ScrapeResult::success(&source.id, term, entities, total_found))
    }
}

/// Fill the `{query}` placeholder. Spaces become `+` so the result stays a
/// valid URL when the placeholder sits in the path or query string.
fn substitute_query(template: &str, term: &str) -> String {
    template.replace("{query}", &term.replace(' ', "+"))
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(*util::pick(USER_AGENTS)) {
        headers.insert(USER_AGENT, ua);
    }
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers
}

/// Refuse non-http(s) schemes and, when guarding, IP-literal private hosts.
/// Detail links come out of scraped pages, so a hostile page must not be
/// able to point follow-up fetches at loopback or link-local addresses.
fn validate_target(url_str: &str, guard_private_hosts: bool) -> Result<(), ScrapeError> {
    let url =
        Url::parse(url_str).map_err(|e| ScrapeError::Http(format!("Invalid URL '{url_str}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ScrapeError::Http(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    if guard_private_hosts
        && let Some(host) = url.host_str()
        && let Ok(ip) = host.parse::<IpAddr>()
        && is_private_ip(ip)
    {
        return Err(ScrapeError::Http(format!(
            "Refusing request to private/reserved address {host}"
        )));
    }

    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::Tier;
    use argus_core::testutil::make_source;

    #[test]
    fn test_detect_block_signal() {
        assert_eq!(
            detect_block_signal("<html>Please complete the CAPTCHA to continue</html>"),
            Some("captcha")
        );
        assert_eq!(
            detect_block_signal("<div id=\"cf-chl-widget\"></div>"),
            Some("cf-chl")
        );
        assert_eq!(
            detect_block_signal("We have detected unusual traffic from your network"),
            Some("unusual traffic")
        );
        assert_eq!(
            detect_block_signal("<html><body><table class=\"results\">...</table></body></html>"),
            None
        );
    }

    #[test]
    fn test_substitute_query() {
        assert_eq!(
            substitute_query("https://x.gov/search?name={query}", "acme holdings"),
            "https://x.gov/search?name=acme+holdings"
        );
        assert_eq!(
            substitute_query("https://x.gov/search", "acme"),
            "https://x.gov/search"
        );
    }

    #[test]
    fn test_validate_target_schemes() {
        assert!(validate_target("https://example.gov/search", true).is_ok());
        assert!(validate_target("http://example.gov/search", true).is_ok());
        assert!(validate_target("file:///etc/passwd", true).is_err());
        assert!(validate_target("ftp://example.gov", true).is_err());
        assert!(validate_target("not a url", true).is_err());
    }

    #[test]
    fn test_validate_target_private_hosts() {
        assert!(validate_target("http://127.0.0.1/admin", true).is_err());
        assert!(validate_target("http://192.168.1.1/", true).is_err());
        assert!(validate_target("http://169.254.169.254/latest/meta-data/", true).is_err());
        assert!(validate_target("http://[::1]/", true).is_err());
        // Guard off: private literals allowed (local test fixtures).
        assert!(validate_target("http://127.0.0.1:8080/fixtures", false).is_ok());
        // Public addresses always pass.
        assert!(validate_target("http://93.184.216.34/", true).is_ok());
    }

    #[test]
    fn test_is_private_ip() {
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(is_private_ip("172.16.0.1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
        assert!(is_private_ip("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_browser_headers_present() {
        let headers = browser_headers();
        let ua = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(USER_AGENTS.contains(&ua));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
    }

    #[tokio::test]
    async fn test_missing_scraping_config_is_a_config_error() {
        let engine = HttpEngine::new().unwrap();
        let source = make_source("bare", Tier::Http);

        let err = engine
            .scrape(&source, &ScrapeQuery::new("acme"))
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Config { .. }));
    }
}
