//! Tier-3/4 engine: headless Chromium with fingerprint evasion.
//!
//! One Chromium process is shared across all clones of the engine; each
//! scrape opens a fresh tab, drives the search form the way a person would
//! (randomized dwell, per-keystroke cadence, a scroll before submitting),
//! and parses the rendered DOM through the same selector path as the HTTP
//! tier.
//!
//! The fingerprint (user agent, window size, locale, timezone offset) is
//! randomized once per engine session and applied via launch flags plus an
//! init script injected before any page script runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;

use argus_core::error::ScrapeError;
use argus_core::models::{ScrapeQuery, ScrapeResult};
use argus_core::source::{ScrapingConfig, Source};
use argus_core::traits::TierEngine;
use argus_core::util;

use crate::extract;
use crate::http_engine::{USER_AGENTS, detect_block_signal};

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];
const LOCALES: &[&str] = &["en-US", "en-GB"];
/// Minutes west of UTC: US Eastern through Pacific.
const TZ_OFFSETS: &[i32] = &[300, 360, 420, 480];

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const WAIT_POLL_ATTEMPTS: u32 = 20;

/// Per-session browser identity.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    pub width: u32,
    pub height: u32,
    pub locale: String,
    pub tz_offset_minutes: i32,
}

impl Fingerprint {
    pub fn random() -> Self {
        let (width, height) = *util::pick(VIEWPORTS);
        Self {
            user_agent: (*util::pick(USER_AGENTS)).to_string(),
            width,
            height,
            locale: (*util::pick(LOCALES)).to_string(),
            tz_offset_minutes: *util::pick(TZ_OFFSETS),
        }
    }
}

/// Delay ranges for human-like interaction.
#[derive(Debug, Clone)]
pub struct HumanPacing {
    pub think_ms: (u64, u64),
    pub keystroke_ms: (u64, u64),
}

impl Default for HumanPacing {
    fn default() -> Self {
        Self {
            think_ms: (250, 900),
            keystroke_ms: (40, 140),
        }
    }
}

impl HumanPacing {
    async fn think(&self) {
        tokio::time::sleep(Duration::from_millis(util::jitter_range(
            self.think_ms.0,
            self.think_ms.1,
        )))
        .await;
    }

    async fn keystroke(&self) {
        tokio::time::sleep(Duration::from_millis(util::jitter_range(
            self.keystroke_ms.0,
            self.keystroke_ms.1,
        )))
        .await;
    }
}

/// Headless-browser engine for tier-3/4 sources.
#[derive(Clone)]
pub struct BrowserEngine {
    browser: Arc<Browser>,
    fingerprint: Fingerprint,
    pacing: HumanPacing,
    timeout: Duration,
}

impl BrowserEngine {
    /// Launches a headless Chromium with a randomized fingerprint and a
    /// 60 s per-scrape budget. Requires a Chrome/Chromium binary reachable
    /// via `$CHROME_BIN`, a well-known path, or `chromiumoxide`'s lookup.
    pub async fn new() -> Result<Self, ScrapeError> {
        Self::with_timeout(Duration::from_secs(60)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, ScrapeError> {
        let fingerprint = Fingerprint::random();

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.width, fingerprint.height);

        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg(format!("--user-agent={}", fingerprint.user_agent))
            .arg(format!("--lang={}", fingerprint.locale))
            .build()
            .map_err(|e| ScrapeError::Browser(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Browser(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            fingerprint,
            pacing: HumanPacing::default(),
            timeout,
        })
    }

    pub fn with_pacing(mut self, pacing: HumanPacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Locate a Chrome/Chromium binary, honouring `$CHROME_BIN` first.
    /// Returning `None` lets `chromiumoxide` do its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        [
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    }

    async fn drive_search(
        &self,
        page: &Page,
        scraping: &ScrapingConfig,
        term: &str,
    ) -> Result<(), ScrapeError> {
        let nav_url = scraping
            .search_url
            .replace("{query}", &term.replace(' ', "+"));
        page.goto(nav_url.as_str())
            .await
            .map_err(|e| ScrapeError::Browser(format!("Navigation failed: {e}")))?;
        let _ = page.wait_for_navigation().await;

        self.pacing.think().await;

        if let Some(field) = &scraping.query_field {
            let input = page.find_element(field.as_str()).await.map_err(|e| {
                ScrapeError::Browser(format!("Search input '{field}' not found: {e}"))
            })?;

            input
                .click()
                .await
                .map_err(|e| ScrapeError::Browser(format!("Click failed: {e}")))?;
            self.pacing.think().await;

            // Per-character cadence; a pasted-in query is a bot tell.
            for ch in term.chars() {
                input
                    .type_str(ch.to_string())
                    .await
                    .map_err(|e| ScrapeError::Browser(format!("Typing failed: {e}")))?;
                self.pacing.keystroke().await;
            }

            let _ = page
                .evaluate("window.scrollBy(0, 200 + Math.floor(Math.random() * 200))")
                .await;
            self.pacing.think().await;

            match &scraping.submit_selector {
                Some(submit) => {
                    let button = page.find_element(submit.as_str()).await.map_err(|e| {
                        ScrapeError::Browser(format!("Submit control '{submit}' not found: {e}"))
                    })?;
                    button
                        .click()
                        .await
                        .map_err(|e| ScrapeError::Browser(format!("Submit failed: {e}")))?;
                }
                None => {
                    input
                        .press_key("Enter")
                        .await
                        .map_err(|e| ScrapeError::Browser(format!("Submit failed: {e}")))?;
                }
            }
            let _ = page.wait_for_navigation().await;
        }

        if let Some(selector) = &scraping.wait_for_selector {
            let mut found = false;
            for _ in 0..WAIT_POLL_ATTEMPTS {
                if page.find_element(selector.as_str()).await.is_ok() {
                    found = true;
                    break;
                }
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
            if !found {
                tracing::warn!(selector = %selector,
                    "Result selector never appeared, parsing page as-is");
            }
        }

        Ok(())
    }
}

impl TierEngine for BrowserEngine {
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

        let attempt = async {
            let page = self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| ScrapeError::Browser(format!("Failed to open tab: {e}")))?;

            page.evaluate_on_new_document(stealth_script(&self.fingerprint))
                .await
                .map_err(|e| ScrapeError::Browser(format!("Stealth injection failed: {e}")))?;

            let driven = self.drive_search(&page, scraping, term).await;
            let html = match driven {
                Ok(()) => page
                    .content()
                    .await
                    .map_err(|e| ScrapeError::Browser(format!("Failed to read page: {e}"))),
                Err(e) => Err(e),
            };
            let _ = page.close().await;
            html
        };

        let html = tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| ScrapeError::Timeout(self.timeout.as_secs()))??;

        if let Some(signal) = detect_block_signal(&html) {
            let message = if source.config.captcha_expected {
                format!("captcha wall ({signal}); expected for this source")
            } else {
                format!("challenge page ({signal})")
            };
            return Err(ScrapeError::Blocked(message));
        }

        let (entities, total_found) =
            extract::extract_entities(&html, scraping, source, query.options.limit);
        tracing::debug!(source = %source.id, rows = total_found, "Parsed rendered page");

        Ok(ScrapeResult::success(&source.id, term, entities, total_found))
    }
}

/// Injected before any page script runs; papers over the obvious headless
/// tells without claiming to beat serious detection vendors.
fn stealth_script(fingerprint: &Fingerprint) -> String {
    format!(
        r#"
Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
Object.defineProperty(navigator, 'languages', {{ get: () => ['{locale}', 'en'] }});
Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3] }});
window.chrome = window.chrome || {{ runtime: {{}} }};
Date.prototype.getTimezoneOffset = function() {{ return {tz}; }};
"#,
        locale = fingerprint.locale,
        tz = fingerprint.tz_offset_minutes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_drawn_from_pools() {
        for _ in 0..20 {
            let fp = Fingerprint::random();
            assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&(fp.width, fp.height)));
            assert!(LOCALES.contains(&fp.locale.as_str()));
            assert!(TZ_OFFSETS.contains(&fp.tz_offset_minutes));
        }
    }

    #[test]
    fn test_stealth_script_masks_webdriver_and_timezone() {
        let fp = Fingerprint {
            user_agent: USER_AGENTS[0].to_string(),
            width: 1920,
            height: 1080,
            locale: "en-US".into(),
            tz_offset_minutes: 300,
        };
        let script = stealth_script(&fp);
        assert!(script.contains("'webdriver'"));
        assert!(script.contains("['en-US', 'en']"));
        assert!(script.contains("return 300;"));
    }
}
