//! Concrete tier engines for Argus.
//!
//! `argus-core` owns orchestration; this crate owns everything that touches
//! the network: the JSON API engine, the HTTP + selector-extraction engine,
//! the headless-browser engine (feature `browser`), and detail-page
//! enrichment.

pub mod api_engine;
pub mod enrich;
pub mod extract;
pub mod http_engine;

#[cfg(feature = "browser")]
pub mod browser_engine;

pub use api_engine::ApiEngine;
pub use enrich::{DetailEnrichmentEngine, EnrichmentConfig};
pub use http_engine::{HttpEngine, HttpEngineConfig};

#[cfg(feature = "browser")]
pub use browser_engine::{BrowserEngine, Fingerprint, HumanPacing};
