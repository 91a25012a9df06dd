use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use argus_core::{
    AggregateOptions, MultiSearchResult, MultiSourceAggregator, QueryOptions, Registry,
    ScrapeQuery, Source, TierEngine, UnavailableEngine, UnifiedRouter,
};
use argus_client::{ApiEngine, DetailEnrichmentEngine, HttpEngine};

#[derive(Parser)]
#[command(name = "argus", version, about = "Resilient multi-source public-record search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every configured source and print the merged results
    Search {
        /// Search term (business name, owner name, …)
        query: String,

        /// Path to the source-config JSON file
        #[arg(short, long, env = "ARGUS_SOURCES", default_value = "sources.json")]
        sources: PathBuf,

        /// Restrict the search to specific source ids (repeatable)
        #[arg(long = "source")]
        only: Vec<String>,

        /// Cap results per source
        #[arg(short, long)]
        limit: Option<usize>,

        /// Bypass the result cache for this search
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Sources scraped concurrently per batch
        #[arg(long, default_value_t = 3)]
        max_concurrent: usize,

        /// Stop scheduling further batches after the first failure
        #[arg(long, default_value_t = false)]
        fail_fast: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print per-source health (tier, circuit state, availability)
    Health {
        /// Path to the source-config JSON file
        #[arg(short, long, env = "ARGUS_SOURCES", default_value = "sources.json")]
        sources: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs to stderr; stdout carries the result payload.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            query,
            sources,
            only,
            limit,
            no_cache,
            max_concurrent,
            fail_fast,
            format,
        } => {
            let sources = load_sources(&sources, &only)?;
            let query = ScrapeQuery::new(&query).with_options(QueryOptions {
                limit,
                skip_cache: no_cache,
            });
            let options = AggregateOptions {
                max_concurrent,
                continue_on_error: !fail_fast,
            };

            let result = search(sources, query, options).await?;
            print_result(&result, format)?;

            if !result.success {
                anyhow::bail!("every source failed");
            }
            Ok(())
        }

        Commands::Health { sources } => {
            let sources = load_sources(&sources, &[])?;
            let registry = Registry::new();
            let health = registry.health(&sources);
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
    }
}

fn load_sources(path: &Path, only: &[String]) -> Result<Vec<Source>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source config {}", path.display()))?;
    let mut sources: Vec<Source> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid source config {}", path.display()))?;

    if !only.is_empty() {
        sources.retain(|s| only.iter().any(|id| id == &s.id));
    }
    if sources.is_empty() {
        anyhow::bail!("no sources selected from {}", path.display());
    }
    Ok(sources)
}

async fn search(
    sources: Vec<Source>,
    query: ScrapeQuery,
    options: AggregateOptions,
) -> Result<MultiSearchResult> {
    #[cfg(feature = "browser")]
    if sources.iter().any(|s| s.tier.needs_browser()) {
        let browser = argus_client::BrowserEngine::new().await?;
        return run_search(browser, sources, query, options).await;
    }

    run_search(
        UnavailableEngine::new("browser engine not available in this run"),
        sources,
        query,
        options,
    )
    .await
}

async fn run_search<B: TierEngine>(
    browser: B,
    sources: Vec<Source>,
    query: ScrapeQuery,
    options: AggregateOptions,
) -> Result<MultiSearchResult> {
    let api = ApiEngine::new()?;
    let http = HttpEngine::new()?;
    let enricher = DetailEnrichmentEngine::new()?;

    let router = UnifiedRouter::new(api, http, browser, Arc::new(Registry::new()))
        .with_enricher(enricher);
    let aggregator = MultiSourceAggregator::new(Arc::new(router));

    Ok(aggregator.search_many(&query, &sources, &options).await)
}

fn print_result(result: &MultiSearchResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for entity in &result.results {
                writer.serialize(CsvRow::from(entity))?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}

/// Flattened entity row for CSV output.
#[derive(serde::Serialize)]
struct CsvRow {
    name: String,
    entity_number: String,
    status: String,
    entity_type: String,
    jurisdiction: String,
    registered_agent: String,
    officers: String,
    address: String,
    formation_date: String,
    sources: String,
}

impl From<&argus_core::Entity> for CsvRow {
    fn from(entity: &argus_core::Entity) -> Self {
        let officers = entity
            .officers
            .iter()
            .map(|o| match &o.role {
                Some(role) => format!("{} ({role})", o.name),
                None => o.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            name: entity.name.clone(),
            entity_number: entity.entity_number.clone().unwrap_or_default(),
            status: entity.status.clone().unwrap_or_default(),
            entity_type: entity.entity_type.clone().unwrap_or_default(),
            jurisdiction: entity.jurisdiction.clone(),
            registered_agent: entity.registered_agent.clone().unwrap_or_default(),
            officers,
            address: entity.address.clone().unwrap_or_default(),
            formation_date: entity.formation_date.clone().unwrap_or_default(),
            sources: entity.sources.join(","),
        }
    }
}
