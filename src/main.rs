//! litscout - literature discovery pipeline
//!
//! Searches Google Scholar, fills in missing fields from BibTeX, arXiv and
//! landing pages, summarizes each paper with a language model and files it
//! in a Zotero collection.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! litscout search "agentic RAG" "graph neural networks" --max-results 5
//! litscout search --file keywords.txt --no-save --output ./output
//! litscout saved --collection "Research AI"
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! litscout serve --port 3000
//! ```

use anyhow::{bail, Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use litscout::{
    arxiv::ArxivClient,
    backfill::HttpPageFetcher,
    config::{default_config_path, Config},
    cookies::CookieStore,
    identity::IdentityRotator,
    llm::{build_generator, ResponseGenerator},
    pipeline::{Pipeline, RunReport},
    processing::ProcessingAgent,
    record::{CandidateRecord, RecordRow},
    retry::RetryPolicy,
    scholar::ScholarClient,
    search::{CancelFlag, SearchAgent},
    zotero::{ZoteroAgent, ZoteroClient},
    LitscoutError,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Literature discovery pipeline: Scholar search, arXiv enrichment, Zotero
#[derive(Parser)]
#[command(name = "litscout")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (default: <config_dir>/litscout/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, analyse and save papers, one keyword at a time
    Search {
        /// Search keywords (each one is a separate search)
        keywords: Vec<String>,

        /// Read keywords from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Results drawn per keyword (overrides the config)
        #[arg(short, long)]
        max_results: Option<usize>,

        /// Skip saving to Zotero
        #[arg(long)]
        no_save: bool,

        /// Write results.json and results.csv to this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List papers saved in Zotero
    Saved {
        /// Collection name (default: the configured collection)
        #[arg(long)]
        collection: Option<String>,

        /// Free-text search across the library instead
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Manage Google Scholar session cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Import cookies exported from a browser (JSON array)
    Import {
        /// Exported cookie file
        file: PathBuf,
    },
    /// Delete saved cookies
    Clear,
    /// Show the cookie file location
    Path,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if cli.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Search {
            keywords,
            file,
            max_results,
            no_save,
            output,
        } => run_search(config, keywords, file, max_results, no_save, output).await,
        Commands::Saved { collection, query } => run_saved(&config, collection, query).await,
        Commands::Serve { port, host } => run_server(config, host, port).await,
        Commands::Cookies { action } => handle_cookies(action),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(config)
}

// ============================================================================
// Component wiring
// ============================================================================

/// Shared pieces that live as long as the process.
struct Components {
    config: Arc<Config>,
    retry: RetryPolicy,
    rotator: Arc<IdentityRotator>,
    cookies: CookieStore,
    generator: Arc<dyn ResponseGenerator>,
}

impl Components {
    fn build(config: Config) -> Result<Self> {
        let retry = RetryPolicy::new(&config.retry);
        let generator = build_generator(&config.llm, retry.clone())
            .context("Failed to create response generator")?;
        Ok(Self {
            rotator: Arc::new(IdentityRotator::new(config.search.proxies.clone())),
            cookies: CookieStore::new().context("Failed to locate cookie file")?,
            config: Arc::new(config),
            retry,
            generator,
        })
    }

    fn search_agent(&self, max_results: usize) -> Result<SearchAgent> {
        let timeout = Duration::from_secs(self.config.search.request_timeout_secs);
        let source = ScholarClient::new(&self.config.search, self.rotator.clone(), self.cookies.clone());
        let arxiv = ArxivClient::new(timeout).context("Failed to create arXiv client")?;

        Ok(SearchAgent::new(
            max_results,
            Arc::new(source),
            self.rotator.clone(),
            self.generator.clone(),
            Arc::new(arxiv),
            Arc::new(HttpPageFetcher::new(timeout)),
            self.retry.clone(),
        ))
    }

    fn zotero_agent(&self) -> Result<ZoteroAgent> {
        let client = ZoteroClient::new(&self.config.zotero).context("Failed to create Zotero client")?;
        Ok(ZoteroAgent::new(Arc::new(client), &self.config.zotero))
    }
}

// ============================================================================
// Search Pipeline
// ============================================================================

async fn run_search(
    config: Config,
    keywords: Vec<String>,
    file: Option<PathBuf>,
    max_results: Option<usize>,
    no_save: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = match max_results {
        Some(n) => config.with_max_results(n)?,
        None => config,
    };
    config.validate()?;

    let mut keywords: Vec<String> = keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if let Some(path) = &file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keyword file {}", path.display()))?;
        keywords.extend(Pipeline::keyword_lines(&text));
    }
    if keywords.is_empty() {
        bail!("No keywords given (pass them as arguments or with --file)");
    }

    println!("=== litscout ===");
    println!("Keywords: {}", keywords.len());
    println!("Max results per keyword: {}", config.search.max_results);
    println!("Model: {} ({:?})", config.llm.model, config.llm.backend);
    println!();

    let components = Components::build(config)?;
    let search = components.search_agent(components.config.search.max_results)?;
    let processing = ProcessingAgent::new(components.generator.clone());
    let zotero = if no_save {
        None
    } else {
        Some(components.zotero_agent()?)
    };

    let pipeline = Pipeline::new(search, processing, zotero, CancelFlag::new());
    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current record");
            cancel.cancel();
        }
    });

    let report = pipeline.run(&keywords).await;
    print_report(&report);

    if let Some(dir) = output {
        export_report(&dir, &report)?;
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("=== Run Summary ({}) ===", Local::now().format("%Y-%m-%d %H:%M:%S"));
    for outcome in &report.outcomes {
        let record = &outcome.article.record;
        let status = match (&outcome.zotero_key, &outcome.error) {
            (Some(key), _) => format!("saved [{}]", key),
            (None, Some(e)) => format!("error: {}", e),
            (None, None) => "not saved".to_string(),
        };
        println!("- {} ({}) {}", record.title, record.year, status);
    }
    for failure in &report.failed_keywords {
        println!("! {}: {}", failure.keyword, failure.error);
    }
    println!();
    println!("Total: {}", report.total);
    println!("Saved: {}", report.saved);
    println!("Errors: {}", report.errors);
    if report.stopped {
        println!("Run stopped before all keywords were searched.");
    }
}

/// Write the run as JSON and the records as CSV.
fn export_report(dir: &Path, report: &RunReport) -> Result<()> {
    std::fs::create_dir_all(dir).context("Failed to create output directory")?;

    let json_path = dir.join("results.json");
    let json = serde_json::to_string_pretty(report).context("Failed to serialize results")?;
    std::fs::write(&json_path, json).context("Failed to write results.json")?;
    println!("Saved: {:?}", json_path);

    let rows: Vec<RecordRow> = report
        .outcomes
        .iter()
        .map(|o| RecordRow::from(&o.article.record))
        .collect();
    save_csv(&dir.join("results.csv"), &rows)
}

/// Save data to CSV file
fn save_csv<T: Serialize>(path: &Path, data: &[T]) -> Result<()> {
    if data.is_empty() {
        println!("No data to save to {:?}", path);
        return Ok(());
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context("Failed to create CSV writer")?;

    for item in data {
        wtr.serialize(item).context("Failed to write CSV record")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    println!("Saved: {:?}", path);
    Ok(())
}

// ============================================================================
// Saved Items
// ============================================================================

async fn run_saved(config: &Config, collection: Option<String>, query: Option<String>) -> Result<()> {
    let client = ZoteroClient::new(&config.zotero).context("Failed to create Zotero client")?;
    let agent = ZoteroAgent::new(Arc::new(client), &config.zotero);

    let items = match &query {
        Some(q) => agent.search_saved(q).await?,
        None => agent.saved_items(collection.as_deref()).await?,
    };

    if items.is_empty() {
        println!("No saved items found.");
        return Ok(());
    }

    for item in &items {
        println!("[{}] {}", item.key, item.title);
        if !item.url.is_empty() {
            println!("    {}", item.url);
        }
        if !item.tags.is_empty() {
            println!("    tags: {}", item.tags.join(", "));
        }
        if !item.abstract_text.is_empty() {
            let preview: String = item.abstract_text.chars().take(200).collect();
            println!("    {}", preview);
        }
    }
    println!();
    println!("{} items", items.len());
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(config: Config, host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");
    println!("Starting server at http://{}:{}", host, port);

    let app_state = Arc::new(Components::build(config)?);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/search", post(search_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Search request body
#[derive(Debug, Deserialize)]
struct SearchRequest {
    keywords: Vec<String>,
    max_results: Option<usize>,
}

/// Search response
#[derive(Debug, Serialize)]
struct SearchResponse {
    status: String,
    count: usize,
    results: Vec<CandidateRecord>,
}

impl SearchResponse {
    fn failure(message: String) -> Self {
        Self {
            status: format!("error: {}", message),
            count: 0,
            results: Vec::new(),
        }
    }
}

/// Search endpoint handler
async fn search_handler(
    State(state): State<Arc<Components>>,
    Json(req): Json<SearchRequest>,
) -> (StatusCode, Json<SearchResponse>) {
    info!(keywords = ?req.keywords, max_results = ?req.max_results, "Search request");

    let max_results = req.max_results.unwrap_or(state.config.search.max_results);
    if max_results == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(SearchResponse::failure("max_results must be at least 1".to_string())),
        );
    }

    let agent = match state.search_agent(max_results) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Failed to build search agent");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SearchResponse::failure(e.to_string())),
            );
        }
    };

    match agent.search(&req.keywords).await {
        Ok(results) => (
            StatusCode::OK,
            Json(SearchResponse {
                status: "success".to_string(),
                count: results.len(),
                results,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Search failed");
            let status = match &e {
                LitscoutError::Validation(_) => StatusCode::BAD_REQUEST,
                LitscoutError::SearchUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(SearchResponse::failure(e.to_string())))
        }
    }
}

// ============================================================================
// Cookie Management
// ============================================================================

fn handle_cookies(action: CookieAction) -> Result<()> {
    let store = CookieStore::new()?;

    match action {
        CookieAction::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let count = store.import_json(&json).context("Failed to import cookies")?;
            println!("Imported {} cookies into {:?}", count, store.path());
        }
        CookieAction::Clear => {
            store.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Path => {
            println!("Cookie file: {:?}", store.path());
        }
    }

    Ok(())
}
