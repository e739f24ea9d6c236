//! catalog-inspector command line
//!
//! Runs one query against the catalog, waits for enrichment and prints the
//! requested page. Ctrl-C cancels; whatever was enriched so far is printed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use catalog_inspector::application::result_store::DEFAULT_PAGE_SIZE;
use catalog_inspector::application::{CatalogEngine, SortKey, View, ViewParams};
use catalog_inspector::domain::{EngineEvent, QueryMode, QueryRequest, SalesStatus};
use catalog_inspector::infrastructure::{
    init_logging_with_config, ConfigManager, EnvToken, HttpCatalogClient,
};

/// Query the product catalog and reconcile sales statuses.
#[derive(Debug, Parser)]
#[command(name = "catalog-inspector", version, about)]
struct Cli {
    /// Query mode: by-code, by-name, all-master, master-in-sale,
    /// master-stopped, channel-in-sale, channel-stopped.
    #[arg(long, short = 'm', default_value = "by-code")]
    mode: QueryMode,

    /// Codes (separated by whitespace, commas or semicolons) or a name keyword.
    #[arg(long, short = 'i', default_value = "")]
    input: String,

    /// Read codes from a file instead of `--input`.
    #[arg(long, conflicts_with = "input")]
    input_file: Option<PathBuf>,

    /// Channel to query in channel modes (repeatable).
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Configuration file (defaults to the user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overwrite the configuration file with defaults before running.
    #[arg(long)]
    reset_config: bool,

    /// Only show rows with anomalies.
    #[arg(long)]
    special_only: bool,

    /// Only show rows with this master status.
    #[arg(long, value_parser = parse_status)]
    status: Option<SalesStatus>,

    /// Case-insensitive keyword filter.
    #[arg(long)]
    search: Option<String>,

    /// Sort column (no, code, name, sale_start, sale_end, status, ...).
    #[arg(long)]
    sort: Option<SortKey>,

    /// Sort descending.
    #[arg(long, requires = "sort")]
    desc: bool,

    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Print every row instead of one page.
    #[arg(long)]
    all: bool,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Debug logging.
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn parse_status(value: &str) -> Result<SalesStatus, String> {
    SalesStatus::from_label(value).ok_or_else(|| format!("unknown status: {value}"))
}

impl Cli {
    fn view_params(&self) -> ViewParams {
        ViewParams {
            search_keyword: self.search.clone().unwrap_or_default(),
            special_only: self.special_only,
            status_filter: self.status,
            sort_key: self.sort,
            sort_ascending: !self.desc,
            page_number: self.page.max(1),
            page_size: self.page_size.max(1),
            show_all: self.all,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    if cli.reset_config {
        manager
            .reset_to_defaults()
            .await
            .context("Failed to reset configuration")?;
    }
    let mut config = manager
        .load_layered()
        .await
        .context("Failed to load configuration")?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging_with_config(config.logging.clone())?;

    let input = match &cli.input_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => cli.input.clone(),
    };
    if cli.mode.requires_input() && input.trim().is_empty() {
        bail!("--input or --input-file is required for {}", cli.mode);
    }

    let credentials = Arc::new(EnvToken {
        variable: config.api.token_env.clone(),
    });
    let client = HttpCatalogClient::new(config.api.clone(), credentials)
        .context("Failed to create catalog client")?;
    let engine = Arc::new(CatalogEngine::new(Arc::new(client), &config));

    let mut events = engine.subscribe();
    let progress = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::BatchCompleted {
                    completed, total, ..
                }) => info!("⏳ {}/{} rows enriched", completed, total),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("Progress reporter skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let signal_engine = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupted, cancelling query");
            signal_engine.cancel().await;
        }
    });

    let request = QueryRequest::new(cli.mode, input).with_channels(cli.channels.clone());
    match engine.run_query(request).await {
        Ok(rows) => info!("📋 {} rows returned", rows),
        Err(err) if err.is_cancelled() => {
            info!("Query cancelled before any rows arrived");
            return Ok(());
        }
        Err(err) if err.is_credential() => {
            bail!("{err}. Refresh the token in ${}", config.api.token_env)
        }
        Err(err) => return Err(err.into()),
    }

    let outcome = engine.wait_for_enrichment().await;
    progress.abort();
    match &outcome {
        Ok(summary) => info!(
            "✅ Enrichment done: {} enriched, {} failed",
            summary.enriched, summary.failed
        ),
        Err(err) if err.is_cancelled() => warn!("Showing partially enriched results"),
        Err(err) => warn!("Enrichment stopped: {}", err),
    }

    let params = cli.view_params();
    if cli.json {
        let json = if cli.all {
            serde_json::to_string_pretty(&engine.export(&params).await)?
        } else {
            serde_json::to_string_pretty(&engine.get_view(&params).await)?
        };
        println!("{json}");
    } else {
        print_table(&engine.get_view(&params).await);
    }

    match outcome {
        Err(err) if err.is_credential() => {
            bail!("{err}. Refresh the token in ${}", config.api.token_env)
        }
        _ => Ok(()),
    }
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

fn print_table(view: &View) {
    println!(
        "{:>5}  {:<12} {:<28} {:<10} {:<10} {:<10} {:<14} {:<16} {}",
        "No", "Code", "Name", "Start", "End", "Status", "Descriptor", "Special", "Channels"
    );
    for row in &view.rows {
        let special = if row.loading {
            "…".to_string()
        } else if row.is_special() {
            clip(&row.special_reason(), 16)
        } else {
            String::new()
        };
        println!(
            "{:>5}  {:<12} {:<28} {:<10} {:<10} {:<10} {:<14} {:<16} {}",
            row.no,
            clip(&row.code, 12),
            clip(&row.name, 28),
            row.display_start(),
            row.display_end(),
            row.status_label(),
            clip(&row.descriptor.to_string(), 14),
            special,
            row.channel_summary()
        );
    }
    println!(
        "\nPage {}/{} · {} matching rows",
        view.page_number, view.total_pages, view.total_count
    );
}
