use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use prometheus::Registry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use twin_search_sync::{
    config::Config,
    error::AppError,
    search::{
        fields, gather_metrics, init_search_metrics, HealthMonitor, HttpSearchBackend,
        IndexSchemaManager, MemoryBackend, QueryBuilder, SearchBackend, SearchDocument,
        SearchExecutor, SearchOptions,
    },
};

#[derive(Parser)]
#[command(name = "twin-search-sync", version)]
#[command(about = "Maintain and query the unified search index", long_about = None)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "TWIN_SEARCH_CONFIG", default_value = "config/local.toml")]
    config: String,

    /// Emit JSON log lines (overrides observability.json_logs)
    #[arg(long)]
    json_logs: bool,

    /// Print Prometheus metrics to stderr when done
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the index and print the resulting health state
    Health,

    /// Create the index, or update it in place (rebuilding it if rejected)
    CreateIndex,

    /// Delete the index and every document in it
    DeleteIndex {
        /// Required; deleting the index cannot be undone
        #[arg(long)]
        yes: bool,
    },

    /// Search the index and print hits as JSON lines
    Search {
        #[arg(value_name = "TEXT")]
        text: String,

        /// Restrict to these document types (repeatable)
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        #[arg(short, long, default_value = "20")]
        size: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        let code = err
            .downcast_ref::<AppError>()
            .map(AppError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_from(&cli.config)
        .map_err(AppError::from)
        .context("Failed to load configuration")?;

    init_tracing(&config, cli.json_logs);
    tracing::info!("Starting twin-search-sync v{}", env!("CARGO_PKG_VERSION"));

    let registry = Registry::new();
    if config.observability.prometheus_enabled {
        if let Err(e) = init_search_metrics(&registry) {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    let backend: Arc<dyn SearchBackend> = if config.search.is_configured() {
        Arc::new(HttpSearchBackend::new(&config.search).map_err(AppError::from)?)
    } else {
        // Components short-circuit before calling it
        Arc::new(MemoryBackend::new())
    };
    let health = HealthMonitor::global();

    let outcome = execute(cli.command, &config, backend, health, &cancel).await;

    if cli.metrics {
        eprint!("{}", gather_metrics(&registry));
    }
    outcome
}

async fn execute(
    command: Commands,
    config: &Config,
    backend: Arc<dyn SearchBackend>,
    health: Arc<HealthMonitor>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Commands::Health => {
            let manager = IndexSchemaManager::new(config.search.clone(), backend, health);
            let state = manager.check_health(cancel).await;
            println!("{}", state);
        }

        Commands::CreateIndex => {
            let manager = IndexSchemaManager::new(config.search.clone(), backend, health.clone());
            manager
                .create_or_update_index(cancel)
                .await
                .map_err(AppError::from)?;
            println!("{}", health.get());
        }

        Commands::DeleteIndex { yes } => {
            if !yes {
                return Err(AppError::Validation(
                    "refusing to delete the index without --yes".to_string(),
                )
                .into());
            }
            let manager = IndexSchemaManager::new(config.search.clone(), backend, health);
            manager.delete_index(cancel).await.map_err(AppError::from)?;
            println!("Deleted index {}", manager.index_name());
        }

        Commands::Search { text, types, size } => {
            let executor: SearchExecutor<SearchDocument> =
                SearchExecutor::new(config.search.clone(), backend, health)
                    .with_retry_policy(config.retry.to_policy());

            let filter = QueryBuilder::create()
                .search_in(fields::TYPE, &types)
                .map_err(AppError::from)?
                .to_filter();

            match filter {
                None => {
                    let mut hits = executor.search(text, size, cancel.clone());
                    while let Some(hit) = hits.next().await {
                        println!("{}", serde_json::to_string(&hit.map_err(AppError::from)?)?);
                    }
                }
                Some(filter) => {
                    let options = SearchOptions::default().with_filter(filter).with_size(size);
                    let page = executor
                        .search_with_options(&text, options, cancel)
                        .await
                        .map_err(AppError::from)?
                        .ok_or_else(|| {
                            AppError::Authorization("search index refused the query".to_string())
                        })?;
                    for hit in page.results {
                        println!("{}", serde_json::to_string(&hit)?);
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(config: &Config, json_override: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("twin_search_sync={}", config.observability.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json_override || config.observability.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
