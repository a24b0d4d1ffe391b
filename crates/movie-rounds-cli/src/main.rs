use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use movie_rounds_api::{
    AssetPreloader, ExperimentConfig, FileCatalogSource, HttpAssetPreloader, NoopPreloader,
    RoundsService,
};
use movie_rounds_core::{dedupe_catalog, parse_catalog};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "mr")]
#[command(about = "Movie Rounds CLI")]
struct Cli {
    /// Movie dataset (JSON array of catalog rows).
    #[arg(long, global = true, default_value = "./movies.json")]
    catalog: PathBuf,

    /// Experiment config (YAML, or JSON when the extension is `.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Rounds {
        #[command(subcommand)]
        command: Box<RoundsCommand>,
    },
    Catalog {
        #[command(subcommand)]
        command: Box<CatalogCommand>,
    },
    Filters {
        #[command(subcommand)]
        command: Box<FiltersCommand>,
    },
    Config {
        #[command(subcommand)]
        command: Box<ConfigCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum RoundsCommand {
    Allocate(RoundsAllocateArgs),
}

#[derive(Debug, Args)]
struct RoundsAllocateArgs {
    #[arg(long)]
    seed: Option<u64>,
    /// Fetch every poster and backdrop URL before reporting.
    #[arg(long, default_value_t = false)]
    preload: bool,
    /// Write the full allocation here and print only a summary.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    Stats,
    Dedupe(CatalogDedupeArgs),
}

#[derive(Debug, Args)]
struct CatalogDedupeArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum FiltersCommand {
    Summary(FiltersSummaryArgs),
}

#[derive(Debug, Args)]
struct FiltersSummaryArgs {
    /// Limit output to one category id; every configured category otherwise.
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    match path {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(ExperimentConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Rounds { command } => run_rounds(*command, config, &cli.catalog).await,
        Command::Catalog { command } => run_catalog(*command, config, &cli.catalog).await,
        Command::Filters { command } => run_filters(&command, &config),
        Command::Config { command } => run_config(&command, &config),
    }
}

async fn run_rounds(
    command: RoundsCommand,
    config: ExperimentConfig,
    catalog: &Path,
) -> Result<()> {
    match command {
        RoundsCommand::Allocate(args) => run_rounds_allocate(&args, config, catalog).await,
    }
}

async fn run_rounds_allocate(
    args: &RoundsAllocateArgs,
    config: ExperimentConfig,
    catalog: &Path,
) -> Result<()> {
    let preloader: Arc<dyn AssetPreloader> = if args.preload {
        Arc::new(HttpAssetPreloader::new(Duration::from_millis(config.preload_timeout_ms))?)
    } else {
        Arc::new(NoopPreloader)
    };
    let source = Arc::new(FileCatalogSource::new(catalog.to_path_buf()));
    let service = match args.seed {
        Some(seed) => RoundsService::with_seed(config, source, preloader, seed),
        None => RoundsService::new(config, source, preloader),
    };

    let snapshot = service.get_or_build().await.map_err(|err| anyhow!(err))?;
    let value = serde_json::to_value(&*snapshot)?;

    let Some(out) = &args.out else {
        return emit_json(value);
    };
    fs::write(out, serde_json::to_string_pretty(&value)?)
        .with_context(|| format!("failed to write rounds to {}", out.display()))?;
    emit_json(serde_json::json!({
        "out": out.display().to_string(),
        "build_id": snapshot.build_id,
        "catalog_fingerprint": snapshot.catalog_fingerprint,
        "rounds": snapshot.plan.rounds.len(),
        "assigned": snapshot.plan.items().count(),
        "preload": snapshot.preload,
    }))
}

async fn run_catalog(
    command: CatalogCommand,
    config: ExperimentConfig,
    catalog: &Path,
) -> Result<()> {
    match command {
        CatalogCommand::Stats => {
            let service = RoundsService::new(
                config,
                Arc::new(FileCatalogSource::new(catalog.to_path_buf())),
                Arc::new(NoopPreloader),
            );
            let stats = service.catalog_stats().await.map_err(|err| anyhow!(err))?;
            emit_json(serde_json::to_value(stats)?)
        }
        CatalogCommand::Dedupe(args) => run_catalog_dedupe(&args, catalog),
    }
}

fn run_catalog_dedupe(args: &CatalogDedupeArgs, catalog: &Path) -> Result<()> {
    let bytes = fs::read(catalog)
        .with_context(|| format!("failed to read catalog {}", catalog.display()))?;
    let items = parse_catalog(&bytes)?;
    let input = items.len();
    let report = dedupe_catalog(items);
    fs::write(&args.out, serde_json::to_string_pretty(&report.items)?)
        .with_context(|| format!("failed to write catalog to {}", args.out.display()))?;
    tracing::info!(input, kept = report.items.len(), "deduplicated catalog");
    emit_json(serde_json::json!({
        "input": input,
        "kept": report.items.len(),
        "removed_ids": report.removed_ids,
        "out": args.out.display().to_string(),
    }))
}

fn run_filters(command: &FiltersCommand, config: &ExperimentConfig) -> Result<()> {
    match command {
        FiltersCommand::Summary(args) => {
            if let Some(category_id) = &args.category {
                let summary = config
                    .filter_summary(category_id)
                    .ok_or_else(|| anyhow!("unknown category `{category_id}`"))?;
                return emit_json(serde_json::json!({
                    "category": category_id,
                    "summary": summary,
                }));
            }
            let summaries = config
                .categories
                .iter()
                .filter_map(|category| {
                    let summary = config.filter_summary(&category.id)?;
                    Some((category.id.clone(), summary))
                })
                .collect::<BTreeMap<_, _>>();
            emit_json(serde_json::json!({ "categories": summaries }))
        }
    }
}

fn run_config(command: &ConfigCommand, config: &ExperimentConfig) -> Result<()> {
    match command {
        ConfigCommand::Show => emit_json(serde_json::to_value(config)?),
    }
}
