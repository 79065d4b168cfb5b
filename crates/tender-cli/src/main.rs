use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tender_adapters::{adapter_for_source, SourceRegistry};
use tender_core::RawTenderRecord;
use tender_normalize::enhance::organization_id_of;
use tender_normalize::{
    decide, enhance, normalize_without_llm, EnhanceContext, HttpCompletionClient, RuleMode,
};
use tender_storage::PgTenderStore;
use tender_sync::{IngestConfig, IngestOptions, Ingestor};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tender-cli")]
#[command(about = "Unified tender ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest one source.
    Ingest {
        #[arg(long)]
        source: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Ingest every enabled source.
    IngestAll {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Show the decision and rule-based normalization of one raw record.
    Decide {
        #[arg(long)]
        source: String,
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// New normalizations per source; zero or negative means all.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    limit: i64,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    fn options(&self) -> IngestOptions {
        IngestOptions {
            limit: self.limit,
            force: self.force,
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    fmt().with_env_filter(filter).with_target(false).compact().init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();
    let registry = config.load_registry()?;

    match cli.command.unwrap_or(Commands::IngestAll {
        run: RunArgs::default(),
    }) {
        Commands::Ingest { source, run } => {
            let ingestor = build_ingestor(config).await?;
            let stats = ingestor.ingest(&registry, &source, run.options()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::IngestAll { run } => {
            let ingestor = build_ingestor(config).await?;
            let summary = ingestor.ingest_all(&registry, run.options()).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Decide { source, file } => {
            let report = explain(&registry, &config, &source, &file)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn build_ingestor(config: IngestConfig) -> Result<Ingestor> {
    let store = PgTenderStore::connect(&config.database_url).await?;
    let llm = config.llm_config().map(HttpCompletionClient::new).transpose()?;
    info!(llm = llm.is_some(), "ingestor ready");
    let mut ingestor = Ingestor::new(Arc::new(store), config);
    if let Some(client) = llm {
        ingestor = ingestor.with_llm(Arc::new(client));
    }
    Ok(ingestor)
}

fn explain(
    registry: &SourceRegistry,
    config: &IngestConfig,
    source: &str,
    file: &Path,
) -> Result<serde_json::Value> {
    let adapter = adapter_for_source(registry, source)
        .with_context(|| format!("source {source} is not registered"))?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
    let raw = RawTenderRecord::from_json(value).context("raw record must be a JSON object")?;

    let profile = adapter.profile();
    let today = chrono::Utc::now().date_naive();
    let decision = decide(&raw, profile, &config.decision);
    let mode = if decision.use_llm {
        RuleMode::Fallback
    } else {
        RuleMode::Fast
    };
    let outcome = normalize_without_llm(&raw, profile, mode, today);
    let mut tender = outcome.tender;
    tender.source_id = adapter.source_id(&raw);
    tender.fill_missing_from(&adapter.map_fields(&raw));
    if tender.url.is_none() {
        tender.url = adapter.generate_url(&raw);
    }
    let organization_id = organization_id_of(&raw);
    let ctx = EnhanceContext::new(today)
        .with_profile(profile)
        .with_organization_id(organization_id.as_deref());
    let mut tender = enhance(tender, &ctx);
    tender.prepare_for_write();

    Ok(json!({
        "decision": decision,
        "reason": decision.reason.to_string(),
        "tender": tender,
        "warnings": outcome.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
    }))
}
