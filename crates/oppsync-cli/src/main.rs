use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use oppsync_adapters::{adapter_for_source, unstop_client, ScanPolicy, UNSTOP_SOURCE_ID};
use oppsync_core::ItemKind;
use oppsync_storage::{HttpFetcher, OutputDir};
use oppsync_sync::{scrape_to_files, RunReport, SyncConfig, SyncRunner, DEFAULT_PER_PAGE};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "oppsync-cli")]
#[command(about = "Delta sync of opportunity listings into a remote collection")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prune expired records, scan sources for new ones, and upload them.
    Sync {
        /// Pipeline name, or `all` to run every configured pipeline in order.
        #[arg(long, default_value = "all")]
        pipeline: String,
    },
    /// Scan a source with no baseline and write JSON and CSV files only.
    Scrape {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long, default_value = UNSTOP_SOURCE_ID)]
        source: String,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: u32,
        /// 0 scans until an empty page.
        #[arg(long, default_value_t = 0)]
        max_pages: u32,
        /// Defaults to `<source>_<kind>`.
        #[arg(long)]
        out_prefix: Option<String>,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Serve the HTTP run trigger, plus the scheduler when enabled.
    Serve,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Jobs,
    Competitions,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Jobs => ItemKind::Job,
            KindArg::Competitions => ItemKind::Competition,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,oppsync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sync {
        pipeline: "all".to_string(),
    });

    match command {
        Commands::Sync { pipeline } => {
            let runner = SyncRunner::from_env().await?;
            let reports = if pipeline == "all" {
                runner.run_all().await?
            } else {
                vec![runner.run(&pipeline).await?]
            };
            println!("{}", serde_json::to_string_pretty(&reports)?);
            report_failures(&reports)?;
        }
        Commands::Scrape {
            kind,
            source,
            per_page,
            max_pages,
            out_prefix,
            out_dir,
        } => {
            let kind = ItemKind::from(kind);
            let config = SyncConfig::from_env();
            let client = unstop_client(HttpFetcher::new(config.http_config())?);
            let adapter = adapter_for_source(kind, &source, &client)
                .with_context(|| format!("no {kind} adapter for source {source:?}"))?;
            let prefix = out_prefix
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| format!("{}_{kind}", adapter.source_id()));
            let policy = ScanPolicy {
                page_size: per_page.max(1),
                max_pages,
                stop_on_fully_seen_page: true,
            };
            let report =
                scrape_to_files(adapter.as_ref(), &policy, &OutputDir::new(out_dir), &prefix)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve => {
            oppsync_web::serve_from_env().await?;
        }
    }

    Ok(())
}

fn report_failures(reports: &[RunReport]) -> Result<()> {
    let failed = reports
        .iter()
        .filter(|r| !r.ok)
        .map(|r| r.pipeline.as_str())
        .collect::<Vec<_>>();
    if !failed.is_empty() {
        bail!("upload incomplete for: {}", failed.join(", "));
    }
    Ok(())
}
