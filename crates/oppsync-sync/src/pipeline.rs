use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use oppsync_adapters::{ScanPolicy, ScanStats, SourceAdapter};
use oppsync_core::{CanonicalRow, ExistingKeys, ItemKind};
use oppsync_storage::{run_timestamp, OutputDir, RemoteStore};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::baseline::{sync_baseline, BaselineRequest, BaselineResult};
use crate::config::{source_dir, PipelineConfig};
use crate::upload::{upload_rows, UploadResult};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ok: bool,
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub baseline: BaselineResult,
    pub scrape: ScrapeSummary,
    pub files: FilesSummary,
    pub upload: UploadResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    pub sources: Vec<String>,
    pub per_page: u32,
    pub max_pages: u32,
    pub delta_total: usize,
    pub delta_by_source: BTreeMap<String, usize>,
    pub platform_stats: BTreeMap<String, ScanStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilesSummary {
    pub base_dir: String,
    pub deleted_old_files_by_source: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, ArtifactPaths>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub json: String,
    pub csv: String,
}

/// One collection's run: baseline, sources in order, upload.
pub struct SyncPipeline {
    config: PipelineConfig,
    store: Arc<dyn RemoteStore>,
    sources: Vec<Box<dyn SourceAdapter>>,
    baseline_dir: PathBuf,
    delta_root: PathBuf,
    today: Option<NaiveDate>,
}

impl SyncPipeline {
    /// Fails when a source serves a different item kind than the pipeline.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn RemoteStore>,
        sources: Vec<Box<dyn SourceAdapter>>,
        baseline_dir: PathBuf,
        delta_root: PathBuf,
    ) -> Result<Self> {
        for source in &sources {
            if source.item_kind() != config.kind {
                bail!(
                    "source {} yields {} but pipeline {} expects {}",
                    source.source_id(),
                    source.item_kind(),
                    config.name,
                    config.kind
                );
            }
        }
        Ok(Self {
            config,
            store,
            sources,
            baseline_dir,
            delta_root,
            today: None,
        })
    }

    /// Pins the expiry date instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", pipeline = %self.config.name, %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunReport> {
        let started_at = Utc::now();
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let stamp = run_timestamp(Local::now());
        info!(collection = %self.config.collection_path, %today, "run started");

        let baseline_out = OutputDir::new(&self.baseline_dir);
        baseline_out.ensure().await?;
        OutputDir::new(&self.delta_root).ensure().await?;

        let baseline = sync_baseline(
            self.store.as_ref(),
            &BaselineRequest {
                kind: self.config.kind,
                collection_path: self.config.collection_path.clone(),
                deadline_field: self.config.deadline_field.clone(),
                output: baseline_out,
            },
            today,
            &stamp,
        )
        .await
        .context("baseline sync failed")?;

        let policy = self.config.scan_policy();
        let mut scrape = ScrapeSummary {
            sources: self.sources.iter().map(|s| s.source_id().to_string()).collect(),
            per_page: policy.page_size,
            max_pages: policy.max_pages,
            delta_total: 0,
            delta_by_source: BTreeMap::new(),
            platform_stats: BTreeMap::new(),
        };
        let mut files = FilesSummary {
            base_dir: self.delta_root.display().to_string(),
            ..Default::default()
        };
        let mut all_rows = Vec::new();

        for source in &self.sources {
            let source_id = source.source_id();
            let outcome = source
                .scan(&baseline.existing_keys, &policy)
                .await
                .with_context(|| format!("scanning source {source_id}"))?;

            let out = OutputDir::new(source_dir(&self.delta_root, source_id));
            out.ensure().await?;
            let deleted = out.clear_files().await;
            let prefix = format!("{source_id}_{}", self.config.name);
            let paths = write_row_artifacts(&out, &prefix, &stamp, self.config.kind, &outcome.rows)
                .await
                .with_context(|| format!("writing {source_id} artifacts"))?;

            scrape.delta_by_source.insert(source_id.to_string(), outcome.rows.len());
            scrape.platform_stats.insert(source_id.to_string(), outcome.stats);
            files.deleted_old_files_by_source.insert(source_id.to_string(), deleted);
            files.by_source.insert(source_id.to_string(), paths);
            all_rows.extend(outcome.rows);
        }
        scrape.delta_total = all_rows.len();

        let upload = upload_rows(
            self.store.as_ref(),
            &self.config.collection_path,
            &all_rows,
            self.config.upload_mode,
            self.config.upsert_chunk_size,
        )
        .await;

        let report = RunReport {
            ok: baseline.ok && upload.ok,
            run_id,
            pipeline: self.config.name.clone(),
            started_at,
            finished_at: Utc::now(),
            baseline,
            scrape,
            files,
            upload,
        };
        info!(
            ok = report.ok,
            delta_total = report.scrape.delta_total,
            uploaded = report.upload.uploaded,
            "run finished"
        );
        Ok(report)
    }
}

/// Writes `<prefix>_<stamp>.json` and `.csv` with the kind's column order.
pub async fn write_row_artifacts(
    out: &OutputDir,
    prefix: &str,
    stamp: &str,
    kind: ItemKind,
    rows: &[CanonicalRow],
) -> Result<ArtifactPaths> {
    let json = out.write_json(&format!("{prefix}_{stamp}.json"), rows).await?;
    let columns = kind.schema().columns;
    let cells = rows
        .iter()
        .map(|row| columns.iter().map(|c| row.cell(c)).collect::<Vec<_>>());
    let csv = out
        .write_csv(&format!("{prefix}_{stamp}.csv"), columns, cells)
        .await?;
    Ok(ArtifactPaths {
        json: json.display().to_string(),
        csv: csv.display().to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeReport {
    pub source: String,
    pub kind: ItemKind,
    pub rows: usize,
    pub stats: ScanStats,
    pub files: ArtifactPaths,
}

/// Full scan with no baseline, written to local files only.
pub async fn scrape_to_files(
    source: &dyn SourceAdapter,
    policy: &ScanPolicy,
    out: &OutputDir,
    prefix: &str,
) -> Result<ScrapeReport> {
    let outcome = source
        .scan(&ExistingKeys::new(), policy)
        .await
        .with_context(|| format!("scanning source {}", source.source_id()))?;
    let stamp = run_timestamp(Local::now());
    let files = write_row_artifacts(out, prefix, &stamp, source.item_kind(), &outcome.rows).await?;
    info!(
        source = source.source_id(),
        rows = outcome.rows.len(),
        json = %files.json,
        "scrape written"
    );
    Ok(ScrapeReport {
        source: source.source_id().to_string(),
        kind: source.item_kind(),
        rows: outcome.rows.len(),
        stats: outcome.stats,
        files,
    })
}
