use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use oppsync_adapters::{known_sources, ScanPolicy, UNSTOP_REFERER};
use oppsync_core::ItemKind;
use oppsync_storage::{normalize_path, HttpClientConfig};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub const PIPELINES_FILE: &str = "pipelines.yaml";
pub const BASELINE_SUBDIR: &str = "extracted_latest";
pub const DELTA_SUBDIR: &str = "extract data";
pub const DEFAULT_PER_PAGE: u32 = 18;
pub const DEFAULT_MAX_PAGES: u32 = 1;
pub const DEFAULT_UPSERT_CHUNK: usize = 250;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub output_dir: PathBuf,
    pub jobs_node_path: String,
    pub competitions_node_path: String,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub workspace_root: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            jobs_node_path: "ai/jobs".to_string(),
            competitions_node_path: "ai/competitions".to_string(),
            scheduler_enabled: false,
            sync_cron_1: "0 0 6 * * *".to_string(),
            sync_cron_2: "0 0 18 * * *".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 25,
            workspace_root: PathBuf::from("."),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            output_dir: env_nonempty("OPPSYNC_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            jobs_node_path: env_nonempty("FIREBASE_JOBS_NODE_PATH")
                .unwrap_or(defaults.jobs_node_path),
            competitions_node_path: env_nonempty("FIREBASE_COMPETITIONS_NODE_PATH")
                .unwrap_or(defaults.competitions_node_path),
            scheduler_enabled: env_nonempty("OPPSYNC_SCHEDULER_ENABLED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            sync_cron_1: env_nonempty("SYNC_CRON_1").unwrap_or(defaults.sync_cron_1),
            sync_cron_2: env_nonempty("SYNC_CRON_2").unwrap_or(defaults.sync_cron_2),
            user_agent: env_nonempty("OPPSYNC_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_nonempty("OPPSYNC_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            workspace_root: defaults.workspace_root,
        }
    }

    /// HTTP settings for the public listing APIs.
    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            referer: Some(UNSTOP_REFERER.to_string()),
            ..Default::default()
        }
    }

    pub fn default_pipelines(&self) -> Vec<PipelineConfig> {
        vec![
            PipelineConfig::new("jobs", ItemKind::Job, &self.jobs_node_path),
            PipelineConfig::new(
                "competitions",
                ItemKind::Competition,
                &self.competitions_node_path,
            ),
        ]
    }

    /// `pipelines.yaml` from the workspace root when present, the built-in
    /// jobs and competitions pipelines otherwise.
    pub async fn load_pipelines(&self) -> Result<Vec<PipelineConfig>> {
        let path = self.workspace_root.join(PIPELINES_FILE);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(self.default_pipelines());
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        parse_pipelines(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn baseline_dir(&self, pipeline: &str) -> PathBuf {
        self.output_dir.join(BASELINE_SUBDIR).join(pipeline)
    }

    pub fn delta_root(&self, pipeline: &str) -> PathBuf {
        self.output_dir.join(DELTA_SUBDIR).join(pipeline)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    /// One store-generated key per row.
    #[default]
    PushKeys,
    /// Rows written under their composite key, in chunks.
    UpsertByKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub kind: ItemKind,
    pub collection_path: String,
    #[serde(default = "default_deadline_field")]
    pub deadline_field: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_true")]
    pub stop_on_fully_seen_page: bool,
    #[serde(default)]
    pub upload_mode: UploadMode,
    #[serde(default = "default_upsert_chunk")]
    pub upsert_chunk_size: usize,
    /// Extra query parameters sent with every listing request.
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl PipelineConfig {
    pub fn new(name: &str, kind: ItemKind, collection_path: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            collection_path: collection_path.to_string(),
            deadline_field: kind.schema().deadline_field.to_string(),
            sources: known_sources(kind).iter().map(|s| s.to_string()).collect(),
            per_page: DEFAULT_PER_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
            stop_on_fully_seen_page: true,
            upload_mode: UploadMode::default(),
            upsert_chunk_size: DEFAULT_UPSERT_CHUNK,
            extra_params: BTreeMap::new(),
        }
    }

    pub fn scan_policy(&self) -> ScanPolicy {
        ScanPolicy {
            page_size: self.per_page,
            max_pages: self.max_pages,
            stop_on_fully_seen_page: self.stop_on_fully_seen_page,
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("pipeline name cannot be empty");
        }
        normalize_path(&self.collection_path)
            .with_context(|| format!("pipeline {} collection_path", self.name))?;
        if self.per_page == 0 {
            bail!("pipeline {}: per_page must be positive", self.name);
        }
        if self.upsert_chunk_size == 0 {
            bail!("pipeline {}: upsert_chunk_size must be positive", self.name);
        }
        if self.sources.is_empty() {
            self.sources = known_sources(self.kind).iter().map(|s| s.to_string()).collect();
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PipelinesFile {
    pipelines: Vec<PipelineConfig>,
}

pub fn parse_pipelines(text: &str) -> Result<Vec<PipelineConfig>> {
    let file: PipelinesFile = serde_yaml::from_str(text)?;
    let mut pipelines = file.pipelines;
    for pipeline in &mut pipelines {
        pipeline.validate()?;
    }
    if pipelines.is_empty() {
        bail!("no pipelines configured");
    }
    Ok(pipelines)
}

/// `ai/jobs` -> `ai_jobs`, used in snapshot file names.
pub fn path_slug(collection_path: &str) -> String {
    collection_path.trim().trim_matches('/').replace('/', "_")
}

pub fn source_dir(delta_root: &Path, source_id: &str) -> PathBuf {
    delta_root.join(source_id)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_deadline_field() -> String {
    "application_deadline".to_string()
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_true() -> bool {
    true
}

fn default_upsert_chunk() -> usize {
    DEFAULT_UPSERT_CHUNK
}
