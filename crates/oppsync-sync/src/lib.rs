//! Delta sync orchestration: baseline pruning, source scans, artifacts, upload.

mod baseline;
mod config;
mod pipeline;
mod runner;
#[cfg(test)]
mod testing;
mod upload;

pub use baseline::{sync_baseline, BaselineRequest, BaselineResult};
pub use config::{
    parse_pipelines, path_slug, source_dir, PipelineConfig, SyncConfig, UploadMode,
    BASELINE_SUBDIR, DEFAULT_MAX_PAGES, DEFAULT_PER_PAGE, DEFAULT_UPSERT_CHUNK, DELTA_SUBDIR,
    PIPELINES_FILE,
};
pub use pipeline::{
    scrape_to_files, write_row_artifacts, ArtifactPaths, FilesSummary, RunReport, ScrapeReport,
    ScrapeSummary, SyncPipeline,
};
pub use runner::{maybe_build_scheduler, SourceFactory, SyncRunner, UnstopSources};
pub use upload::{upload_rows, UploadResult};

pub const CRATE_NAME: &str = "oppsync-sync";
