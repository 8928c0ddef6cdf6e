use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use oppsync_adapters::{adapter_for_source, SourceAdapter, UnstopClient};
use oppsync_storage::{
    FirebaseConfig, FirebaseRtdbStore, HttpClientConfig, HttpFetcher, RemoteStore,
};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::{PipelineConfig, SyncConfig};
use crate::pipeline::{RunReport, SyncPipeline};

/// Turns a pipeline's configured source ids into adapters. An id with no
/// adapter is an error.
pub trait SourceFactory: Send + Sync {
    fn sources_for(&self, pipeline: &PipelineConfig) -> Result<Vec<Box<dyn SourceAdapter>>>;
}

/// Production sources: the Unstop search API over a shared HTTP client.
pub struct UnstopSources {
    http: HttpFetcher,
}

impl UnstopSources {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

impl SourceFactory for UnstopSources {
    fn sources_for(&self, pipeline: &PipelineConfig) -> Result<Vec<Box<dyn SourceAdapter>>> {
        let client = Arc::new(
            UnstopClient::new(self.http.clone()).with_extra_params(pipeline.extra_params.clone()),
        );
        pipeline
            .sources
            .iter()
            .map(|source_id| {
                adapter_for_source(pipeline.kind, source_id, &client).ok_or_else(|| {
                    anyhow!(
                        "unknown source {source_id:?} configured for pipeline {}",
                        pipeline.name
                    )
                })
            })
            .collect()
    }
}

/// Shared entry point for the CLI, web trigger and scheduler. Runs are
/// serialized so two pipelines never run at once in one process.
#[derive(Clone)]
pub struct SyncRunner {
    config: Arc<SyncConfig>,
    pipelines: Arc<Vec<PipelineConfig>>,
    store: Arc<dyn RemoteStore>,
    sources: Arc<dyn SourceFactory>,
    run_lock: Arc<Mutex<()>>,
    today: Option<NaiveDate>,
}

impl SyncRunner {
    pub fn new(
        config: SyncConfig,
        pipelines: Vec<PipelineConfig>,
        store: Arc<dyn RemoteStore>,
        sources: Arc<dyn SourceFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pipelines: Arc::new(pipelines),
            store,
            sources,
            run_lock: Arc::new(Mutex::new(())),
            today: None,
        }
    }

    /// Environment configuration, Firebase store and Unstop sources. Missing
    /// store configuration is an error here, before any run starts.
    pub async fn from_env() -> Result<Self> {
        let config = SyncConfig::from_env();
        let pipelines = config.load_pipelines().await?;
        let firebase = FirebaseConfig::from_env()?;
        let store_http = HttpClientConfig {
            referer: None,
            ..config.http_config()
        };
        let store =
            FirebaseRtdbStore::new(firebase, store_http).context("creating Firebase store")?;
        let http = HttpFetcher::new(config.http_config())?;
        Ok(Self::new(
            config,
            pipelines,
            Arc::new(store),
            Arc::new(UnstopSources::new(http)),
        ))
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines.iter().map(|p| p.name.clone()).collect()
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    pub async fn run(&self, name: &str) -> Result<RunReport> {
        let pipeline = self
            .pipeline(name)
            .cloned()
            .with_context(|| format!("no pipeline named {name:?}"))?;
        let _guard = self.run_lock.lock().await;
        self.build(pipeline)?.run_once().await
    }

    /// Runs every pipeline in order, stopping at the first fatal error.
    pub async fn run_all(&self) -> Result<Vec<RunReport>> {
        let mut reports = Vec::with_capacity(self.pipelines.len());
        for name in self.pipeline_names() {
            reports.push(self.run(&name).await?);
        }
        Ok(reports)
    }

    fn build(&self, pipeline: PipelineConfig) -> Result<SyncPipeline> {
        let sources = self.sources.sources_for(&pipeline)?;
        let baseline_dir = self.config.baseline_dir(&pipeline.name);
        let delta_root = self.config.delta_root(&pipeline.name);
        let built = SyncPipeline::new(
            pipeline,
            self.store.clone(),
            sources,
            baseline_dir,
            delta_root,
        )?;
        Ok(match self.today {
            Some(today) => built.with_today(today),
            None => built,
        })
    }
}

/// Cron-driven `run_all`, when enabled in configuration.
pub async fn maybe_build_scheduler(runner: &SyncRunner) -> Result<Option<JobScheduler>> {
    if !runner.config().scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&runner.config().sync_cron_1, &runner.config().sync_cron_2] {
        let runner = runner.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let runner = runner.clone();
            Box::pin(async move {
                match runner.run_all().await {
                    Ok(reports) => {
                        for report in reports {
                            info!(
                                pipeline = %report.pipeline,
                                ok = report.ok,
                                uploaded = report.upload.uploaded,
                                "scheduled run finished"
                            );
                        }
                    }
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled run failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}
