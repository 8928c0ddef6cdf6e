//! HTTP run trigger: one GET per pipeline returns that run's report.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use oppsync_sync::{maybe_build_scheduler, SyncRunner};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "oppsync-web";

#[derive(Clone)]
pub struct AppState {
    pub runner: SyncRunner,
}

impl AppState {
    pub fn new(runner: SyncRunner) -> Self {
        Self { runner }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/v1/{pipeline}", get(run_pipeline_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(runner: SyncRunner, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, pipelines = ?runner.pipeline_names(), "run trigger listening");
    axum::serve(listener, app(AppState::new(runner))).await?;
    Ok(())
}

/// Builds the runner from the environment, starts the scheduler when enabled,
/// and serves until the listener fails.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("OPPSYNC_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let runner = SyncRunner::from_env().await?;
    if let Some(sched) = maybe_build_scheduler(&runner).await? {
        sched.start().await?;
        info!("scheduler started");
    }
    serve(runner, port).await
}

async fn healthz_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "pipelines": state.runner.pipeline_names(),
    }))
    .into_response()
}

async fn run_pipeline_handler(
    State(state): State<Arc<AppState>>,
    Path(pipeline): Path<String>,
) -> Response {
    if state.runner.pipeline(&pipeline).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("unknown pipeline {pipeline:?}") })),
        )
            .into_response();
    }
    match state.runner.run(&pipeline).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    let detail = format!("{err:#}");
    error!(%detail, "run failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": detail })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use chrono::NaiveDate;
    use http_body_util::BodyExt;
    use oppsync_adapters::normalize::normalize_unstop_job;
    use oppsync_adapters::{AdapterError, SourceAdapter};
    use oppsync_core::{CanonicalRow, ItemKind, Record};
    use oppsync_storage::MemoryStore;
    use oppsync_sync::{PipelineConfig, SourceFactory, SyncConfig};
    use serde_json::Value as JsonValue;
    use std::path::Path as FsPath;
    use tempfile::tempdir;
    use tower::ServiceExt;

    struct OnePage;

    #[async_trait]
    impl SourceAdapter for OnePage {
        fn source_id(&self) -> &'static str {
            "unstop"
        }

        fn item_kind(&self) -> ItemKind {
            ItemKind::Job
        }

        async fn fetch_page(
            &self,
            page: u32,
            _page_size: u32,
        ) -> Result<Vec<JsonValue>, AdapterError> {
            if page > 1 {
                return Ok(Vec::new());
            }
            Ok(vec![json!({"id": 9, "subtype": "jobs", "title": "Platform Engineer"})])
        }

        fn normalize(&self, raw: &Record) -> CanonicalRow {
            normalize_unstop_job(raw)
        }
    }

    struct OnePageSources;

    impl SourceFactory for OnePageSources {
        fn sources_for(
            &self,
            _pipeline: &PipelineConfig,
        ) -> anyhow::Result<Vec<Box<dyn SourceAdapter>>> {
            Ok(vec![Box::new(OnePage)])
        }
    }

    fn runner(output: &FsPath, store: Arc<MemoryStore>) -> SyncRunner {
        let config = SyncConfig {
            output_dir: output.to_path_buf(),
            ..Default::default()
        };
        let pipelines = vec![PipelineConfig::new("jobs", ItemKind::Job, "ai/jobs")];
        SyncRunner::new(config, pipelines, store, Arc::new(OnePageSources))
            .with_today(NaiveDate::from_ymd_opt(2026, 2, 24).unwrap())
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(resp: Response) -> JsonValue {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn run_endpoint_returns_report() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let app = app(AppState::new(runner(dir.path(), store.clone())));

        let resp = app.oneshot(get("/api/v1/jobs")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = body_json(resp).await;
        assert_eq!(report["ok"], true);
        assert_eq!(report["pipeline"], "jobs");
        assert_eq!(report["baseline"]["node_path"], "/ai/jobs");
        assert_eq!(report["scrape"]["delta_total"], 1);
        assert_eq!(report["upload"]["uploaded"], 1);
        assert_eq!(store.children("ai/jobs").len(), 1);
    }

    #[tokio::test]
    async fn fatal_run_error_is_500_with_detail() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        store.fail_reads(true);
        let app = app(AppState::new(runner(dir.path(), store)));

        let resp = app.oneshot(get("/api/v1/jobs")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert!(body["detail"].as_str().unwrap().contains("baseline sync failed"));
    }

    #[tokio::test]
    async fn unknown_pipeline_is_404() {
        let dir = tempdir().expect("tempdir");
        let app = app(AppState::new(runner(dir.path(), Arc::new(MemoryStore::new()))));
        let resp = app.oneshot(get("/api/v1/internships")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_lists_pipelines() {
        let dir = tempdir().expect("tempdir");
        let app = app(AppState::new(runner(dir.path(), Arc::new(MemoryStore::new()))));
        let resp = app.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["pipelines"], json!(["jobs"]));
    }
}
