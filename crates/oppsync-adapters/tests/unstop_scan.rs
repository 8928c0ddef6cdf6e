use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use oppsync_adapters::normalize::normalize_unstop_job;
use oppsync_adapters::{page_items, AdapterError, ScanPolicy, SourceAdapter};
use oppsync_core::{build_key, CanonicalRow, ExistingKeys, ItemKind, Record};
use serde_json::{json, Value as JsonValue};

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/unstop/jobs_search_page.json")
}

fn fixture_payload() -> JsonValue {
    let text = std::fs::read_to_string(fixture_path()).expect("read fixture");
    serde_json::from_str(&text).expect("parse fixture")
}

/// Serves recorded search payloads as pages 1..n, then an empty page.
struct RecordedUnstopJobs {
    payloads: Vec<JsonValue>,
    requested: Mutex<Vec<u32>>,
}

impl RecordedUnstopJobs {
    fn new(payloads: Vec<JsonValue>) -> Self {
        Self {
            payloads,
            requested: Mutex::new(Vec::new()),
        }
    }

    fn requested(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for RecordedUnstopJobs {
    fn source_id(&self) -> &'static str {
        "unstop"
    }

    fn item_kind(&self) -> ItemKind {
        ItemKind::Job
    }

    async fn fetch_page(&self, page: u32, _page_size: u32) -> Result<Vec<JsonValue>, AdapterError> {
        self.requested.lock().unwrap().push(page);
        Ok(self
            .payloads
            .get(page as usize - 1)
            .cloned()
            .map(page_items)
            .unwrap_or_default())
    }

    fn normalize(&self, raw: &Record) -> CanonicalRow {
        normalize_unstop_job(raw)
    }
}

fn internship_keys(ids: &[i64]) -> ExistingKeys {
    ids.iter()
        .filter_map(|id| build_key("unstop", "internship", &json!(id)))
        .collect()
}

fn until_empty() -> ScanPolicy {
    ScanPolicy {
        page_size: 18,
        max_pages: 0,
        stop_on_fully_seen_page: true,
    }
}

fn ids(rows: &[CanonicalRow]) -> Vec<i64> {
    rows.iter().filter_map(CanonicalRow::item_id).collect()
}

#[tokio::test]
async fn mixed_page_keeps_new_items_and_continues() {
    let source = RecordedUnstopJobs::new(vec![fixture_payload()]);
    let outcome = source
        .scan(&internship_keys(&[101]), &until_empty())
        .await
        .unwrap();

    assert_eq!(ids(&outcome.rows), vec![102, 103]);
    assert_eq!(outcome.stats.skipped_existing, 1);
    assert_eq!(outcome.stats.kept_delta, 2);
    assert_eq!(outcome.stats.items_seen, 3);
    assert_eq!(outcome.stats.early_stop_flag, 0);
    assert_eq!(source.requested(), vec![1, 2]);
}

#[tokio::test]
async fn fully_seen_first_page_stops_before_page_two() {
    let source = RecordedUnstopJobs::new(vec![fixture_payload(), fixture_payload()]);
    let outcome = source
        .scan(&internship_keys(&[101, 102, 103]), &until_empty())
        .await
        .unwrap();

    assert!(outcome.rows.is_empty());
    assert_eq!(outcome.stats.early_stop_flag, 1);
    assert_eq!(outcome.stats.pages_fetched, 1);
    assert_eq!(source.requested(), vec![1]);
}

#[tokio::test]
async fn single_page_budget_never_requests_page_two() {
    let source = RecordedUnstopJobs::new(vec![fixture_payload(), fixture_payload()]);
    let policy = ScanPolicy {
        max_pages: 1,
        ..until_empty()
    };
    let outcome = source.scan(&ExistingKeys::new(), &policy).await.unwrap();

    assert_eq!(outcome.rows.len(), 3);
    assert_eq!(source.requested(), vec![1]);
}

#[tokio::test]
async fn delta_rows_are_normalized_job_rows() {
    let source = RecordedUnstopJobs::new(vec![fixture_payload()]);
    let outcome = source.scan(&ExistingKeys::new(), &until_empty()).await.unwrap();
    let by_id = |id: i64| {
        outcome
            .rows
            .iter()
            .find(|r| r.item_id() == Some(id))
            .expect("row present")
    };

    let ml = by_id(101);
    assert_eq!(ml.cell("work_mode"), "wfh");
    assert_eq!(ml.cell("salary_range"), "15000-25000");
    assert_eq!(ml.cell("job_location"), "Online");
    assert_eq!(ml.cell("details"), "Train & evaluate ranking models .");
    assert_eq!(ml.deadline(), "2026-11-30");

    let analyst = by_id(102);
    assert_eq!(analyst.cell("salary_range"), "Not disclosed");
    assert_eq!(analyst.cell("work_mode"), "in_office");
    assert_eq!(analyst.cell("job_location"), "Bengaluru, Pune");

    let backend = by_id(103);
    assert_eq!(backend.cell("company_id"), "9003");
    assert_eq!(backend.cell("required_skills"), "Rust, PostgreSQL");
    assert_eq!(
        backend.composite_key().unwrap().as_str(),
        "unstop:internship:103"
    );
}
