//! Dedup baseline: prune expired records remotely, snapshot what remains, and
//! derive the existing-key set from that snapshot.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use oppsync_core::{is_expired, record_composite_key, ExistingKeys, ItemKind, Record};
use oppsync_storage::{normalize_path, OutputDir, RemoteStore};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::config::path_slug;

#[derive(Debug, Clone)]
pub struct BaselineRequest {
    pub kind: ItemKind,
    pub collection_path: String,
    pub deadline_field: String,
    pub output: OutputDir,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaselineResult {
    pub ok: bool,
    /// Normalized collection path with a leading `/`.
    pub node_path: String,
    pub today: NaiveDate,
    pub deleted_local_files: usize,
    pub expired_keys_count: usize,
    pub expired_deleted_from_firebase: usize,
    pub kept_count: usize,
    pub saved_file: String,
    pub existing_keys_count: usize,
    #[serde(skip)]
    pub existing_keys: ExistingKeys,
}

/// Runs the baseline phase for one collection.
///
/// Store reads and the snapshot write are fatal. Individual remote deletes and
/// local file removals are best-effort and only show up in the counts.
pub async fn sync_baseline(
    store: &dyn RemoteStore,
    request: &BaselineRequest,
    today: NaiveDate,
    stamp: &str,
) -> Result<BaselineResult> {
    let path = normalize_path(&request.collection_path)?;

    request.output.ensure().await?;
    let deleted_local_files = request.output.clear_files().await;

    let current = fetch_collection(store, &path).await?;
    let expired = current
        .iter()
        .filter(|(_, value)| {
            let deadline = value.as_object().and_then(|r| r.get(&request.deadline_field));
            is_expired(deadline, today)
        })
        .map(|(key, _)| key.clone())
        .collect::<Vec<_>>();

    let mut expired_deleted = 0usize;
    for key in &expired {
        match store.delete(&format!("{path}/{key}")).await {
            Ok(()) => expired_deleted += 1,
            Err(err) => warn!(
                collection = %path,
                key = %key,
                error = %err,
                "failed to delete expired record"
            ),
        }
    }

    let cleaned = fetch_collection(store, &path).await?;
    let snapshot_name = format!("{}_latest_{stamp}.json", path_slug(&path));
    let saved = request
        .output
        .write_json(&snapshot_name, &cleaned)
        .await
        .with_context(|| format!("saving baseline snapshot for /{path}"))?;

    let existing_keys = cleaned
        .values()
        .filter_map(JsonValue::as_object)
        .filter_map(|record| record_composite_key(request.kind, record))
        .collect::<ExistingKeys>();

    info!(
        collection = %path,
        %today,
        expired = expired.len(),
        expired_deleted,
        kept = cleaned.len(),
        existing_keys = existing_keys.len(),
        "baseline synced"
    );

    Ok(BaselineResult {
        ok: true,
        node_path: format!("/{path}"),
        today,
        deleted_local_files,
        expired_keys_count: expired.len(),
        expired_deleted_from_firebase: expired_deleted,
        kept_count: cleaned.len(),
        saved_file: saved.display().to_string(),
        existing_keys_count: existing_keys.len(),
        existing_keys,
    })
}

/// Children of `path` as stored. A missing or non-object node reads as an
/// empty collection.
async fn fetch_collection(store: &dyn RemoteStore, path: &str) -> Result<Record> {
    let value = store
        .get(path)
        .await
        .with_context(|| format!("reading collection /{path}"))?;
    match value {
        Some(JsonValue::Object(children)) => Ok(children),
        _ => Ok(Record::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oppsync_core::build_key;
    use oppsync_storage::MemoryStore;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 24).unwrap()
    }

    fn internship(id: i64, deadline: &str) -> JsonValue {
        json!({
            "job_id": id,
            "platform": "unstop",
            "oppurtunity_type": "internship",
            "application_deadline": deadline,
        })
    }

    fn store_with(children: Vec<(&str, JsonValue)>) -> MemoryStore {
        let children = children
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>();
        MemoryStore::new().with_collection("ai/jobs", children)
    }

    fn request(output: &std::path::Path) -> BaselineRequest {
        BaselineRequest {
            kind: ItemKind::Job,
            collection_path: "/ai/jobs".to_string(),
            deadline_field: "application_deadline".to_string(),
            output: OutputDir::new(output),
        }
    }

    #[tokio::test]
    async fn expired_records_are_pruned_and_excluded_from_keys() {
        let dir = tempdir().expect("tempdir");
        let store = store_with(vec![
            ("-a", internship(100, "2026-02-23")),
            ("-b", internship(101, "2026-02-25T10:00:00+05:30")),
        ]);

        let result = sync_baseline(&store, &request(dir.path()), today(), "20260224_090000")
            .await
            .unwrap();

        assert_eq!(result.node_path, "/ai/jobs");
        assert_eq!(result.expired_keys_count, 1);
        assert_eq!(result.expired_deleted_from_firebase, 1);
        assert_eq!(result.kept_count, 1);
        let expected = build_key("unstop", "internship", &json!(101)).unwrap();
        assert_eq!(result.existing_keys, [expected].into_iter().collect());

        let remaining = store.children("ai/jobs");
        assert_eq!(remaining.keys().collect::<Vec<_>>(), vec!["-b"]);

        let saved = std::fs::read_to_string(&result.saved_file).unwrap();
        assert!(result.saved_file.ends_with("ai_jobs_latest_20260224_090000.json"));
        let parsed: JsonValue = serde_json::from_str(&saved).unwrap();
        assert_eq!(parsed.as_object().map(|m| m.len()), Some(1));
        assert_eq!(parsed["-b"]["job_id"], 101);
    }

    #[tokio::test]
    async fn deadline_today_is_not_expired() {
        let dir = tempdir().expect("tempdir");
        let store = store_with(vec![("-a", internship(1, "2026-02-24"))]);
        let result = sync_baseline(&store, &request(dir.path()), today(), "t").await.unwrap();
        assert_eq!(result.expired_keys_count, 0);
        assert_eq!(result.existing_keys_count, 1);
    }

    #[tokio::test]
    async fn unparseable_or_missing_deadlines_are_kept() {
        let dir = tempdir().expect("tempdir");
        let store = store_with(vec![
            ("-a", internship(1, "soon")),
            ("-b", json!({"job_id": 2, "platform": "unstop", "oppurtunity_type": "job"})),
            ("-c", json!({"job_id": "x", "platform": "unstop", "application_deadline": "2000-01-01"})),
            ("-d", json!("not a record")),
        ]);
        let result = sync_baseline(&store, &request(dir.path()), today(), "t").await.unwrap();

        assert_eq!(result.expired_keys_count, 1);
        assert_eq!(result.kept_count, 3);
        assert_eq!(result.existing_keys_count, 2);
    }

    #[tokio::test]
    async fn failed_delete_is_counted_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let store = store_with(vec![
            ("-a", internship(1, "2026-01-01")),
            ("-b", internship(2, "2026-01-02")),
        ]);
        store.fail_delete_of("-a");

        let result = sync_baseline(&store, &request(dir.path()), today(), "t").await.unwrap();
        assert_eq!(result.expired_keys_count, 2);
        assert_eq!(result.expired_deleted_from_firebase, 1);
        assert_eq!(result.kept_count, 1);
    }

    #[tokio::test]
    async fn pruning_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = store_with(vec![
            ("-a", internship(1, "2026-01-01")),
            ("-b", internship(2, "2027-01-01")),
            ("-c", internship(3, "")),
        ]);
        let first = sync_baseline(&store, &request(dir.path()), today(), "t1").await.unwrap();
        let second = sync_baseline(&store, &request(dir.path()), today(), "t2").await.unwrap();

        assert_eq!(first.existing_keys_count, second.existing_keys_count);
        assert_eq!(second.expired_keys_count, 0);
        assert_eq!(second.deleted_local_files, 1);
    }

    #[tokio::test]
    async fn empty_collection_is_not_an_error() {
        let dir = tempdir().expect("tempdir");
        let store = MemoryStore::new();
        let result = sync_baseline(&store, &request(dir.path()), today(), "t").await.unwrap();
        assert_eq!(result.kept_count, 0);
        assert!(result.existing_keys.is_empty());
    }

    #[tokio::test]
    async fn read_failure_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let store = MemoryStore::new();
        store.fail_reads(true);
        let err = sync_baseline(&store, &request(dir.path()), today(), "t")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("reading collection /ai/jobs"));
    }
}
