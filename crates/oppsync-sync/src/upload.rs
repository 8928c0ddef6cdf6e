//! Writes delta rows to the remote collection.

use oppsync_core::{CanonicalRow, Record};
use oppsync_storage::{normalize_path, RemoteStore};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::config::UploadMode;

const KEY_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub ok: bool,
    pub node_path: String,
    pub mode: UploadMode,
    pub uploaded: usize,
    pub generated_keys_sample: Vec<String>,
    pub skipped_missing_key: usize,
    pub chunks: usize,
    pub error: Option<String>,
}

impl UploadResult {
    fn empty(node_path: String, mode: UploadMode) -> Self {
        Self {
            ok: true,
            node_path,
            mode,
            uploaded: 0,
            generated_keys_sample: Vec::new(),
            skipped_missing_key: 0,
            chunks: 0,
            error: None,
        }
    }

    fn fail(&mut self, message: String) {
        self.ok = false;
        self.error = Some(message);
    }
}

/// Uploads `rows` in order. Stops at the first store failure; rows written
/// before it stay written and the failure is carried in the result.
pub async fn upload_rows(
    store: &dyn RemoteStore,
    collection_path: &str,
    rows: &[CanonicalRow],
    mode: UploadMode,
    chunk_size: usize,
) -> UploadResult {
    let path = match normalize_path(collection_path) {
        Ok(path) => path,
        Err(err) => {
            let mut result = UploadResult::empty(collection_path.to_string(), mode);
            result.fail(err.to_string());
            return result;
        }
    };
    let mut result = UploadResult::empty(format!("/{path}"), mode);

    match mode {
        UploadMode::PushKeys => push_keys(store, &path, rows, &mut result).await,
        UploadMode::UpsertByKey => {
            upsert_by_key(store, &path, rows, chunk_size.max(1), &mut result).await
        }
    }

    if result.ok {
        info!(collection = %path, uploaded = result.uploaded, ?mode, "upload finished");
    } else {
        warn!(
            collection = %path,
            uploaded = result.uploaded,
            remaining = rows.len().saturating_sub(result.uploaded + result.skipped_missing_key),
            error = result.error.as_deref().unwrap_or_default(),
            "upload stopped early"
        );
    }
    result
}

async fn push_keys(
    store: &dyn RemoteStore,
    path: &str,
    rows: &[CanonicalRow],
    result: &mut UploadResult,
) {
    for row in rows {
        let record = JsonValue::Object(row.fields().clone());
        match store.push(path, &record).await {
            Ok(key) => {
                result.uploaded += 1;
                if result.generated_keys_sample.len() < KEY_SAMPLE_SIZE {
                    result.generated_keys_sample.push(key);
                }
            }
            Err(err) => {
                result.fail(format!("push #{} failed: {err}", result.uploaded + 1));
                return;
            }
        }
    }
}

async fn upsert_by_key(
    store: &dyn RemoteStore,
    path: &str,
    rows: &[CanonicalRow],
    chunk_size: usize,
    result: &mut UploadResult,
) {
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        match row.composite_key() {
            Some(key) => keyed.push((key.into_string(), row)),
            None => result.skipped_missing_key += 1,
        }
    }

    for chunk in keyed.chunks(chunk_size) {
        let batch = chunk
            .iter()
            .map(|(key, row)| (key.clone(), JsonValue::Object(row.fields().clone())))
            .collect::<Record>();
        if let Err(err) = store.update(path, &batch).await {
            result.fail(format!("update chunk #{} failed: {err}", result.chunks + 1));
            return;
        }
        result.chunks += 1;
        result.uploaded += batch.len();
        if result.generated_keys_sample.len() < KEY_SAMPLE_SIZE {
            let room = KEY_SAMPLE_SIZE - result.generated_keys_sample.len();
            result
                .generated_keys_sample
                .extend(chunk.iter().take(room).map(|(key, _)| key.clone()));
        }
    }
}
