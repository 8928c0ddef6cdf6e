//! Remote collection store: trait, Firebase Realtime Database REST client, and
//! an in-process implementation for tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use crate::http::{decode_json, FetchError, HttpClientConfig, HttpFetcher};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store configuration: {0}")]
    Config(String),
    #[error("store path cannot be empty (got {0:?})")]
    InvalidPath(String),
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("remote store rejected {op} on /{path}: {message}")]
    Rejected {
        op: &'static str,
        path: String,
        message: String,
    },
}

/// Trims whitespace and surrounding slashes; an empty result is an error.
pub fn normalize_path(path: &str) -> Result<String, StoreError> {
    let normalized = path.trim().trim_matches('/');
    if normalized.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(normalized.to_string())
}

/// Key/value tree addressed by slash-separated paths. Every call is
/// independently fallible I/O; nothing is transactional across calls.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Value at `path`, or `None` when nothing is stored there.
    async fn get(&self, path: &str) -> Result<Option<JsonValue>, StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Appends `record` under a store-generated key and returns that key.
    async fn push(&self, path: &str, record: &JsonValue) -> Result<String, StoreError>;

    /// Merges `batch` children into the node at `path`.
    async fn update(&self, path: &str, batch: &Map<String, JsonValue>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub database_url: String,
    pub auth_token: Option<String>,
}

impl FirebaseConfig {
    pub fn from_env() -> Result<Self, StoreError> {
        let database_url = std::env::var("FIREBASE_DATABASE_URL")
            .unwrap_or_default()
            .trim()
            .to_string();
        if database_url.is_empty() {
            return Err(StoreError::Config(
                "FIREBASE_DATABASE_URL is missing or empty".to_string(),
            ));
        }
        let auth_token = std::env::var("FIREBASE_AUTH_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(Self {
            database_url,
            auth_token,
        })
    }
}

/// Firebase Realtime Database over its REST API (`<db>/<path>.json`).
#[derive(Debug, Clone)]
pub struct FirebaseRtdbStore {
    database_url: String,
    auth_token: Option<String>,
    http: HttpFetcher,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

impl FirebaseRtdbStore {
    pub fn new(config: FirebaseConfig, http: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            database_url: config.database_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token,
            http: HttpFetcher::new(http)?,
        })
    }

    fn node_url(&self, path: &str) -> Result<String, StoreError> {
        let path = normalize_path(path)?;
        let mut url = format!("{}/{}.json", self.database_url, path);
        if let Some(token) = &self.auth_token {
            url.push_str("?auth=");
            url.push_str(token);
        }
        Ok(url)
    }
}

#[async_trait]
impl RemoteStore for FirebaseRtdbStore {
    async fn get(&self, path: &str) -> Result<Option<JsonValue>, StoreError> {
        let url = self.node_url(path)?;
        let resp = self.http.fetch_bytes(&url).await?;
        let value: JsonValue = decode_json(&resp)?;
        Ok(match value {
            JsonValue::Null => None,
            other => Some(other),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let url = self.node_url(path)?;
        self.http
            .send_with_retry("DELETE", &url, |client| client.delete(&url))
            .await?;
        Ok(())
    }

    async fn push(&self, path: &str, record: &JsonValue) -> Result<String, StoreError> {
        let url = self.node_url(path)?;
        let resp = self
            .http
            .send_with_retry("POST", &url, |client| client.post(&url).json(record))
            .await?;
        let pushed: PushResponse = decode_json(&resp)?;
        Ok(pushed.name)
    }

    async fn update(&self, path: &str, batch: &Map<String, JsonValue>) -> Result<(), StoreError> {
        let url = self.node_url(path)?;
        self.http
            .send_with_retry("PATCH", &url, |client| client.patch(&url).json(batch))
            .await?;
        Ok(())
    }
}

/// In-process tree store. Supports injected failures so callers' best-effort
/// paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryStore {
    root: Mutex<JsonValue>,
    next_key: AtomicU64,
    fail_reads: AtomicBool,
    failing_deletes: Mutex<HashSet<String>>,
    push_budget: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `path` with the given children, replacing whatever was there.
    pub fn with_collection(self, path: &str, children: BTreeMap<String, JsonValue>) -> Self {
        if let Ok(segments) = segments(path) {
            let mut root = lock(&self.root);
            let node = object_at_mut(&mut root, &segments);
            node.clear();
            node.extend(children);
        }
        self
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes deletes of any path ending in `child_key` fail.
    pub fn fail_delete_of(&self, child_key: &str) {
        lock(&self.failing_deletes).insert(child_key.to_string());
    }

    /// Allows `count` more successful pushes; later pushes fail.
    pub fn fail_pushes_after(&self, count: usize) {
        *lock(&self.push_budget) = Some(count);
    }

    /// Snapshot of the children stored at `path`.
    pub fn children(&self, path: &str) -> Map<String, JsonValue> {
        let Ok(segments) = segments(path) else {
            return Map::new();
        };
        let root = lock(&self.root);
        let mut cur = &*root;
        for segment in &segments {
            match cur.get(segment.as_str()) {
                Some(next) => cur = next,
                None => return Map::new(),
            }
        }
        cur.as_object().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<JsonValue>, StoreError> {
        let segments = segments(path)?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(rejected("get", &segments, "reads disabled"));
        }
        let root = lock(&self.root);
        let mut cur = &*root;
        for segment in &segments {
            match cur.get(segment.as_str()) {
                Some(next) => cur = next,
                None => return Ok(None),
            }
        }
        Ok(match cur {
            JsonValue::Null => None,
            JsonValue::Object(map) if map.is_empty() => None,
            other => Some(other.clone()),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut segments = segments(path)?;
        let Some(leaf) = segments.pop() else {
            return Err(StoreError::InvalidPath(path.to_string()));
        };
        if lock(&self.failing_deletes).contains(&leaf) {
            segments.push(leaf);
            return Err(rejected("delete", &segments, "delete refused"));
        }
        let mut root = lock(&self.root);
        let mut cur = &mut *root;
        for segment in &segments {
            match cur.get_mut(segment.as_str()) {
                Some(next) => cur = next,
                None => return Ok(()),
            }
        }
        if let Some(map) = cur.as_object_mut() {
            map.remove(&leaf);
        }
        debug!(path, "memory store delete");
        Ok(())
    }

    async fn push(&self, path: &str, record: &JsonValue) -> Result<String, StoreError> {
        let segments = segments(path)?;
        {
            let mut budget = lock(&self.push_budget);
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(rejected("push", &segments, "push budget exhausted"));
                }
                *remaining -= 1;
            }
        }
        let n = self.next_key.fetch_add(1, Ordering::SeqCst);
        let key = format!("-mem{n:016}");
        let mut root = lock(&self.root);
        object_at_mut(&mut root, &segments).insert(key.clone(), record.clone());
        Ok(key)
    }

    async fn update(&self, path: &str, batch: &Map<String, JsonValue>) -> Result<(), StoreError> {
        let segments = segments(path)?;
        let mut root = lock(&self.root);
        let node = object_at_mut(&mut root, &segments);
        for (key, value) in batch {
            node.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

fn segments(path: &str) -> Result<Vec<String>, StoreError> {
    Ok(normalize_path(path)?
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

fn rejected(op: &'static str, segments: &[String], message: &str) -> StoreError {
    StoreError::Rejected {
        op,
        path: segments.join("/"),
        message: message.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ensure_object(value: &mut JsonValue) -> &mut Map<String, JsonValue> {
    if !value.is_object() {
        *value = JsonValue::Object(Map::new());
    }
    match value {
        JsonValue::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn object_at_mut<'a>(
    root: &'a mut JsonValue,
    segments: &[String],
) -> &'a mut Map<String, JsonValue> {
    let mut cur = root;
    for segment in segments {
        cur = ensure_object(cur)
            .entry(segment.clone())
            .or_insert_with(|| JsonValue::Object(Map::new()));
    }
    ensure_object(cur)
}
