//! Unstop public opportunity search API.

use std::sync::Arc;

use async_trait::async_trait;
use oppsync_core::{CanonicalRow, ItemKind, Record};
use oppsync_storage::HttpFetcher;
use reqwest::Url;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::normalize::{normalize_unstop_competition, normalize_unstop_job};
use crate::{AdapterError, SourceAdapter};

pub const UNSTOP_SOURCE_ID: &str = "unstop";
pub const UNSTOP_SEARCH_URL: &str = "https://unstop.com/api/public/opportunity/search-result";
pub const UNSTOP_REFERER: &str = "https://unstop.com/";

#[derive(Debug, Clone)]
pub struct UnstopClient {
    http: HttpFetcher,
    base_url: String,
    extra_params: Vec<(String, String)>,
}

impl UnstopClient {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            base_url: UNSTOP_SEARCH_URL.to_string(),
            extra_params: Vec::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Extra search filters appended to every page request. Empty values are
    /// dropped.
    pub fn with_extra_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.extra_params.extend(
            params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(_, v)| !v.trim().is_empty()),
        );
        self
    }

    pub fn page_url(
        &self,
        opportunity: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Url, AdapterError> {
        let mut params = vec![
            ("opportunity".to_string(), opportunity.to_string()),
            ("page".to_string(), page.to_string()),
            ("per_page".to_string(), per_page.to_string()),
        ];
        params.extend(self.extra_params.iter().cloned());
        Url::parse_with_params(&self.base_url, &params).map_err(|e| AdapterError::Payload {
            source_id: UNSTOP_SOURCE_ID.to_string(),
            page,
            message: format!("invalid search url {}: {e}", self.base_url),
        })
    }

    pub async fn fetch_items(
        &self,
        opportunity: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        let url = self.page_url(opportunity, page, per_page)?;
        let payload: JsonValue =
            self.http
                .get_json(url.as_str())
                .await
                .map_err(|error| AdapterError::Fetch {
                    source_id: UNSTOP_SOURCE_ID.to_string(),
                    page,
                    error,
                })?;
        let items = page_items(payload);
        debug!(opportunity, page, count = items.len(), "fetched unstop page");
        Ok(items)
    }
}

/// Items live at `data.data`; any other shape reads as an empty page.
pub fn page_items(payload: JsonValue) -> Vec<JsonValue> {
    match payload {
        JsonValue::Object(mut top) => match top.remove("data") {
            Some(JsonValue::Object(mut data)) => match data.remove("data") {
                Some(JsonValue::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

pub struct UnstopJobsAdapter {
    client: Arc<UnstopClient>,
}

impl UnstopJobsAdapter {
    pub fn new(client: Arc<UnstopClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceAdapter for UnstopJobsAdapter {
    fn source_id(&self) -> &'static str {
        UNSTOP_SOURCE_ID
    }

    fn item_kind(&self) -> ItemKind {
        ItemKind::Job
    }

    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<JsonValue>, AdapterError> {
        self.client.fetch_items("jobs", page, page_size).await
    }

    fn normalize(&self, raw: &Record) -> CanonicalRow {
        normalize_unstop_job(raw)
    }
}

pub struct UnstopCompetitionsAdapter {
    client: Arc<UnstopClient>,
}

impl UnstopCompetitionsAdapter {
    pub fn new(client: Arc<UnstopClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceAdapter for UnstopCompetitionsAdapter {
    fn source_id(&self) -> &'static str {
        UNSTOP_SOURCE_ID
    }

    fn item_kind(&self) -> ItemKind {
        ItemKind::Competition
    }

    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<JsonValue>, AdapterError> {
        self.client.fetch_items("competitions", page, page_size).await
    }

    fn normalize(&self, raw: &Record) -> CanonicalRow {
        normalize_unstop_competition(raw)
    }
}
