//! Source adapter contract, the shared delta scanner, and the Unstop adapters.

use std::sync::Arc;

use async_trait::async_trait;
use oppsync_core::{CanonicalRow, ExistingKeys, ItemKind, Record};
use oppsync_storage::{FetchError, HttpFetcher};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod normalize;
mod scan;
mod unstop;

pub use scan::{delta_scan, ScanOutcome, ScanPolicy, ScanStats};
pub use unstop::{
    page_items, UnstopClient, UnstopCompetitionsAdapter, UnstopJobsAdapter, UNSTOP_REFERER,
    UNSTOP_SEARCH_URL, UNSTOP_SOURCE_ID,
};

pub const CRATE_NAME: &str = "oppsync-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{source_id} page {page}: {error}")]
    Fetch {
        source_id: String,
        page: u32,
        #[source]
        error: FetchError,
    },
    #[error("{source_id} page {page}: {message}")]
    Payload {
        source_id: String,
        page: u32,
        message: String,
    },
}

/// One external platform feeding one item kind.
///
/// Implementors supply page fetching and normalization; the pagination,
/// classification and early-stop rules live in [`delta_scan`].
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn item_kind(&self) -> ItemKind;

    /// Raw items of one 1-based page. An empty vector means no more pages.
    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<JsonValue>, AdapterError>;

    fn normalize(&self, raw: &Record) -> CanonicalRow;

    async fn scan(
        &self,
        existing: &ExistingKeys,
        policy: &ScanPolicy,
    ) -> Result<ScanOutcome, AdapterError> {
        delta_scan(self, existing, policy).await
    }
}

/// Source ids accepted for a kind, in the order they are tried by default.
pub fn known_sources(kind: ItemKind) -> &'static [&'static str] {
    match kind {
        ItemKind::Job | ItemKind::Competition => &[UNSTOP_SOURCE_ID],
    }
}

pub fn adapter_for_source(
    kind: ItemKind,
    source_id: &str,
    client: &Arc<UnstopClient>,
) -> Option<Box<dyn SourceAdapter>> {
    match (kind, source_id.trim().to_lowercase().as_str()) {
        (ItemKind::Job, UNSTOP_SOURCE_ID) => Some(Box::new(UnstopJobsAdapter::new(client.clone()))),
        (ItemKind::Competition, UNSTOP_SOURCE_ID) => {
            Some(Box::new(UnstopCompetitionsAdapter::new(client.clone())))
        }
        _ => None,
    }
}

/// Shared Unstop client. `http` should send [`UNSTOP_REFERER`] as its referer.
pub fn unstop_client(http: HttpFetcher) -> Arc<UnstopClient> {
    Arc::new(UnstopClient::new(http))
}
