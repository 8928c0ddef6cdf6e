//! Paginated delta scan with fully-seen-page early stop.

use oppsync_core::{CanonicalRow, ExistingKeys};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{AdapterError, SourceAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPolicy {
    pub page_size: u32,
    /// `0` means unbounded: stop only on an empty or fully-seen page.
    pub max_pages: u32,
    pub stop_on_fully_seen_page: bool,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            page_size: 18,
            max_pages: 1,
            stop_on_fully_seen_page: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub pages_fetched: u32,
    pub items_seen: u32,
    pub kept_delta: u32,
    pub skipped_existing: u32,
    pub skipped_missing_id: u32,
    pub early_stop_flag: u8,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub rows: Vec<CanonicalRow>,
    pub stats: ScanStats,
}

/// Walks pages from 1 and keeps rows whose composite key is not in `existing`.
///
/// Stops on an empty page, after `max_pages` when bounded, or (when enabled)
/// after a non-empty page whose every item already exists. An item without a
/// usable id makes its page count as not fully seen.
pub async fn delta_scan<S>(
    source: &S,
    existing: &ExistingKeys,
    policy: &ScanPolicy,
) -> Result<ScanOutcome, AdapterError>
where
    S: SourceAdapter + ?Sized,
{
    let mut outcome = ScanOutcome::default();
    let mut page = 1u32;

    loop {
        if policy.max_pages != 0 && page > policy.max_pages {
            break;
        }

        let items = source.fetch_page(page, policy.page_size).await?;
        outcome.stats.pages_fetched += 1;
        if items.is_empty() {
            debug!(source = source.source_id(), page, "empty page, scan complete");
            break;
        }

        let mut page_new = 0u32;
        let mut page_missing_id = 0u32;
        let mut page_existing = 0u32;
        for item in &items {
            let Some(raw) = item.as_object() else {
                debug!(source = source.source_id(), page, "skipping non-object item");
                continue;
            };
            outcome.stats.items_seen += 1;

            let row = source.normalize(raw);
            match row.composite_key() {
                None => page_missing_id += 1,
                Some(key) if existing.contains(&key) => page_existing += 1,
                Some(_) => {
                    page_new += 1;
                    outcome.rows.push(row);
                }
            }
        }
        outcome.stats.kept_delta += page_new;
        outcome.stats.skipped_existing += page_existing;
        outcome.stats.skipped_missing_id += page_missing_id;

        info!(
            source = source.source_id(),
            page,
            items = items.len(),
            new = page_new,
            existing = page_existing,
            missing_id = page_missing_id,
            "scanned page"
        );

        let fully_seen = page_new == 0 && page_missing_id == 0;
        if policy.stop_on_fully_seen_page && fully_seen {
            outcome.stats.early_stop_flag = 1;
            info!(source = source.source_id(), page, "page fully seen, stopping early");
            break;
        }
        page += 1;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_unstop_job;
    use async_trait::async_trait;
    use oppsync_core::{build_key, ItemKind, Record};
    use serde_json::{json, Value as JsonValue};
    use std::sync::Mutex;

    struct PagedSource {
        pages: Vec<Vec<JsonValue>>,
        requested: Mutex<Vec<u32>>,
    }

    impl PagedSource {
        fn new(pages: Vec<Vec<JsonValue>>) -> Self {
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<u32> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceAdapter for PagedSource {
        fn source_id(&self) -> &'static str {
            "paged"
        }

        fn item_kind(&self) -> ItemKind {
            ItemKind::Job
        }

        async fn fetch_page(
            &self,
            page: u32,
            _page_size: u32,
        ) -> Result<Vec<JsonValue>, AdapterError> {
            self.requested.lock().unwrap().push(page);
            Ok(self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }

        fn normalize(&self, raw: &Record) -> CanonicalRow {
            normalize_unstop_job(raw)
        }
    }

    fn job(id: JsonValue) -> JsonValue {
        json!({ "id": id, "subtype": "jobs", "title": "role" })
    }

    fn existing(ids: &[i64]) -> ExistingKeys {
        ids.iter()
            .filter_map(|id| build_key("unstop", "jobs", &json!(id)))
            .collect()
    }

    fn unbounded() -> ScanPolicy {
        ScanPolicy {
            page_size: 3,
            max_pages: 0,
            stop_on_fully_seen_page: true,
        }
    }

    #[tokio::test]
    async fn empty_first_page_ends_scan() {
        let source = PagedSource::new(vec![vec![]]);
        let outcome = delta_scan(&source, &ExistingKeys::new(), &unbounded()).await.unwrap();
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.stats.pages_fetched, 1);
        assert_eq!(outcome.stats.early_stop_flag, 0);
    }

    #[tokio::test]
    async fn max_pages_bounds_fetching() {
        let pages = vec![vec![job(json!(1))], vec![job(json!(2))], vec![job(json!(3))]];
        let source = PagedSource::new(pages);
        let policy = ScanPolicy {
            max_pages: 2,
            ..unbounded()
        };
        let outcome = delta_scan(&source, &ExistingKeys::new(), &policy).await.unwrap();
        assert_eq!(source.requested(), vec![1, 2]);
        assert_eq!(outcome.stats.kept_delta, 2);
    }

    #[tokio::test]
    async fn missing_ids_are_counted_and_block_early_stop() {
        let pages = vec![
            vec![job(json!(1)), job(JsonValue::Null), job(json!("abc"))],
            vec![job(json!(1))],
        ];
        let source = PagedSource::new(pages);
        let outcome = delta_scan(&source, &existing(&[1]), &unbounded()).await.unwrap();
        assert_eq!(source.requested(), vec![1, 2]);
        assert_eq!(outcome.stats.skipped_missing_id, 2);
        assert_eq!(outcome.stats.skipped_existing, 2);
        assert_eq!(outcome.stats.items_seen, 4);
        assert_eq!(outcome.stats.early_stop_flag, 1);
        assert!(outcome.rows.is_empty());
    }

    #[tokio::test]
    async fn non_object_items_are_ignored() {
        let pages = vec![vec![json!("junk"), json!(42), job(json!(7))], vec![]];
        let source = PagedSource::new(pages);
        let outcome = delta_scan(&source, &ExistingKeys::new(), &unbounded()).await.unwrap();
        assert_eq!(outcome.stats.items_seen, 1);
        assert_eq!(outcome.stats.kept_delta, 1);
        assert_eq!(outcome.stats.pages_fetched, 2);
    }

    #[tokio::test]
    async fn early_stop_can_be_disabled() {
        let pages = vec![vec![job(json!(1))], vec![job(json!(2))], vec![]];
        let source = PagedSource::new(pages);
        let policy = ScanPolicy {
            stop_on_fully_seen_page: false,
            ..unbounded()
        };
        let outcome = delta_scan(&source, &existing(&[1]), &policy).await.unwrap();
        assert_eq!(source.requested(), vec![1, 2, 3]);
        assert_eq!(outcome.stats.early_stop_flag, 0);
        assert_eq!(outcome.rows.len(), 1);
    }

    #[tokio::test]
    async fn fetch_errors_propagate() {
        struct Failing;

        #[async_trait]
        impl SourceAdapter for Failing {
            fn source_id(&self) -> &'static str {
                "failing"
            }
            fn item_kind(&self) -> ItemKind {
                ItemKind::Job
            }
            async fn fetch_page(
                &self,
                page: u32,
                _page_size: u32,
            ) -> Result<Vec<JsonValue>, AdapterError> {
                Err(AdapterError::Payload {
                    source_id: "failing".into(),
                    page,
                    message: "boom".into(),
                })
            }
            fn normalize(&self, raw: &Record) -> CanonicalRow {
                normalize_unstop_job(raw)
            }
        }

        let err = delta_scan(&Failing, &ExistingKeys::new(), &unbounded())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
