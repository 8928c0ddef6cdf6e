use async_trait::async_trait;
use oppsync_adapters::normalize::normalize_unstop_job;
use oppsync_adapters::{AdapterError, SourceAdapter};
use oppsync_core::{CanonicalRow, ItemKind, Record};
use serde_json::{json, Value as JsonValue};

/// Job source serving fixed pages; anything past the last page is empty.
pub struct ScriptedSource {
    source_id: &'static str,
    pages: Vec<Vec<JsonValue>>,
}

impl ScriptedSource {
    pub fn jobs(pages: Vec<Vec<JsonValue>>) -> Self {
        Self {
            source_id: "scripted",
            pages,
        }
    }

    pub fn named(mut self, source_id: &'static str) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn internships(ids: &[i64]) -> Vec<JsonValue> {
        ids.iter()
            .map(|id| {
                json!({
                    "id": id,
                    "title": format!("Internship {id}"),
                    "subtype": "internship",
                    "end_date": "2026-12-31T23:59:00+05:30",
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn source_id(&self) -> &'static str {
        self.source_id
    }

    fn item_kind(&self) -> ItemKind {
        ItemKind::Job
    }

    async fn fetch_page(
        &self,
        page: u32,
        _page_size: u32,
    ) -> Result<Vec<JsonValue>, AdapterError> {
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
