//! Core row model and composite-key identity for oppsync.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const CRATE_NAME: &str = "oppsync-core";

pub const UNKNOWN_PLATFORM: &str = "unknown_platform";
pub const UNKNOWN_TYPE: &str = "unknown_type";

/// A stored or normalized listing as a flat, ordered field map.
pub type Record = Map<String, JsonValue>;

/// Composite keys already present in the remote collection for one run.
pub type ExistingKeys = HashSet<CompositeKey>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Job,
    Competition,
}

/// Where the identity-bearing fields live for one item kind, plus the fixed
/// column order used for artifacts.
#[derive(Debug)]
pub struct RowSchema {
    pub id_field: &'static str,
    pub type_field: &'static str,
    pub deadline_field: &'static str,
    pub columns: &'static [&'static str],
}

pub const PLATFORM_FIELD: &str = "platform";

const JOB_COLUMNS: &[&str] = &[
    "job_id",
    "job_title",
    "company_name",
    "company_id",
    "platform",
    "oppurtunity_type",
    "status",
    "work_mode",
    "salary_range",
    "timing",
    "paid_unpaid",
    "pay_in",
    "job_location",
    "region",
    "application_deadline",
    "updated_at",
    "required_skills",
    "eleigibility_criteria",
    "viewsCount",
    "registerCount",
    "application_url",
    "short_url",
    "public_url",
    "short_id",
    "logo_url",
    "details",
    "order",
];

const COMPETITION_COLUMNS: &[&str] = &[
    "competition_id",
    "competition_title",
    "organization_name",
    "application_url",
    "application_deadline",
    "competition_location",
    "prizes",
    "competition_mode",
    "competition_type",
    "required_skills",
    "eligibility_criteria",
    "competition_logo_url",
    "competition_description",
    "competition_status",
    "display_order",
    "platform",
];

// The stored spelling `oppurtunity_type` is part of the persisted format.
static JOB_SCHEMA: RowSchema = RowSchema {
    id_field: "job_id",
    type_field: "oppurtunity_type",
    deadline_field: "application_deadline",
    columns: JOB_COLUMNS,
};

static COMPETITION_SCHEMA: RowSchema = RowSchema {
    id_field: "competition_id",
    type_field: "competition_type",
    deadline_field: "application_deadline",
    columns: COMPETITION_COLUMNS,
};

impl ItemKind {
    pub fn schema(self) -> &'static RowSchema {
        match self {
            ItemKind::Job => &JOB_SCHEMA,
            ItemKind::Competition => &COMPETITION_SCHEMA,
        }
    }

    /// Plural label used for pipeline names and artifact paths.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Job => "jobs",
            ItemKind::Competition => "competitions",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable `platform:item_type:item_id` identity. The format is persisted
/// implicitly through remote data and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the composite key, or `None` when `item_id` does not coerce to an integer.
pub fn build_key(platform: &str, item_type: &str, item_id: &JsonValue) -> Option<CompositeKey> {
    let id = coerce_item_id(item_id)?;
    let platform = normalize_key_part(platform, UNKNOWN_PLATFORM);
    let item_type = normalize_key_part(item_type, UNKNOWN_TYPE);
    Some(CompositeKey(format!("{platform}:{item_type}:{id}")))
}

fn normalize_key_part(raw: &str, sentinel: &str) -> String {
    let part = raw.trim().to_lowercase();
    if part.is_empty() {
        sentinel.to_string()
    } else {
        part
    }
}

/// Integers, integer-valued floats, and strings holding either.
pub fn coerce_item_id(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if let Some(u) = n.as_u64() {
                i64::try_from(u).ok()
            } else {
                n.as_f64().and_then(integral_f64)
            }
        }
        JsonValue::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
        }
        _ => None,
    }
}

fn integral_f64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parses the first ten characters as `YYYY-MM-DD`; anything else is `None`.
pub fn parse_deadline(value: Option<&JsonValue>) -> Option<NaiveDate> {
    let text = value?.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    let head: String = text.chars().take(10).collect();
    NaiveDate::parse_from_str(&head, "%Y-%m-%d").ok()
}

/// Expired iff the deadline parses and is strictly before `today`.
pub fn is_expired(value: Option<&JsonValue>, today: NaiveDate) -> bool {
    parse_deadline(value).is_some_and(|deadline| deadline < today)
}

/// Renders scalar JSON as text the way stored records are compared; null and
/// containers become empty.
pub fn value_text(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        Some(JsonValue::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

const LEGACY_URL_FIELDS: &[&str] = &["application_url", "short_url", "public_url"];
const LEGACY_TYPE_FIELDS: &[&str] = &["subtype", "type", "opportunity_type", "opportunity"];

/// Derives the composite key of a stored record, tolerating legacy rows that
/// predate the explicit `platform` and type columns.
pub fn record_composite_key(kind: ItemKind, record: &Record) -> Option<CompositeKey> {
    let schema = kind.schema();
    let id = record.get(schema.id_field)?;

    let mut platform = value_text(record.get(PLATFORM_FIELD));
    if platform.is_empty() {
        let from_url = LEGACY_URL_FIELDS
            .iter()
            .any(|field| value_text(record.get(*field)).contains("unstop.com"));
        if from_url {
            platform = "unstop".to_string();
        }
    }

    let mut item_type = value_text(record.get(schema.type_field));
    if item_type.is_empty() {
        item_type = LEGACY_TYPE_FIELDS
            .iter()
            .map(|field| value_text(record.get(*field)))
            .find(|v| !v.is_empty())
            .unwrap_or_default();
    }

    build_key(&platform, &item_type, id)
}

/// One normalized listing. Serializes as its flat field map in schema column
/// order, which is also the shape written to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRow {
    #[serde(skip)]
    kind: ItemKind,
    #[serde(flatten)]
    fields: Record,
}

impl CanonicalRow {
    /// Orders known columns first, fills missing ones with `""`, and keeps any
    /// extra fields after them.
    pub fn new(kind: ItemKind, mut fields: Record) -> Self {
        let mut ordered = Record::new();
        for column in kind.schema().columns {
            let value = fields
                .remove(*column)
                .unwrap_or_else(|| JsonValue::String(String::new()));
            ordered.insert((*column).to_string(), value);
        }
        ordered.extend(fields);
        Self {
            kind,
            fields: ordered,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Record {
        &self.fields
    }

    pub fn into_record(self) -> Record {
        self.fields
    }

    pub fn platform(&self) -> String {
        value_text(self.fields.get(PLATFORM_FIELD))
    }

    pub fn item_type(&self) -> String {
        value_text(self.fields.get(self.kind.schema().type_field))
    }

    pub fn item_id(&self) -> Option<i64> {
        self.fields
            .get(self.kind.schema().id_field)
            .and_then(coerce_item_id)
    }

    pub fn deadline(&self) -> String {
        value_text(self.fields.get(self.kind.schema().deadline_field))
    }

    pub fn composite_key(&self) -> Option<CompositeKey> {
        let id = self.fields.get(self.kind.schema().id_field)?;
        build_key(&self.platform(), &self.item_type(), id)
    }

    /// Cell text for CSV output; strings verbatim, null empty, other JSON rendered.
    pub fn cell(&self, column: &str) -> String {
        match self.fields.get(column) {
            None | Some(JsonValue::Null) => String::new(),
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}
