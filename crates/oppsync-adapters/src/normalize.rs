//! Raw Unstop search-result items to canonical rows. Pure; never fails.

use chrono::DateTime;
use oppsync_core::{value_text, CanonicalRow, ItemKind, Record};
use scraper::Html;
use serde_json::{json, Value as JsonValue};

pub const PLATFORM_UNSTOP: &str = "unstop";

const NOT_DISCLOSED: &str = "Not disclosed";

pub fn normalize_unstop_job(item: &Record) -> CanonicalRow {
    let org = object_field(item, &["organisation", "organization"]);
    let job_detail = object_field(item, &["jobDetail", "job_detail"]);
    let region = item.get("region");

    let cities = array_field(item, &["locations"])
        .iter()
        .filter_map(|loc| loc.as_object())
        .map(|loc| value_text(loc.get("city")))
        .collect::<Vec<_>>();
    let mut job_location = safe_join(&cities);
    if job_location.is_empty() {
        job_location = "Online".to_string();
    }

    let eligibility = array_field(item, &["filters"])
        .iter()
        .filter_map(|f| f.as_object())
        .map(|f| value_text(f.get("name")))
        .collect::<Vec<_>>();

    let mut out = Record::new();
    out.insert("job_id".into(), field_or_null(item, "id"));
    out.insert("job_title".into(), field_or_null(item, "title"));
    out.insert("company_name".into(), field_or_null(&org, "name"));
    out.insert(
        "company_id".into(),
        first_truthy(&[org.get("id"), item.get("organization_id")]),
    );
    out.insert("platform".into(), json!(PLATFORM_UNSTOP));
    out.insert("oppurtunity_type".into(), field_or_null(item, "subtype"));
    out.insert("status".into(), json!(1));
    out.insert(
        "work_mode".into(),
        build_work_mode(&job_detail, region).map_or(JsonValue::Null, JsonValue::String),
    );
    out.insert("salary_range".into(), json!(build_salary(&job_detail)));
    out.insert("timing".into(), field_or_null(&job_detail, "timing"));
    out.insert("paid_unpaid".into(), field_or_null(&job_detail, "paid_unpaid"));
    out.insert("pay_in".into(), field_or_null(&job_detail, "pay_in"));
    out.insert("job_location".into(), json!(job_location));
    out.insert("region".into(), region.cloned().unwrap_or(JsonValue::Null));
    out.insert(
        "application_deadline".into(),
        json!(format_deadline(item.get("end_date"))),
    );
    out.insert("updated_at".into(), field_or_null(item, "updated_at"));
    out.insert("required_skills".into(), json!(skill_names(item)));
    out.insert("eleigibility_criteria".into(), json!(safe_join(&eligibility)));
    out.insert("viewsCount".into(), field_or_null(item, "viewsCount"));
    out.insert("registerCount".into(), field_or_null(item, "registerCount"));
    out.insert("application_url".into(), field_or_null(item, "seo_url"));
    out.insert("short_url".into(), field_or_null(item, "short_url"));
    out.insert("public_url".into(), field_or_null(item, "public_url"));
    out.insert("short_id".into(), field_or_null(item, "short_id"));
    out.insert("logo_url".into(), logo_url(item, &org));
    out.insert("details".into(), json!(details_text(item)));
    out.insert("order".into(), json!(0));

    CanonicalRow::new(ItemKind::Job, out)
}

pub fn normalize_unstop_competition(item: &Record) -> CanonicalRow {
    let org = object_field(item, &["organisation", "organization"]);

    let eligible = array_field(item, &["filters"])
        .iter()
        .filter_map(|f| f.as_object())
        .filter(|f| value_text(f.get("type")).to_lowercase() == "eligible")
        .map(|f| value_text(f.get("name")))
        .collect::<Vec<_>>();

    let address = object_field(item, &["address_with_country_logo"]);
    let mut location = value_text(address.get("address"));
    if location.is_empty() {
        location = "online".to_string();
    }

    let prizes = match max_prize_cash(&array_field(item, &["prizes"])) {
        Some(max) => format!("Prizes upto {max}"),
        None => String::new(),
    };

    let mut out = Record::new();
    out.insert("competition_id".into(), field_or_null(item, "id"));
    out.insert("competition_title".into(), field_or_null(item, "title"));
    out.insert("organization_name".into(), field_or_null(&org, "name"));
    out.insert("application_url".into(), field_or_null(item, "seo_url"));
    out.insert(
        "application_deadline".into(),
        json!(format_deadline(item.get("end_date"))),
    );
    out.insert("competition_location".into(), json!(location));
    out.insert("prizes".into(), json!(prizes));
    out.insert("competition_mode".into(), field_or_null(item, "region"));
    out.insert("competition_type".into(), json!(value_text(item.get("type"))));
    out.insert("required_skills".into(), json!(skill_names(item)));
    out.insert("eligibility_criteria".into(), json!(safe_join(&eligible)));
    out.insert("competition_logo_url".into(), logo_url(item, &org));
    out.insert("competition_description".into(), json!(details_text(item)));
    out.insert("competition_status".into(), json!(1));
    out.insert("display_order".into(), json!(0));
    out.insert("platform".into(), json!(PLATFORM_UNSTOP));

    CanonicalRow::new(ItemKind::Competition, out)
}

/// `"min-max"`, `"max"`, `"min"`, or `"Not disclosed"` when hidden or absent.
pub fn build_salary(job_detail: &Record) -> String {
    let hidden = match job_detail.get("show_salary") {
        Some(JsonValue::Bool(false)) => true,
        Some(JsonValue::Number(n)) => n.as_f64() == Some(0.0),
        Some(JsonValue::String(s)) => s.trim() == "0" || s.trim().eq_ignore_ascii_case("false"),
        _ => false,
    };
    let not_disclosed = matches!(job_detail.get("not_disclosed"), Some(JsonValue::Bool(true)));
    if hidden || not_disclosed {
        return NOT_DISCLOSED.to_string();
    }

    let min = job_detail.get("min_salary").and_then(to_int_lossy);
    let max = job_detail.get("max_salary").and_then(to_int_lossy);
    match (min, max) {
        (Some(min), Some(max)) => format!("{min}-{max}"),
        (None, Some(max)) => max.to_string(),
        (Some(min), None) => min.to_string(),
        (None, None) => NOT_DISCLOSED.to_string(),
    }
}

/// `in_office | hybrid | wfh | on_field`, the raw lowercased type, or `None`.
pub fn build_work_mode(job_detail: &Record, region: Option<&JsonValue>) -> Option<String> {
    let t = value_text(job_detail.get("type")).to_lowercase();
    match t.as_str() {
        "in_office" | "in-office" | "office" | "in office" => Some("in_office".into()),
        "hybrid" => Some("hybrid".into()),
        "remote" | "wfh" | "work_from_home" | "work-from-home" => Some("wfh".into()),
        "on_field" | "field" | "on-field" => Some("on_field".into()),
        "" if value_text(region).to_lowercase() == "online" => Some("wfh".into()),
        "" => None,
        other => Some(other.to_string()),
    }
}

/// Cuts ISO timestamps down to their `YYYY-MM-DD` date; empty when unusable.
pub fn format_deadline(value: Option<&JsonValue>) -> String {
    let text = value_text(value);
    if text.is_empty() {
        return String::new();
    }
    let chars = text.chars().collect::<Vec<_>>();
    if chars.len() >= 10 && chars[4] == '-' && chars[7] == '-' {
        return chars[..10].iter().collect();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return dt.date_naive().to_string();
    }
    if chars.len() >= 10 {
        chars[..10].iter().collect()
    } else {
        String::new()
    }
}

/// HTML fragment to whitespace-collapsed text with entities decoded.
pub fn strip_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn details_text(item: &Record) -> String {
    item.get("details")
        .and_then(JsonValue::as_str)
        .map(strip_html)
        .unwrap_or_default()
}

fn skill_names(item: &Record) -> String {
    let names = array_field(item, &["required_skills", "skills"])
        .iter()
        .filter_map(|s| s.as_object())
        .map(|s| {
            let name = value_text(s.get("skill_name"));
            if name.is_empty() {
                value_text(s.get("skill"))
            } else {
                name
            }
        })
        .collect::<Vec<_>>();
    safe_join(&names)
}

fn logo_url(item: &Record, org: &Record) -> JsonValue {
    first_truthy(&[item.get("logoUrl2"), org.get("logoUrl2"), org.get("logoUrl")])
}

fn max_prize_cash(prizes: &[JsonValue]) -> Option<i64> {
    prizes
        .iter()
        .filter_map(|p| p.as_object())
        .filter_map(|p| p.get("cash").and_then(to_int_lossy))
        .max()
}

fn safe_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_int_lossy(value: &JsonValue) -> Option<i64> {
    let f = match value {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            n.as_f64()?
        }
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if f.is_finite() {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64() != Some(0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn first_truthy(candidates: &[Option<&JsonValue>]) -> JsonValue {
    candidates
        .iter()
        .flatten()
        .find(|v| is_truthy(v))
        .map(|v| (*v).clone())
        .unwrap_or(JsonValue::Null)
}

fn field_or_null(record: &Record, key: &str) -> JsonValue {
    record.get(key).cloned().unwrap_or(JsonValue::Null)
}

fn object_field(record: &Record, keys: &[&str]) -> Record {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| is_truthy(v))
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

fn array_field(record: &Record, keys: &[&str]) -> Vec<JsonValue> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| is_truthy(v))
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
}
