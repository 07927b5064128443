use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::collections::Collection;
use crate::models::ALL_STUDENTS;

type Record = Map<String, Value>;

/// Rewrite one record from an older dashboard build into the current shape.
/// Anything that is not a JSON object is returned untouched.
pub(crate) fn adapt(collection: Collection, value: Value, now: DateTime<Utc>) -> Value {
    let Value::Object(mut record) = value else {
        return value;
    };
    numeric_field(&mut record, "id");
    match collection {
        Collection::Applications => application(&mut record, now),
        Collection::Postings => posting(&mut record),
        Collection::Notifications => notification(&mut record, now),
        Collection::Shortlisted => shortlisted(&mut record, now),
        Collection::Skills | Collection::Colleges | Collection::Notices | Collection::Feedback => {}
    }
    Value::Object(record)
}

pub(crate) fn numeric_id(value: &Value) -> Option<u64> {
    value.get("id").and_then(Value::as_u64)
}

fn application(record: &mut Record, now: DateTime<Utc>) {
    rename(record, "internship", "role");
    numeric_field(record, "internshipId");
    record.entry("internshipId").or_insert(Value::from(0));
    record.entry("company").or_insert(Value::from(""));
    if !record.contains_key("studentId") {
        if let Some(name) = record.get("studentName").and_then(Value::as_str) {
            let handle = name.split_whitespace().collect::<Vec<_>>().join(".").to_lowercase();
            record.insert("studentId".into(), Value::from(handle));
        }
    }
    numeric_field(record, "cgpa");
    timestamp(record, "appliedDate", now);
}

fn posting(record: &mut Record) {
    let has_targets = record.contains_key("targetColleges") || record.contains_key("selectedColleges");
    if !has_targets {
        if let Some(college) = record.remove("college").filter(Value::is_string) {
            record.insert("targetColleges".into(), Value::Array(vec![college]));
            record.entry("type").or_insert(Value::from("college-specific"));
        }
    }
    record.entry("type").or_insert(Value::from("universal"));
    numeric_field(record, "applications");
    for field in ["postedAt", "postedDate"] {
        if let Some(date) = record.get(field).and_then(Value::as_str).and_then(date_only) {
            record.insert(field.into(), Value::from(date.to_rfc3339()));
        }
    }
}

fn notification(record: &mut Record, now: DateTime<Utc>) {
    record.entry("recipient").or_insert(Value::from(ALL_STUDENTS));
    if !record.contains_key("timestamp") {
        let at = record
            .get("time")
            .and_then(Value::as_str)
            .and_then(|t| relative(t, now))
            .unwrap_or(now);
        record.insert("timestamp".into(), Value::from(at.to_rfc3339()));
    }
    record.entry("type").or_insert(Value::from("info"));
}

fn shortlisted(record: &mut Record, now: DateTime<Utc>) {
    rename(record, "internship", "role");
    numeric_field(record, "internshipId");
    record.entry("internshipId").or_insert(Value::from(0));
    record.entry("company").or_insert(Value::from(""));
    numeric_field(record, "cgpa");
    record
        .entry("shortlistedAt")
        .or_insert_with(|| Value::from(now.to_rfc3339()));
}

fn rename(record: &mut Record, from: &str, to: &str) {
    if record.contains_key(to) {
        return;
    }
    if let Some(value) = record.remove(from) {
        record.insert(to.into(), value);
    }
}

/// `"42"` becomes `42`, `"8.5"` becomes `8.5`. Other strings are left alone.
fn numeric_field(record: &mut Record, field: &str) {
    let Some(text) = record.get(field).and_then(Value::as_str).map(str::trim) else {
        return;
    };
    let number = if let Ok(n) = text.parse::<u64>() {
        Value::from(n)
    } else if let Ok(f) = text.parse::<f64>() {
        Value::from(f)
    } else {
        return;
    };
    record.insert(field.into(), number);
}

/// Normalize a date-only or relative ("2 days ago") time into RFC 3339.
fn timestamp(record: &mut Record, field: &str, now: DateTime<Utc>) {
    let Some(text) = record.get(field).and_then(Value::as_str) else {
        record.insert(field.into(), Value::from(now.to_rfc3339()));
        return;
    };
    if text.parse::<DateTime<Utc>>().is_ok() {
        return;
    }
    let at = date_only(text).or_else(|| relative(text, now)).unwrap_or(now);
    record.insert(field.into(), Value::from(at.to_rfc3339()));
}

fn date_only(text: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
}

fn relative(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut words = text.split_whitespace();
    let amount: i64 = words.next()?.parse().ok()?;
    let unit = words.next()?.to_lowercase();
    if words.next() != Some("ago") {
        return None;
    }
    let span = if unit.starts_with("min") {
        Duration::minutes(amount)
    } else if unit.starts_with("hr") || unit.starts_with("hour") {
        Duration::hours(amount)
    } else if unit.starts_with("day") {
        Duration::days(amount)
    } else if unit.starts_with("week") {
        Duration::weeks(amount)
    } else {
        return None;
    };
    Some(now - span)
}
