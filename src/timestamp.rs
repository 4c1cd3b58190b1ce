//! Timestamp normalization for remote entries.
//!
//! Remote entries carry their time in whatever shape the library author
//! picked: epoch seconds, epoch milliseconds, ISO strings, one-element
//! lists, or small objects such as `{"start": ..., "end": ...}`. The
//! importer needs a single text value for the NOT NULL time column, so
//! [`normalize`] folds all of them into RFC 3339 text (or `None` when the
//! value cannot be represented at all).
//!
//! [`pick_time_field`] decides which value of an entry is "the" time.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Integers above this are read as milliseconds, the rest as seconds.
pub const EPOCH_MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Sub-keys of a mapping that may hold the actual time value, in preference order.
const MAPPING_KEYS: [&str; 6] = ["iso", "text", "value", "date", "start", "end"];

/// Top-level keys tried when the declared time column is absent.
pub const FALLBACK_TIME_KEYS: [&str; 8] = [
    "tempo",
    "time",
    "timestamp",
    "createdTime",
    "created_at",
    "modifiedTime",
    "modified_at",
    "date",
];

/// Normalize an arbitrary JSON value into canonical timestamp text.
///
/// Returns `None` for values that cannot be represented: null, empty
/// lists, empty mappings, empty strings, booleans, and epochs outside the
/// range chrono can express.
///
/// A non-empty mapping without a usable sub-key is returned as its JSON
/// text. That is not a timestamp; callers store it as-is.
///
/// ```rust
/// use memento_dash::timestamp::normalize;
/// use serde_json::json;
///
/// assert_eq!(
///     normalize(&json!(1700000000)).as_deref(),
///     Some("2023-11-14T22:13:20+00:00")
/// );
/// assert_eq!(normalize(&json!(["2024-03-01"])).as_deref(), Some("2024-03-01"));
/// assert_eq!(normalize(&json!(null)), None);
/// ```
pub fn normalize(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(_) => None,
        Value::Array(items) => items.first().and_then(normalize),
        Value::Object(map) => normalize_mapping(map),
        Value::String(s) => normalize_str(s),
        Value::Number(n) => {
            let epoch = n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))?;
            epoch_to_iso(epoch)
        }
    }
}

fn normalize_mapping(map: &Map<String, Value>) -> Option<String> {
    if map.is_empty() {
        return None;
    }
    for key in MAPPING_KEYS {
        match map.get(key) {
            Some(v @ (Value::String(_) | Value::Number(_))) => return normalize(v),
            _ => continue,
        }
    }
    serde_json::to_string(map).ok()
}

fn normalize_str(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if is_integer_literal(s) {
        // Too many digits for i64 is not a plausible epoch; keep the text.
        return match s.parse::<i64>() {
            Ok(epoch) => epoch_to_iso(epoch),
            Err(_) => Some(s.to_string()),
        };
    }
    Some(s.to_string())
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Convert an epoch integer to RFC 3339 UTC text, guessing the unit.
pub fn epoch_to_iso(epoch: i64) -> Option<String> {
    let dt: DateTime<Utc> = if epoch > EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(epoch)?
    } else {
        DateTime::from_timestamp(epoch, 0)?
    };
    Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
}

/// Select the value of `entry` that carries its timestamp.
///
/// Order: the declared column at top level, the declared column inside the
/// entry's `fields` list, the [`FALLBACK_TIME_KEYS`], then the first key
/// whose name mentions `time` or `date`.
pub fn pick_time_field<'a>(entry: &'a Map<String, Value>, tempo_col: &str) -> Option<&'a Value> {
    if !tempo_col.is_empty() {
        if let Some(v) = entry.get(tempo_col) {
            return Some(v);
        }
        if let Some(v) = field_value(entry, tempo_col) {
            return Some(v);
        }
    }

    if let Some(v) = FALLBACK_TIME_KEYS.iter().find_map(|k| entry.get(*k)) {
        return Some(v);
    }

    entry.iter().find_map(|(k, v)| {
        let lower = k.to_lowercase();
        (lower.contains("time") || lower.contains("date")).then_some(v)
    })
}

/// First `value` of a `{name, value}` object in the entry's `fields` list.
pub fn field_value<'a>(entry: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    entry
        .get("fields")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find(|f| f.get("name").and_then(Value::as_str) == Some(name))
        .and_then(|f| f.get("value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn epoch_seconds() {
        let out = normalize(&json!(1700000000)).unwrap();
        assert!(out.starts_with("2023-11-14"), "{}", out);
        assert_eq!(out, "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn epoch_millis() {
        let out = normalize(&json!(1700000000000i64)).unwrap();
        assert!(out.starts_with("2023-11-14"), "{}", out);
    }

    #[test]
    fn epoch_millis_keep_fraction() {
        let out = normalize(&json!(1700000000123i64)).unwrap();
        assert_eq!(out, "2023-11-14T22:13:20.123+00:00");
    }

    #[test]
    fn digit_strings_are_epochs() {
        assert_eq!(
            normalize(&json!("1700000000")),
            normalize(&json!(1700000000))
        );
        assert_eq!(
            normalize(&json!(" 1700000000000 ")),
            normalize(&json!(1700000000000i64))
        );
    }

    #[test]
    fn threshold_is_exclusive() {
        // Exactly 10^10 is still seconds (year 2286).
        assert!(normalize(&json!(10_000_000_000i64))
            .unwrap()
            .starts_with("2286-"));
    }

    #[test]
    fn iso_strings_pass_through() {
        assert_eq!(
            normalize(&json!("2024-03-01T10:00:00")).as_deref(),
            Some("2024-03-01T10:00:00")
        );
        assert_eq!(normalize(&json!("01-05-24")).as_deref(), Some("01-05-24"));
    }

    #[test]
    fn lists_use_first_element() {
        assert_eq!(normalize(&json!(["2024-03-01"])).as_deref(), Some("2024-03-01"));
        assert_eq!(normalize(&json!([])), None);
        assert_eq!(
            normalize(&json!([1700000000])).as_deref(),
            Some("2023-11-14T22:13:20+00:00")
        );
    }

    #[test]
    fn mappings_prefer_known_keys() {
        assert_eq!(
            normalize(&json!({"end": "2024-01-02", "start": "2024-01-01"})).as_deref(),
            Some("2024-01-01")
        );
        assert_eq!(
            normalize(&json!({"value": 1700000000})).as_deref(),
            Some("2023-11-14T22:13:20+00:00")
        );
        // Non-primitive under a preferred key falls through to the next key.
        assert_eq!(
            normalize(&json!({"iso": {"nested": 1}, "date": "2024-02-02"})).as_deref(),
            Some("2024-02-02")
        );
    }

    #[test]
    fn mapping_without_known_key_is_serialized() {
        assert_eq!(
            normalize(&json!({"lat": 1, "lng": 2})).as_deref(),
            Some(r#"{"lat":1,"lng":2}"#)
        );
    }

    #[test]
    fn unrepresentable_values() {
        assert_eq!(normalize(&Value::Null), None);
        assert_eq!(normalize(&json!({})), None);
        assert_eq!(normalize(&json!("   ")), None);
        assert_eq!(normalize(&json!(true)), None);
        assert_eq!(normalize(&json!(i64::MAX)), None);
    }

    #[test]
    fn pick_prefers_declared_column() {
        let e = entry(json!({"createdTime": "2020-01-01", "quando": "2024-05-01"}));
        assert_eq!(pick_time_field(&e, "quando"), Some(&json!("2024-05-01")));
    }

    #[test]
    fn pick_reads_declared_column_from_fields() {
        let e = entry(json!({
            "createdTime": "2020-01-01",
            "fields": [{"name": "umore", "value": "ok"}, {"name": "quando", "value": 1700000000}]
        }));
        assert_eq!(pick_time_field(&e, "quando"), Some(&json!(1700000000)));
    }

    #[test]
    fn pick_uses_fallback_list_in_order() {
        let e = entry(json!({"modifiedTime": "b", "createdTime": "a"}));
        assert_eq!(pick_time_field(&e, "tempo"), Some(&json!("a")));
    }

    #[test]
    fn pick_uses_name_pattern() {
        let e = entry(json!({"id": 1, "StartDate": "2024-01-01", "lastTimeSeen": "x"}));
        assert_eq!(pick_time_field(&e, "tempo"), Some(&json!("2024-01-01")));
        let none = entry(json!({"id": 1, "note": "x"}));
        assert_eq!(pick_time_field(&none, "tempo"), None);
    }
}
