//! Core data models shared by the fetcher, the importer and the calendar.

use serde::Serialize;
use serde_json::Value;

/// A Memento library as reported by `GET /libraries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    pub title: String,
}

/// Outcome of importing one source into its base table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub fetched: u64,
    pub inserted: u64,
    /// Entries whose `ext_id` was already present.
    pub ignored: u64,
    /// Entries dropped because no usable timestamp was found.
    pub skipped: u64,
    /// Entries that were not objects or that the database refused twice.
    pub failed: u64,
}

/// Fill counts for one payload field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFill {
    pub name: String,
    pub updated: u64,
    /// Non-empty cells found before the update ran.
    pub already_filled: u64,
}

/// Outcome of expanding one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandReport {
    pub table: String,
    pub columns_added: Vec<String>,
    pub fields: Vec<FieldFill>,
}

impl ExpandReport {
    pub fn total_updated(&self) -> u64 {
        self.fields.iter().map(|f| f.updated).sum()
    }
}

/// One row of the `calendar` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    /// `YYYY-MM-DD`.
    pub giorno: String,
    /// Original cell text.
    pub ts: String,
    pub tab: String,
    pub col: String,
    /// JSON object of primary key column → value.
    pub pk_json: String,
    /// Link relative to the public base URL.
    pub link: String,
    /// Single integer primary key, when the table has one.
    pub pk: Option<i64>,
}

/// Render a JSON scalar (string or number) as text. Empty strings and
/// every other JSON type yield `None`.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
