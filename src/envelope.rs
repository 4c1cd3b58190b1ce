//! Response envelope extraction.
//!
//! List endpoints of the Memento API (and the proxies people put in front
//! of it) wrap their entries differently: `{"entries": [...]}`,
//! `{"items": [...]}`, `{"data": {"results": [...]}}` or a bare array.
//! Each shape is one [`Envelope`] strategy; [`extract_entries`] tries them
//! in [`ENVELOPES`] order and the first list found wins.

use serde_json::Value;

/// Where the entry list of a page may live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// Under a top-level key.
    Key(&'static str),
    /// The body itself.
    Body,
}

/// Strategies in the order they are tried.
pub const ENVELOPES: [Envelope; 4] = [
    Envelope::Key("entries"),
    Envelope::Key("items"),
    Envelope::Key("data"),
    Envelope::Body,
];

/// Keys searched one level down when a candidate is an object.
const NESTED_KEYS: [&str; 3] = ["results", "entries", "items"];

impl Envelope {
    /// Return the entry list this strategy finds in `body`, if any.
    pub fn extract<'a>(&self, body: &'a Value) -> Option<&'a Vec<Value>> {
        let candidate = match self {
            Envelope::Key(key) => body.as_object()?.get(*key)?,
            Envelope::Body => body,
        };
        match candidate {
            Value::Array(items) => Some(items),
            Value::Object(map) => NESTED_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array)),
            _ => None,
        }
    }
}

/// Entries of one page; an unrecognized shape yields an empty page.
pub fn extract_entries(body: &Value) -> Vec<Value> {
    ENVELOPES
        .iter()
        .find_map(|strategy| strategy.extract(body))
        .cloned()
        .unwrap_or_default()
}
