//! SQL identifier handling.
//!
//! Table and column names in this tool come from config files, plan files,
//! the calendar column list and remote payloads, and end up inside
//! dynamically built SQL. Caller-supplied names are checked with
//! [`validate`] before use; every identifier is emitted through [`quote`].

use anyhow::{bail, Result};

/// Accept names made of letters, digits and underscores only.
pub fn validate(name: &str) -> Result<&str> {
    if name.is_empty() {
        bail!("empty SQL identifier");
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        bail!(
            "invalid SQL identifier '{}': only letters, digits and '_' are allowed",
            name
        );
    }
    Ok(name)
}

/// Quote an identifier for SQLite: wrap in double quotes, double any embedded quote.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for SQLite.
pub fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
