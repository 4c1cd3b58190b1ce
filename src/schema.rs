//! Schema evolution and catalog lookups.
//!
//! Destination tables are created lazily with a minimal base schema and
//! grow columns over time (the field expander adds one per payload field).
//! Every helper takes a `&mut SqliteConnection` so it runs equally on a
//! pooled connection or inside an open transaction.

use anyhow::Result;
use sqlx::{Row, SqliteConnection};

use crate::ident::quote;

/// Column holding the stable external identifier.
pub const EXT_ID: &str = "ext_id";
/// Column holding the original entry as JSON text.
pub const RAW: &str = "raw";

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk: i64,
}

pub async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

pub async fn view_exists(conn: &mut SqliteConnection, view: &str) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type = 'view' AND name = ?")
            .bind(view)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

/// Columns of `table` in declaration order; empty when the table is missing.
pub async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote(table)))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .map(|row| ColumnInfo {
            name: row.get("name"),
            decl_type: row.get::<Option<String>, _>("type").unwrap_or_default(),
            pk: row.get("pk"),
        })
        .collect())
}

/// Case-insensitive column lookup, as SQLite resolves names.
pub fn has_column(columns: &[ColumnInfo], name: &str) -> bool {
    columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
}

/// Primary key columns in key order. Tables without an explicit key fall
/// back to `rowid` when it is selectable (not for `WITHOUT ROWID` tables
/// or views); otherwise the result is empty.
pub async fn primary_key_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
    let mut keyed: Vec<ColumnInfo> = table_columns(conn, table)
        .await?
        .into_iter()
        .filter(|c| c.pk > 0)
        .collect();
    if !keyed.is_empty() {
        keyed.sort_by_key(|c| c.pk);
        return Ok(keyed.into_iter().map(|c| c.name).collect());
    }

    let probe = sqlx::query(&format!("SELECT rowid FROM {} LIMIT 1", quote(table)))
        .fetch_optional(&mut *conn)
        .await;
    match probe {
        Ok(_) => Ok(vec!["rowid".to_string()]),
        Err(e) => {
            tracing::debug!(table, "no rowid: {}", e);
            Ok(Vec::new())
        }
    }
}

/// Create `table` with the base schema if it does not exist yet.
pub async fn ensure_base_table(
    conn: &mut SqliteConnection,
    table: &str,
    tempo_col: &str,
) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {ext_id} TEXT UNIQUE,
            {tempo} TEXT NOT NULL,
            {raw} TEXT
        )
        "#,
        table = quote(table),
        ext_id = quote(EXT_ID),
        tempo = quote(tempo_col),
        raw = quote(RAW),
    ))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Add `ext_id` to a pre-existing table that lacks it, then try to back it
/// with a unique index. Duplicate values already in the table make the
/// index fail; that is logged and tolerated.
pub async fn ensure_external_id_column(conn: &mut SqliteConnection, table: &str) -> Result<()> {
    let columns = table_columns(conn, table).await?;
    if has_column(&columns, EXT_ID) {
        return Ok(());
    }

    sqlx::query(&format!(
        "ALTER TABLE {} ADD COLUMN {} TEXT",
        quote(table),
        quote(EXT_ID)
    ))
    .execute(&mut *conn)
    .await?;
    tracing::info!(table, "added {} column", EXT_ID);

    let index = format!("{}_ext_id_unique", table);
    let created = sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote(&index),
        quote(table),
        quote(EXT_ID)
    ))
    .execute(&mut *conn)
    .await;
    if let Err(e) = created {
        tracing::warn!(table, "could not create unique index on {}: {}", EXT_ID, e);
    }
    Ok(())
}

/// Add a nullable TEXT column unless one with the same name (ignoring
/// case) exists. Returns whether a column was added.
pub async fn ensure_text_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool> {
    let columns = table_columns(conn, table).await?;
    if has_column(&columns, column) {
        return Ok(false);
    }
    sqlx::query(&format!(
        "ALTER TABLE {} ADD COLUMN {} TEXT",
        quote(table),
        quote(column)
    ))
    .execute(&mut *conn)
    .await?;
    Ok(true)
}
