//! Field expander: lift `raw.fields[]` values into real columns.
//!
//! Memento entries carry their user-defined fields as
//! `{"fields": [{"name": "umore", "value": "felice"}, ...]}`. The expander
//! discovers every field name present in a table's `raw` payloads, adds a
//! TEXT column per name and copies values into cells that are still NULL
//! or empty. Filled cells are never overwritten, so re-running converges.
//!
//! Payloads that are not valid JSON, lack a `fields` array or hold
//! non-object field items are ignored.

use anyhow::{Context, Result};
use indexmap::IndexSet;
use sqlx::{SqliteConnection, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::ident::{self, quote};
use crate::models::{ExpandReport, FieldFill};
use crate::schema::{self, EXT_ID, RAW};

/// Columns owned by the base schema; fields with these names are ignored.
const RESERVED: [&str; 3] = ["id", EXT_ID, RAW];

/// Distinct field names across all payloads, in first-seen order.
pub async fn discover_fields(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
    let sql = format!(
        r#"
        WITH u AS MATERIALIZED (
            SELECT {raw} AS raw FROM {table}
            WHERE CASE WHEN json_valid({raw}) THEN json_type({raw}, '$.fields') = 'array' ELSE 0 END
        )
        SELECT CASE WHEN j.type = 'object'
                    THEN CASE WHEN json_type(j.value, '$.name') = 'text'
                              THEN json_extract(j.value, '$.name') END
               END AS field_name
        FROM u, json_each(u.raw, '$.fields') AS j
        "#,
        raw = quote(RAW),
        table = quote(table),
    );
    let names: Vec<Option<String>> = sqlx::query_scalar(&sql).fetch_all(&mut *conn).await?;

    let unique: IndexSet<String> = names
        .into_iter()
        .flatten()
        .filter(|n| !n.trim().is_empty())
        .collect();
    Ok(unique.into_iter().collect())
}

/// Copy the first non-empty value of `field` into `column` for every row
/// where that column is NULL or empty.
async fn fill_column(conn: &mut SqliteConnection, table: &str, field: &str) -> Result<FieldFill> {
    let t = quote(table);
    let col = quote(field);

    let already_filled: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {t} WHERE {col} IS NOT NULL AND {col} <> ''"
    ))
    .fetch_one(&mut *conn)
    .await?;

    let sql = format!(
        r#"
        WITH v AS (
            SELECT u.rowid AS rid,
                   (SELECT json_extract(j.value, '$.value')
                      FROM json_each(CASE WHEN json_valid(u.{raw}) THEN u.{raw} ELSE '{{}}' END,
                                     '$.fields') AS j
                     WHERE CASE WHEN j.type = 'object'
                                THEN json_extract(j.value, '$.name') = ?1
                                     AND json_extract(j.value, '$.value') IS NOT NULL
                                     AND json_extract(j.value, '$.value') <> ''
                                ELSE 0 END
                     ORDER BY j.key
                     LIMIT 1) AS val
            FROM {t} AS u
            WHERE (u.{col} IS NULL OR u.{col} = '')
              AND CASE WHEN json_valid(u.{raw})
                       THEN json_type(u.{raw}, '$.fields') = 'array'
                       ELSE 0 END
        )
        UPDATE {t} SET {col} = v.val
        FROM v
        WHERE {t}.rowid = v.rid AND v.val IS NOT NULL AND v.val <> ''
        "#,
        raw = quote(RAW),
    );
    let updated = sqlx::query(&sql)
        .bind(field)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(FieldFill {
        name: field.to_string(),
        updated,
        already_filled: already_filled as u64,
    })
}

/// Expand `table`. Returns `None` when the table or its `raw` column is
/// missing.
pub async fn expand_table(pool: &SqlitePool, table: &str) -> Result<Option<ExpandReport>> {
    let mut tx = pool.begin().await?;

    if !schema::table_exists(&mut tx, table).await? {
        tracing::info!(table, "table not found, nothing to expand");
        return Ok(None);
    }
    let columns = schema::table_columns(&mut tx, table).await?;
    if !schema::has_column(&columns, RAW) {
        tracing::info!(table, "no {} column, nothing to expand", RAW);
        return Ok(None);
    }

    let fields: Vec<String> = discover_fields(&mut tx, table)
        .await?
        .into_iter()
        .filter(|name| {
            let reserved = RESERVED.iter().any(|r| name.eq_ignore_ascii_case(r));
            if reserved {
                tracing::debug!(table, field = %name, "field shadows a base column, ignored");
            }
            !reserved
        })
        .collect();

    let mut report = ExpandReport {
        table: table.to_string(),
        ..ExpandReport::default()
    };

    for field in &fields {
        if schema::ensure_text_column(&mut tx, table, field).await? {
            report.columns_added.push(field.clone());
        }
    }

    for field in &fields {
        let fill = fill_column(&mut tx, table, field)
            .await
            .with_context(|| format!("filling {}.{}", table, field))?;
        tracing::debug!(
            table,
            field = %fill.name,
            updated = fill.updated,
            already_filled = fill.already_filled,
            "field expanded"
        );
        report.fields.push(fill);
    }

    tx.commit().await?;
    tracing::info!(
        table,
        columns_added = report.columns_added.len(),
        updated = report.total_updated(),
        "expand finished"
    );
    Ok(Some(report))
}

/// `mdash expand <table>...`.
pub async fn run_expand(config: &Config, tables: &[String]) -> Result<()> {
    for table in tables {
        ident::validate(table)?;
    }
    let pool = db::connect(config).await?;

    for table in tables {
        match expand_table(&pool, table).await? {
            None => println!("expand {}: no table with a raw column, skipped", table),
            Some(report) => {
                println!("expand {}", table);
                if report.columns_added.is_empty() {
                    println!("  columns added: none");
                } else {
                    println!("  columns added: {}", report.columns_added.join(", "));
                }
                for f in &report.fields {
                    println!(
                        "  {:<24} updated {:>6}   already filled {:>6}",
                        f.name, f.updated, f.already_filled
                    );
                }
                println!("  total updated: {}", report.total_updated());
            }
        }
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
