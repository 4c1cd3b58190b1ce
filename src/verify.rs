//! Database health check.
//!
//! Runs SQLite's integrity check, lists what the database holds and
//! confirms the calendar artifacts exist. Used by `mdash verify` after an
//! import or calendar rebuild.

use anyhow::{bail, Result};
use sqlx::{Row, SqliteConnection};

use crate::calendar::{CALENDAR_TABLE, CALENDAR_VIEW};
use crate::config::Config;
use crate::db;
use crate::ident::quote;
use crate::schema;

/// One table or view in `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
    /// `table` or `view`.
    pub kind: String,
    /// Row count; only computed for tables.
    pub rows: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// First line of `PRAGMA integrity_check`, `ok` when healthy.
    pub integrity: String,
    pub objects: Vec<StoredObject>,
    pub calendar_rows: Option<i64>,
    pub calendar_range_rows: Option<i64>,
    /// Latest `giorno` in the calendar.
    pub latest_day: Option<String>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.integrity == "ok"
    }
}

/// Inspect the database behind `conn`.
pub async fn check(conn: &mut SqliteConnection) -> Result<VerifyReport> {
    let integrity: Vec<String> = sqlx::query_scalar("PRAGMA integrity_check")
        .fetch_all(&mut *conn)
        .await?;
    let integrity = match integrity.as_slice() {
        [] => "no result".to_string(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{} (+{} more)", first, rest.len()),
    };

    let rows = sqlx::query(
        "SELECT name, type FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY type, name",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut objects = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.get("name");
        let kind: String = row.get("type");
        let rows = if kind == "table" {
            Some(count_rows(conn, &name).await?)
        } else {
            None
        };
        objects.push(StoredObject { name, kind, rows });
    }

    let calendar_rows = if schema::table_exists(conn, CALENDAR_TABLE).await? {
        Some(count_rows(conn, CALENDAR_TABLE).await?)
    } else {
        None
    };
    let calendar_range_rows = if schema::view_exists(conn, CALENDAR_VIEW).await? {
        // A view over a dropped table fails to count; report it as missing.
        match count_rows(conn, CALENDAR_VIEW).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!("{} is not readable: {:#}", CALENDAR_VIEW, e);
                None
            }
        }
    } else {
        None
    };
    let latest_day = match calendar_rows {
        Some(_) => sqlx::query_scalar(&format!(
            "SELECT MAX(giorno) FROM {}",
            quote(CALENDAR_TABLE)
        ))
        .fetch_one(&mut *conn)
        .await?,
        None => None,
    };

    Ok(VerifyReport {
        integrity,
        objects,
        calendar_rows,
        calendar_range_rows,
        latest_day,
    })
}

async fn count_rows(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    let n = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote(name)))
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}

/// `mdash verify`: print the report, fail when the integrity check does.
pub async fn run_verify(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let report = check(&mut conn).await?;
    drop(conn);
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("mdash - Database Check");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Integrity:   {}", report.integrity);

    if !report.objects.is_empty() {
        println!();
        println!("  {:<32} {:<6} {:>8}", "NAME", "KIND", "ROWS");
        println!("  {}", "-".repeat(48));
        for o in &report.objects {
            let rows = o.rows.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
            println!("  {:<32} {:<6} {:>8}", o.name, o.kind, rows);
        }
    }

    println!();
    match report.calendar_rows {
        Some(n) => println!(
            "  {}:       OK ({} rows, latest {})",
            CALENDAR_TABLE,
            n,
            report.latest_day.as_deref().unwrap_or("none")
        ),
        None => println!("  {}:       MISSING", CALENDAR_TABLE),
    }
    match report.calendar_range_rows {
        Some(n) => println!("  {}: OK ({} rows)", CALENDAR_VIEW, n),
        None => println!("  {}: MISSING", CALENDAR_VIEW),
    }
    println!();

    if !report.is_healthy() {
        bail!("Integrity check failed: {}", report.integrity);
    }
    println!("ok");
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
