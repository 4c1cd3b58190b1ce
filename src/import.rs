//! Batch import of Memento libraries into SQLite.
//!
//! For every active source of the plan: fetch all entries, derive their
//! `ext_id`, normalize the timestamp and `INSERT OR IGNORE` them into the
//! source table. Each source is written in its own transaction, so a
//! failing source leaves earlier ones committed.
//!
//! Row-level problems never abort a source:
//!
//! - no usable timestamp → skipped and counted (the time column is `NOT NULL`)
//! - database refuses the row → one retry with every value bound as text,
//!   then counted as failed

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::db;
use crate::fetcher::EntryFetcher;
use crate::ident::quote;
use crate::models::{scalar_string, ImportCounts};
use crate::plan::{IdMode, ImportPlan, SourceSpec};
use crate::progress::{ImportProgressEvent, ImportProgressReporter, ProgressMode};
use crate::schema::{self, EXT_ID, RAW};
use crate::timestamp;

/// Length of a content-hash `ext_id`, in hex characters.
pub const HASH_ID_LEN: usize = 32;

const ID_KEYS: [&str; 3] = ["id", "_id", "uuid"];

/// Emit a storing event every this many entries.
const PROGRESS_EVERY: u64 = 50;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub page_size: usize,
    /// Only import the source with this name (or table).
    pub source: Option<String>,
    /// Fetch and classify, write nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    pub table: String,
    pub library_id: String,
    pub counts: ImportCounts,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub sources: Vec<SourceReport>,
    /// Names of sources skipped because their mode is not `cloud`.
    pub inactive: Vec<String>,
}

impl ImportReport {
    pub fn total_inserted(&self) -> u64 {
        self.sources.iter().map(|s| s.counts.inserted).sum()
    }
}

/// External id of an entry before it is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtId {
    Int(i64),
    Text(String),
}

impl ExtId {
    pub fn as_text(&self) -> String {
        match self {
            ExtId::Int(n) => n.to_string(),
            ExtId::Text(s) => s.clone(),
        }
    }
}

/// Derive the `ext_id` of `entry` for `mode`.
///
/// In [`IdMode::Id`] an entry without `id`/`_id`/`uuid` falls back to the
/// content hash so it can still be deduplicated.
pub fn external_id(entry: &Map<String, Value>, mode: IdMode) -> ExtId {
    if mode == IdMode::Id {
        for key in ID_KEYS {
            match entry.get(key) {
                Some(Value::Number(n)) if n.is_i64() => {
                    if let Some(v) = n.as_i64() {
                        return ExtId::Int(v);
                    }
                }
                Some(v) => {
                    if let Some(text) = scalar_string(v) {
                        return ExtId::Text(text);
                    }
                }
                None => {}
            }
        }
        tracing::warn!("entry has no id, falling back to content hash");
    }
    ExtId::Text(content_hash(&Value::Object(entry.clone())))
}

/// First [`HASH_ID_LEN`] hex chars of the SHA-256 of the canonical JSON.
pub fn content_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_ID_LEN);
    hex
}

/// JSON with object keys sorted recursively and `", "` / `": "` separators,
/// the layout the earlier import scripts hashed, so ids stay stable across
/// re-imports of old databases.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push_str(": ");
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Insert `entries` into the table of `spec`. The table must exist.
///
/// With `dry_run` nothing is written: entries are classified and checked
/// against existing `ext_id`s only.
pub async fn import_entries(
    conn: &mut SqliteConnection,
    spec: &SourceSpec,
    entries: &[Value],
    dry_run: bool,
    progress: &dyn ImportProgressReporter,
) -> Result<ImportCounts> {
    let insert_sql = format!(
        "INSERT OR IGNORE INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
        quote(&spec.table),
        quote(EXT_ID),
        quote(&spec.tempo_col),
        quote(RAW)
    );
    let exists_sql = format!(
        "SELECT 1 FROM {} WHERE {} = ? LIMIT 1",
        quote(&spec.table),
        quote(EXT_ID)
    );
    let can_probe = !dry_run || schema::table_exists(conn, &spec.table).await?;

    let total = entries.len() as u64;
    let mut counts = ImportCounts {
        fetched: total,
        ..ImportCounts::default()
    };

    for (i, entry) in entries.iter().enumerate() {
        let n = i as u64 + 1;
        if n % PROGRESS_EVERY == 0 {
            progress.report(ImportProgressEvent::Storing {
                source: spec.name.clone(),
                n,
                total,
            });
        }

        let Some(obj) = entry.as_object() else {
            tracing::warn!(source = %spec.name, "entry #{} is not an object, skipped", n);
            counts.failed += 1;
            continue;
        };

        let ext_id = external_id(obj, spec.id_mode);
        let Some(tempo) =
            timestamp::pick_time_field(obj, &spec.tempo_col).and_then(timestamp::normalize)
        else {
            tracing::debug!(source = %spec.name, ext_id = %ext_id.as_text(), "no usable timestamp");
            counts.skipped += 1;
            continue;
        };
        let raw = serde_json::to_string(entry)?;

        if dry_run {
            let present = if can_probe {
                sqlx::query_scalar::<_, i64>(&exists_sql)
                    .bind(ext_id.as_text())
                    .fetch_optional(&mut *conn)
                    .await
                    .ok()
                    .flatten()
                    .is_some()
            } else {
                false
            };
            if present {
                counts.ignored += 1;
            } else {
                counts.inserted += 1;
            }
            continue;
        }

        let first = match &ext_id {
            ExtId::Int(v) => sqlx::query(&insert_sql).bind(*v),
            ExtId::Text(s) => sqlx::query(&insert_sql).bind(s.clone()),
        }
        .bind(&tempo)
        .bind(&raw)
        .execute(&mut *conn)
        .await;

        let result = match first {
            Err(sqlx::Error::Database(e)) => {
                tracing::debug!(source = %spec.name, "insert refused ({}), retrying as text", e);
                sqlx::query(&insert_sql)
                    .bind(ext_id.as_text())
                    .bind(tempo.clone())
                    .bind(raw.clone())
                    .execute(&mut *conn)
                    .await
            }
            other => other,
        };

        match result {
            Ok(done) if done.rows_affected() > 0 => counts.inserted += 1,
            Ok(_) => counts.ignored += 1,
            Err(sqlx::Error::Database(e)) => {
                tracing::warn!(source = %spec.name, ext_id = %ext_id.as_text(), "row skipped: {}", e);
                counts.failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    progress.report(ImportProgressEvent::Storing {
        source: spec.name.clone(),
        n: total,
        total,
    });
    Ok(counts)
}

/// Create the table of `spec` (or bring an old one up to the base schema).
pub async fn prepare_table(conn: &mut SqliteConnection, spec: &SourceSpec) -> Result<()> {
    schema::ensure_base_table(conn, &spec.table, &spec.tempo_col).await?;
    schema::ensure_external_id_column(conn, &spec.table).await?;
    if schema::ensure_text_column(conn, &spec.table, &spec.tempo_col).await? {
        tracing::info!(table = %spec.table, "added time column {}", spec.tempo_col);
    }
    if schema::ensure_text_column(conn, &spec.table, RAW).await? {
        tracing::info!(table = %spec.table, "added {} column", RAW);
    }
    Ok(())
}

/// Import one source: fetch, then write in a single transaction.
pub async fn import_source(
    pool: &SqlitePool,
    fetcher: &EntryFetcher,
    spec: &SourceSpec,
    options: &ImportOptions,
    progress: &dyn ImportProgressReporter,
) -> Result<ImportCounts> {
    progress.report(ImportProgressEvent::Fetching {
        source: spec.name.clone(),
        library: spec.library_id.clone(),
    });

    let mut entries = fetcher
        .fetch_all_entries(&spec.library_id, options.page_size, spec.limit)
        .await
        .with_context(|| format!("fetching library {} for '{}'", spec.library_id, spec.name))?;
    if let Some(cap) = spec.limit {
        entries.truncate(cap);
    }

    let counts = if options.dry_run {
        let mut conn = pool.acquire().await?;
        import_entries(&mut conn, spec, &entries, true, progress).await?
    } else {
        let mut tx = pool.begin().await?;
        prepare_table(&mut tx, spec).await?;
        let counts = import_entries(&mut tx, spec, &entries, false, progress).await?;
        tx.commit().await?;
        counts
    };

    progress.report(ImportProgressEvent::Finished {
        source: spec.name.clone(),
        inserted: counts.inserted,
        ignored: counts.ignored,
        skipped: counts.skipped + counts.failed,
    });
    Ok(counts)
}

/// Import every active source of `plan`, in plan order.
pub async fn import_plan(
    pool: &SqlitePool,
    fetcher: &EntryFetcher,
    plan: &ImportPlan,
    options: &ImportOptions,
    progress: &dyn ImportProgressReporter,
) -> Result<ImportReport> {
    let selected: Vec<&SourceSpec> = match &options.source {
        Some(name) => match plan.find(name) {
            Some(spec) => vec![spec],
            None => bail!("No source named '{}' in the import plan", name),
        },
        None => plan.sources.iter().collect(),
    };

    let mut report = ImportReport::default();
    for spec in selected {
        if !spec.is_active() {
            tracing::info!(source = %spec.name, "mode is not cloud, skipped");
            report.inactive.push(spec.name.clone());
            continue;
        }
        let counts = import_source(pool, fetcher, spec, options, progress).await?;
        report.sources.push(SourceReport {
            name: spec.name.clone(),
            table: spec.table.clone(),
            library_id: spec.library_id.clone(),
            counts,
        });
    }
    Ok(report)
}

/// Resolve the plan path: command line first, then `[import].plan`.
pub fn plan_path(config: &Config, cli_plan: Option<PathBuf>) -> Result<PathBuf> {
    match cli_plan.or_else(|| config.import.plan.clone()) {
        Some(path) => Ok(path),
        None => bail!("No import plan: pass --plan or set [import].plan in the config"),
    }
}

/// `mdash import`.
pub async fn run_import(
    config: &Config,
    config_path: &Path,
    cli_plan: Option<PathBuf>,
    source: Option<String>,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let plan_file = plan_path(config, cli_plan)?;
    let plan = ImportPlan::load(&plan_file)?;

    let fetcher = EntryFetcher::from_config(config, config_path)?;

    let pool = db::connect(config).await?;
    let options = ImportOptions {
        page_size: config.import.page_size,
        source,
        dry_run,
    };
    let reporter = progress.reporter();
    let report = import_plan(&pool, &fetcher, &plan, &options, reporter.as_ref()).await?;

    for s in &report.sources {
        let c = &s.counts;
        if dry_run {
            println!("import {} (dry-run)", s.name);
        } else {
            println!("import {}", s.name);
        }
        println!("  library: {} -> table {}", s.library_id, s.table);
        println!("  fetched: {} entries", c.fetched);
        println!("  inserted: {} / {}", c.inserted, c.fetched);
        println!("  duplicates: {}", c.ignored);
        println!("  no timestamp: {}", c.skipped);
        println!("  failed: {}", c.failed);
    }
    for name in &report.inactive {
        println!("import {}: skipped (mode is not cloud)", name);
    }
    println!("total inserted: {}", report.total_inserted());
    println!("ok");

    pool.close().await;
    Ok(())
}
