//! Calendar builder.
//!
//! Scans a list of `table.column` pairs and materializes one `calendar`
//! row per non-null cell that yields a date, plus the `calendar_range`
//! view the table browser reads:
//!
//! ```text
//! calendar        giorno | ts | tab | col | pk_json | link | pk
//! calendar_range  giorno | ts | tab | col | pk_json | link (absolute) | indirizzo
//! ```
//!
//! `indirizzo` comes from a location table (default `luogo`) joined through
//! a foreign-key column of each scanned table, declared in
//! `[calendar.location_keys]` or found by the `<location_table>_id`
//! convention. Tables without one get a NULL address.
//!
//! The whole rebuild runs in one transaction: on any error the previous
//! calendar and view are left as they were.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::{CalendarConfig, Config};
use crate::db;
use crate::ident::{self, literal, quote};
use crate::models::CalendarEvent;
use crate::schema;

pub const CALENDAR_TABLE: &str = "calendar";
pub const CALENDAR_VIEW: &str = "calendar_range";

/// One `table.column` line of the column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct CalendarOptions {
    /// Prefix of relative links, e.g. `/output`.
    pub base_path: String,
    /// Prepended to relative links in the view.
    pub public_base_url: String,
    pub location_table: String,
    pub address_column: String,
    pub address_suffix: String,
    /// Declared `table → foreign key column`, checked before the naming convention.
    pub location_keys: BTreeMap<String, String>,
}

impl CalendarOptions {
    pub fn from_config(cal: &CalendarConfig) -> Self {
        Self {
            base_path: cal.base_path.trim_end_matches('/').to_string(),
            public_base_url: cal.public_base_url.trim_end_matches('/').to_string(),
            location_table: cal.location_table.clone(),
            address_column: cal.address_column.clone(),
            address_suffix: cal.address_suffix.clone(),
            location_keys: cal.location_keys.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalendarReport {
    /// Entries written per scanned pair.
    pub pairs: Vec<(ColumnRef, u64)>,
    /// Pairs left out, with the reason.
    pub skipped: Vec<(ColumnRef, String)>,
    /// Tables joined to the location table in the view.
    pub enriched: Vec<String>,
}

impl CalendarReport {
    pub fn total(&self) -> u64 {
        self.pairs.iter().map(|(_, n)| n).sum()
    }
}

/// Parse a column list: one `table.column` per line, `#` comments and
/// lines without a dot ignored.
pub fn parse_column_list(text: &str) -> Vec<ColumnRef> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('.'))
        .map(|(t, c)| ColumnRef {
            table: t.trim().to_string(),
            column: c.trim().to_string(),
        })
        .filter(|r| !r.table.is_empty() && !r.column.is_empty())
        .collect()
}

pub fn read_column_list(path: &Path) -> Result<Vec<ColumnRef>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read column list: {}", path.display()))?;
    Ok(parse_column_list(&text))
}

fn digits(s: &[u8]) -> bool {
    s.iter().all(u8::is_ascii_digit)
}

/// Calendar day of a cell, without asking SQLite.
///
/// Accepts a leading `YYYY-MM-DD`, or a leading `DD-MM-YY` read as
/// `20YY-MM-DD`.
pub fn day_from_text(s: &str) -> Option<String> {
    let b = s.as_bytes();
    if b.len() >= 10 && digits(&b[0..4]) && b[4] == b'-' && digits(&b[5..7]) && b[7] == b'-'
        && digits(&b[8..10])
    {
        return Some(s[..10].to_string());
    }
    if b.len() >= 8 && digits(&b[0..2]) && b[2] == b'-' && digits(&b[3..5]) && b[5] == b'-'
        && digits(&b[6..8])
    {
        return Some(format!("20{}-{}-{}", &s[6..8], &s[3..5], &s[0..2]));
    }
    None
}

/// [`day_from_text`], then SQLite's `date()`.
async fn day_of(conn: &mut SqliteConnection, s: &str) -> Result<Option<String>> {
    if let Some(day) = day_from_text(s) {
        return Ok(Some(day));
    }
    let day: Option<String> = sqlx::query_scalar("SELECT date(?)")
        .bind(s)
        .fetch_one(&mut *conn)
        .await?;
    Ok(day)
}

/// A primary key value as read back from SQLite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub column: String,
    /// `typeof()` of the value.
    pub sql_type: String,
    pub text: Option<String>,
}

impl KeyValue {
    fn to_json(&self) -> Value {
        let Some(text) = &self.text else {
            return Value::Null;
        };
        match self.sql_type.as_str() {
            "integer" => text.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            "real" => text
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::String(text.clone()),
        }
    }
}

/// Link back to a row: `{base}/{table}/{pk}` for a single integer key,
/// `{base}/{table}?k=v&...` otherwise. Returns the integer key too.
pub fn row_link(base_path: &str, table: &str, keys: &[KeyValue]) -> (String, Option<i64>) {
    if let [key] = keys {
        if key.sql_type == "integer" {
            if let Some(n) = key.text.as_deref().and_then(|t| t.parse::<i64>().ok()) {
                return (format!("{}/{}/{}", base_path, table, n), Some(n));
            }
        }
    }
    let query: Vec<String> = keys
        .iter()
        .map(|k| format!("{}={}", k.column, k.text.as_deref().unwrap_or("")))
        .collect();
    (format!("{}/{}?{}", base_path, table, query.join("&")), None)
}

fn pk_json(keys: &[KeyValue]) -> String {
    let map: Map<String, Value> = keys.iter().map(|k| (k.column.clone(), k.to_json())).collect();
    Value::Object(map).to_string()
}

/// Columns and key of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
}

impl TableInfo {
    fn column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

/// Existing tables by name.
pub type Catalog = BTreeMap<String, TableInfo>;

/// One branch of the location mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationLink {
    pub table: String,
    pub pk_column: String,
    pub fk_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationJoin {
    pub links: Vec<LocationLink>,
    /// Key column of the location table.
    pub location_pk: String,
    pub address_column: String,
}

/// Decide which scanned tables can be joined to the location table.
///
/// The location table must exist with a single-column key and the address
/// column. A scanned table qualifies with a single-column key and a
/// foreign-key column: the declared one, else `<location_table>_id`.
pub fn location_links(
    catalog: &Catalog,
    scanned: &[String],
    options: &CalendarOptions,
) -> Option<LocationJoin> {
    let location = catalog.get(&options.location_table)?;
    let address_column = location.column(&options.address_column)?.to_string();
    let [location_pk] = location.primary_key.as_slice() else {
        return None;
    };

    let convention = format!("{}_id", options.location_table);
    let mut seen = BTreeSet::new();
    let mut links = Vec::new();
    for table in scanned {
        if table == &options.location_table || !seen.insert(table.as_str()) {
            continue;
        }
        let Some(info) = catalog.get(table) else {
            continue;
        };
        let [pk] = info.primary_key.as_slice() else {
            continue;
        };
        let wanted = options
            .location_keys
            .get(table)
            .map(String::as_str)
            .unwrap_or(&convention);
        let Some(fk) = info.column(wanted) else {
            continue;
        };
        if ident::validate(pk).is_err() || ident::validate(fk).is_err() {
            continue;
        }
        links.push(LocationLink {
            table: table.clone(),
            pk_column: pk.clone(),
            fk_column: fk.to_string(),
        });
    }

    if links.is_empty() {
        return None;
    }
    Some(LocationJoin {
        links,
        location_pk: location_pk.clone(),
        address_column,
    })
}

/// `CREATE VIEW calendar_range`.
pub fn view_sql(join: Option<&LocationJoin>, options: &CalendarOptions) -> String {
    let link = format!(
        "CASE WHEN c.link LIKE 'http%' THEN c.link ELSE {} || c.link END AS link",
        literal(&options.public_base_url)
    );
    let head = format!(
        "CREATE VIEW {} AS\nSELECT c.giorno, c.ts, c.tab, c.col, c.pk_json,\n  {},",
        quote(CALENDAR_VIEW),
        link
    );

    let Some(join) = join else {
        return format!(
            "{}\n  NULL AS indirizzo\nFROM {} c",
            head,
            quote(CALENDAR_TABLE)
        );
    };

    let branches: Vec<String> = join
        .links
        .iter()
        .map(|l| {
            format!(
                "  SELECT {tab} AS tab, {path} AS pk_path, t.{pk} AS pk, t.{fk} AS loc FROM {table} AS t",
                tab = literal(&l.table),
                path = literal(&format!("$.\"{}\"", l.pk_column)),
                pk = quote(&l.pk_column),
                fk = quote(&l.fk_column),
                table = quote(&l.table),
            )
        })
        .collect();

    format!(
        "{head}\n  l.{addr} || {suffix} AS indirizzo\n\
         FROM {cal} c\n\
         LEFT JOIN (\n{branches}\n) m\n  ON c.tab = m.tab AND json_extract(c.pk_json, m.pk_path) = m.pk\n\
         LEFT JOIN {loc} l\n  ON m.loc = l.{loc_pk}",
        head = head,
        addr = quote(&join.address_column),
        suffix = literal(&options.address_suffix),
        cal = quote(CALENDAR_TABLE),
        branches = branches.join("\n  UNION ALL\n"),
        loc = quote(&options.location_table),
        loc_pk = quote(&join.location_pk),
    )
}

async fn load_catalog(conn: &mut SqliteConnection, tables: &BTreeSet<&str>) -> Result<Catalog> {
    let mut catalog = Catalog::new();
    for table in tables {
        if !schema::table_exists(conn, table).await? {
            continue;
        }
        let columns = schema::table_columns(conn, table)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let primary_key = schema::primary_key_columns(conn, table).await?;
        catalog.insert(
            table.to_string(),
            TableInfo {
                columns,
                primary_key,
            },
        );
    }
    Ok(catalog)
}

/// Calendar events of one pair.
async fn scan_pair(
    conn: &mut SqliteConnection,
    pair: &ColumnRef,
    column: &str,
    keys: &[String],
    base_path: &str,
) -> Result<Vec<CalendarEvent>> {
    let key_exprs: Vec<String> = keys
        .iter()
        .map(|k| format!("typeof({0}), CAST({0} AS TEXT)", quote(k)))
        .collect();
    let sql = format!(
        "SELECT CAST({col} AS TEXT), {keys} FROM {table} WHERE {col} IS NOT NULL",
        col = quote(column),
        keys = key_exprs.join(", "),
        table = quote(&pair.table),
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    let mut events = Vec::new();
    for row in &rows {
        let ts: Option<String> = row.try_get(0)?;
        let Some(ts) = ts else { continue };
        let Some(giorno) = day_of(conn, &ts).await? else {
            continue;
        };
        let values: Vec<KeyValue> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| -> Result<KeyValue> {
                Ok(KeyValue {
                    column: k.clone(),
                    sql_type: row.try_get(1 + 2 * i)?,
                    text: row.try_get(2 + 2 * i)?,
                })
            })
            .collect::<Result<_>>()?;
        let (link, pk) = row_link(base_path, &pair.table, &values);
        events.push(CalendarEvent {
            giorno,
            ts,
            tab: pair.table.clone(),
            col: pair.column.clone(),
            pk_json: pk_json(&values),
            link,
            pk,
        });
    }
    Ok(events)
}

/// Drop and rebuild `calendar` and `calendar_range` from `columns`.
pub async fn rebuild(
    pool: &SqlitePool,
    columns: &[ColumnRef],
    options: &CalendarOptions,
) -> Result<CalendarReport> {
    let mut tx = pool.begin().await?;
    let mut report = CalendarReport::default();

    sqlx::query(&format!("DROP VIEW IF EXISTS {}", quote(CALENDAR_VIEW)))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote(CALENDAR_TABLE)))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!(
        r#"
        CREATE TABLE {} (
            giorno  TEXT NOT NULL,
            ts      TEXT NOT NULL,
            tab     TEXT NOT NULL,
            col     TEXT NOT NULL,
            pk_json TEXT NOT NULL,
            link    TEXT NOT NULL,
            pk      INTEGER
        )
        "#,
        quote(CALENDAR_TABLE)
    ))
    .execute(&mut *tx)
    .await?;

    let mut wanted: BTreeSet<&str> = columns.iter().map(|c| c.table.as_str()).collect();
    wanted.insert(options.location_table.as_str());
    let catalog = load_catalog(&mut tx, &wanted).await?;

    for pair in columns {
        let skip = |reason: &str| {
            tracing::info!(table = %pair.table, column = %pair.column, "skipped: {}", reason);
            (pair.clone(), reason.to_string())
        };
        if ident::validate(&pair.table).is_err() || ident::validate(&pair.column).is_err() {
            report.skipped.push(skip("invalid name"));
            continue;
        }
        let Some(info) = catalog.get(&pair.table) else {
            report.skipped.push(skip("table not found"));
            continue;
        };
        let Some(column) = info.column(&pair.column) else {
            report.skipped.push(skip("column not found"));
            continue;
        };
        if info.primary_key.is_empty() {
            report.skipped.push(skip("no primary key and no rowid"));
            continue;
        }

        let events = scan_pair(&mut tx, pair, column, &info.primary_key, &options.base_path)
            .await
            .with_context(|| format!("scanning {}.{}", pair.table, pair.column))?;
        for e in &events {
            sqlx::query(&format!(
                "INSERT INTO {} (giorno, ts, tab, col, pk_json, link, pk) VALUES (?, ?, ?, ?, ?, ?, ?)",
                quote(CALENDAR_TABLE)
            ))
            .bind(&e.giorno)
            .bind(&e.ts)
            .bind(&e.tab)
            .bind(&e.col)
            .bind(&e.pk_json)
            .bind(&e.link)
            .bind(e.pk)
            .execute(&mut *tx)
            .await?;
        }
        report.pairs.push((pair.clone(), events.len() as u64));
    }

    let scanned: Vec<String> = report.pairs.iter().map(|(p, _)| p.table.clone()).collect();
    let join = location_links(&catalog, &scanned, options);
    if let Some(j) = &join {
        report.enriched = j.links.iter().map(|l| l.table.clone()).collect();
    }
    sqlx::query(&view_sql(join.as_ref(), options))
        .execute(&mut *tx)
        .await
        .context("creating calendar_range")?;

    tx.commit().await?;
    Ok(report)
}

/// `mdash calendar`.
pub async fn run_calendar(
    config: &Config,
    columns_override: Option<PathBuf>,
    base_path_override: Option<String>,
) -> Result<()> {
    let list_path = columns_override.unwrap_or_else(|| config.calendar.columns.clone());
    let mut options = CalendarOptions::from_config(&config.calendar);
    if let Some(base) = base_path_override {
        options.base_path = base.trim_end_matches('/').to_string();
    }

    let result = async {
        let columns = read_column_list(&list_path)?;
        let pool = db::connect(config).await?;
        let report = rebuild(&pool, &columns, &options).await;
        pool.close().await;
        report
    }
    .await;

    let report = match result {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("calendar rebuild failed: {:#}", e);
            return Err(e);
        }
    };

    println!("calendar rebuilt from {}", list_path.display());
    for (pair, n) in &report.pairs {
        println!("  {:<32} {:>8}", format!("{}.{}", pair.table, pair.column), n);
    }
    for (pair, reason) in &report.skipped {
        println!("  {:<32} skipped ({})", format!("{}.{}", pair.table, pair.column), reason);
    }
    println!("  entries: {}", report.total());
    if report.enriched.is_empty() {
        println!("  {}: no location mapping", CALENDAR_VIEW);
    } else {
        println!(
            "  {}: address from {} via {}",
            CALENDAR_VIEW,
            options.location_table,
            report.enriched.join(", ")
        );
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;

    fn options() -> CalendarOptions {
        CalendarOptions {
            base_path: "/output".into(),
            public_base_url: "https://dash.example".into(),
            location_table: "luogo".into(),
            address_column: "indirizzo".into(),
            address_suffix: ", Copenhagen".into(),
            location_keys: BTreeMap::new(),
        }
    }

    async fn pool(tmp: &TempDir) -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(tmp.path().join("cal.db"))
                    .create_if_missing(true),
            )
            .await
            .unwrap()
    }

    async fn exec(pool: &SqlitePool, sql: &str) {
        sqlx::query(sql).execute(pool).await.unwrap();
    }

    fn pairs(text: &str) -> Vec<ColumnRef> {
        parse_column_list(text)
    }

    #[test]
    fn column_list_parsing() {
        let refs = pairs("# dates\n\nsex.inizio\n ex_super.data \nbogus\n.x\n");
        assert_eq!(
            refs,
            vec![
                ColumnRef {
                    table: "sex".into(),
                    column: "inizio".into()
                },
                ColumnRef {
                    table: "ex_super".into(),
                    column: "data".into()
                },
            ]
        );
    }

    #[test]
    fn day_prefixes() {
        assert_eq!(day_from_text("2024-05-01 10:00").as_deref(), Some("2024-05-01"));
        assert_eq!(day_from_text("2024-05-01T10:00:00+00:00").as_deref(), Some("2024-05-01"));
        assert_eq!(day_from_text("01-05-24").as_deref(), Some("2024-05-01"));
        assert_eq!(day_from_text("01-05-24 21:00").as_deref(), Some("2024-05-01"));
        assert_eq!(day_from_text("yesterday"), None);
        assert_eq!(day_from_text("2024/05/01"), None);
    }

    #[test]
    fn links() {
        let int_key = |n: &str| KeyValue {
            column: "id".into(),
            sql_type: "integer".into(),
            text: Some(n.into()),
        };
        let (link, pk) = row_link("/output", "sex", &[int_key("7")]);
        assert!(link.ends_with("/sex/7"));
        assert_eq!(pk, Some(7));

        let keys = vec![
            KeyValue {
                column: "giorno".into(),
                sql_type: "text".into(),
                text: Some("2024-05-01".into()),
            },
            KeyValue {
                column: "n".into(),
                sql_type: "integer".into(),
                text: Some("2".into()),
            },
        ];
        let (link, pk) = row_link("/output", "pillole", &keys);
        assert_eq!(link, "/output/pillole?giorno=2024-05-01&n=2");
        assert_eq!(pk, None);
        assert_eq!(pk_json(&keys), r#"{"giorno":"2024-05-01","n":2}"#);
    }

    fn catalog() -> Catalog {
        let info = |cols: &[&str], pk: &[&str]| TableInfo {
            columns: cols.iter().map(|s| s.to_string()).collect(),
            primary_key: pk.iter().map(|s| s.to_string()).collect(),
        };
        Catalog::from([
            ("luogo".to_string(), info(&["id", "indirizzo"], &["id"])),
            ("sex".to_string(), info(&["id", "inizio", "luogo_id"], &["id"])),
            ("ex_super".to_string(), info(&["id", "data", "posto"], &["id"])),
            ("umore".to_string(), info(&["id", "tempo"], &["id"])),
            ("pair".to_string(), info(&["a", "b", "luogo_id"], &["a", "b"])),
        ])
    }

    #[test]
    fn location_links_by_convention_and_declaration() {
        let scanned: Vec<String> = ["sex", "ex_super", "umore", "pair", "sex", "ghost"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let join = location_links(&catalog(), &scanned, &options()).unwrap();
        let tables: Vec<_> = join.links.iter().map(|l| l.table.as_str()).collect();
        assert_eq!(tables, vec!["sex"]);
        assert_eq!(join.location_pk, "id");

        let mut declared = options();
        declared.location_keys.insert("ex_super".into(), "posto".into());
        let join = location_links(&catalog(), &scanned, &declared).unwrap();
        let tables: Vec<_> = join.links.iter().map(|l| l.table.as_str()).collect();
        assert_eq!(tables, vec!["sex", "ex_super"]);
        assert_eq!(join.links[1].fk_column, "posto");
    }

    #[test]
    fn no_location_table_means_no_join() {
        let mut cat = catalog();
        cat.remove("luogo");
        assert!(location_links(&cat, &["sex".to_string()], &options()).is_none());

        let sql = view_sql(None, &options());
        assert!(sql.contains("NULL AS indirizzo"));
        assert!(sql.contains("'https://dash.example' || c.link"));
    }

    #[tokio::test]
    async fn rebuild_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        exec(&pool, "CREATE TABLE luogo (id INTEGER PRIMARY KEY, indirizzo TEXT)").await;
        exec(&pool, "INSERT INTO luogo VALUES (1, 'Nørrebrogade 1')").await;
        exec(
            &pool,
            "CREATE TABLE sex (id INTEGER PRIMARY KEY, inizio TEXT, luogo_id INTEGER)",
        )
        .await;
        exec(
            &pool,
            "INSERT INTO sex VALUES (7, '2024-05-01 10:00', 1), (8, '01-05-24', NULL), (9, NULL, 1), (10, 'mai', 1)",
        )
        .await;
        exec(&pool, "CREATE TABLE pillole (giorno TEXT, n INTEGER, PRIMARY KEY (giorno, n))").await;
        exec(&pool, "INSERT INTO pillole VALUES ('2024-05-02', 1)").await;

        let cols = pairs("sex.inizio\npillole.giorno\nsex.missing\nghost.x\n");
        let report = rebuild(&pool, &cols, &options()).await.unwrap();
        assert_eq!(report.total(), 3);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.enriched, vec!["sex"]);

        let rows: Vec<(String, String, String, Option<i64>)> = sqlx::query_as(
            "SELECT giorno, tab, link, pk FROM calendar ORDER BY tab, link",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            rows,
            vec![
                (
                    "2024-05-02".to_string(),
                    "pillole".to_string(),
                    "/output/pillole?giorno=2024-05-02&n=1".to_string(),
                    None
                ),
                ("2024-05-01".to_string(), "sex".to_string(), "/output/sex/7".to_string(), Some(7)),
                ("2024-05-01".to_string(), "sex".to_string(), "/output/sex/8".to_string(), Some(8)),
            ]
        );

        let view: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT link, indirizzo FROM calendar_range ORDER BY link",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            view,
            vec![
                (
                    "https://dash.example/output/pillole?giorno=2024-05-02&n=1".to_string(),
                    None
                ),
                (
                    "https://dash.example/output/sex/7".to_string(),
                    Some("Nørrebrogade 1, Copenhagen".to_string())
                ),
                ("https://dash.example/output/sex/8".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_calendar() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        exec(&pool, "CREATE TABLE sex (id INTEGER PRIMARY KEY, inizio TEXT)").await;
        exec(&pool, "INSERT INTO sex VALUES (1, '2024-01-01')").await;
        rebuild(&pool, &pairs("sex.inizio"), &options()).await.unwrap();

        // The view name is taken by an index: the last step of the rebuild fails.
        exec(&pool, "INSERT INTO sex VALUES (2, '2024-01-02')").await;
        exec(&pool, "DROP VIEW calendar_range").await;
        exec(&pool, "CREATE INDEX calendar_range ON sex (inizio)").await;

        assert!(rebuild(&pool, &pairs("sex.inizio"), &options()).await.is_err());
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM calendar")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 1);
    }
}
