use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mdash_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mdash"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        config_dir.join("batch.ini"),
        "[sex]\nmode = cloud\nlibrary_id = SEX1\ntable = sex\ntempo_col = inizio\n\n\
         [old]\nmode = local\nlibrary_id = OLD1\ntable = vecchio\n",
    )
    .unwrap();
    fs::write(
        config_dir.join("calendar_columns.txt"),
        "# table.column per line\nsex.inizio\nghost.tempo\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/dash.sqlite"

[import]
plan = "{root}/config/batch.ini"

[calendar]
columns = "{root}/config/calendar_columns.txt"
base_path = "/output"
public_base_url = "https://dash.example"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("mdash.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mdash(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mdash_binary();
    let workdir = config_path.parent().unwrap().parent().unwrap();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .current_dir(workdir)
        .env_remove("MEMENTO_TOKEN")
        .env_remove("MEMENTO_API_URL")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mdash binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn db_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("data/dash.sqlite")
}

/// Insert rows into `sex` as if an import had run.
fn seed_sex(config_path: &Path, rows: &[(&str, &str, &str)]) {
    let path = db_path(config_path);
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        use sqlx::ConnectOptions;
        let mut conn = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&path)
            .connect()
            .await
            .unwrap();
        for (ext_id, inizio, raw) in rows {
            sqlx::query("INSERT INTO sex (ext_id, inizio, raw) VALUES (?, ?, ?)")
                .bind(*ext_id)
                .bind(*inizio)
                .bind(*raw)
                .execute(&mut conn)
                .await
                .unwrap();
        }
    });
}

#[test]
fn test_init_creates_database_and_tables() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mdash(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("table sex ready"));
    assert!(!stdout.contains("vecchio"), "inactive source prepared: {}", stdout);
    assert!(stdout.contains("ok"));
    assert!(db_path(&config_path).exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_mdash(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_mdash(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_expand_fills_columns() {
    let (_tmp, config_path) = setup_test_env();
    run_mdash(&config_path, &["init"]);
    seed_sex(
        &config_path,
        &[
            ("1", "2024-03-01T21:00:00Z", r#"{"fields":[{"name":"partner","value":"A"}]}"#),
            ("2", "2024-03-02T22:00:00Z", r#"{"fields":[{"name":"partner","value":"B"}]}"#),
        ],
    );

    let (stdout, stderr, success) = run_mdash(&config_path, &["expand", "sex"]);
    assert!(success, "expand failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("columns added: partner"));
    assert!(stdout.contains("total updated: 2"));

    let (stdout, _, success) = run_mdash(&config_path, &["expand", "sex"]);
    assert!(success);
    assert!(stdout.contains("total updated: 0"));
}

#[test]
fn test_expand_missing_table_is_skipped() {
    let (_tmp, config_path) = setup_test_env();
    run_mdash(&config_path, &["init"]);

    let (stdout, stderr, success) = run_mdash(&config_path, &["expand", "ghost"]);
    assert!(success, "expand failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("skipped"));
}

#[test]
fn test_expand_rejects_bad_table_name() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success) = run_mdash(&config_path, &["expand", "sex; DROP TABLE sex"]);
    assert!(!success);
}

#[test]
fn test_calendar_and_verify() {
    let (_tmp, config_path) = setup_test_env();
    run_mdash(&config_path, &["init"]);
    seed_sex(
        &config_path,
        &[
            ("1", "2024-03-01T21:00:00Z", "{}"),
            ("2", "2024-03-02T22:00:00Z", "{}"),
            ("3", "not a date", "{}"),
        ],
    );

    let (stdout, stderr, success) = run_mdash(&config_path, &["calendar"]);
    assert!(success, "calendar failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("entries: 2"), "stdout={}", stdout);
    assert!(stdout.contains("ghost.tempo"));
    assert!(stdout.contains("skipped (table not found)"));

    let (stdout, stderr, success) = run_mdash(&config_path, &["verify"]);
    assert!(success, "verify failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Integrity:   ok"));
    assert!(stdout.contains("calendar:       OK (2 rows, latest 2024-03-02)"));
    assert!(stdout.contains("calendar_range: OK (2 rows)"));
}

#[test]
fn test_verify_reports_missing_calendar() {
    let (_tmp, config_path) = setup_test_env();
    run_mdash(&config_path, &["init"]);

    let (stdout, _, success) = run_mdash(&config_path, &["verify"]);
    assert!(success);
    assert!(stdout.contains("calendar:       MISSING"));
}

#[test]
fn test_calendar_missing_column_list_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) =
        run_mdash(&config_path, &["calendar", "--columns", "/nonexistent/cols.txt"]);
    assert!(!success);
    assert!(stderr.contains("column list"), "stderr={}", stderr);
}

#[test]
fn test_libraries_requires_token() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_mdash(&config_path, &["libraries"]);
    assert!(!success);
    assert!(stderr.contains("token missing"), "stderr={}", stderr);
}

#[test]
fn test_import_requires_token() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_mdash(
        &config_path,
        &["import", "--source", "nope", "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("token missing"), "stderr={}", stderr);
}

#[test]
fn test_missing_config() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_mdash(&tmp.path().join("config/absent.toml"), &["verify"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
