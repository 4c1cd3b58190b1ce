//! Operator helpers for browsing the remote account: `mdash libraries`
//! lists what the token can see, `mdash fields <id>` shows one library's
//! field definitions, useful when writing an import plan.

use anyhow::Result;
use serde_json::Value;
use std::path::Path;

use crate::config::Config;
use crate::fetcher::EntryFetcher;
use crate::models::{scalar_string, Library};

/// `mdash libraries`.
pub async fn run_libraries(config: &Config, config_path: &Path) -> Result<()> {
    let fetcher = EntryFetcher::from_config(config, config_path)?;
    let libraries = fetcher.list_libraries().await?;
    tracing::debug!(count = libraries.len(), "libraries listed");
    print!("{}", render_libraries(&libraries));
    Ok(())
}

/// `mdash fields <library_id>`.
pub async fn run_fields(config: &Config, config_path: &Path, library_id: &str) -> Result<()> {
    let fetcher = EntryFetcher::from_config(config, config_path)?;
    let fields = fetcher.library_fields(library_id).await?;

    match field_rows(&fields) {
        Some(rows) => {
            println!("{:<8} {:<32} TYPE", "ID", "NAME");
            for (id, name, kind) in rows {
                println!("{:<8} {:<32} {}", id, name, kind);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&fields)?),
    }
    Ok(())
}

fn render_libraries(libraries: &[Library]) -> String {
    let id_width = libraries
        .iter()
        .map(|l| l.id.len())
        .max()
        .unwrap_or(0)
        .max("ID".len());
    let name_width = libraries
        .iter()
        .map(|l| l.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = format!(
        "{:<iw$}  {:<nw$}  TITLE\n",
        "ID",
        "NAME",
        iw = id_width,
        nw = name_width
    );
    for l in libraries {
        out.push_str(&format!(
            "{:<iw$}  {:<nw$}  {}\n",
            l.id,
            l.name,
            l.title,
            iw = id_width,
            nw = name_width
        ));
    }
    out
}

/// `(id, name, type)` rows when the payload is a list of field objects,
/// bare or under `fields`. Anything else is printed as JSON.
fn field_rows(body: &Value) -> Option<Vec<(String, String, String)>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(map) => map.get("fields")?.as_array()?,
        _ => return None,
    };
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let obj = item.as_object()?;
        let name = obj.get("name").and_then(scalar_string)?;
        let id = obj.get("id").and_then(scalar_string).unwrap_or_default();
        let kind = obj.get("type").and_then(scalar_string).unwrap_or_default();
        rows.push((id, name, kind));
    }
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn libraries_table_is_aligned() {
        let out = render_libraries(&[
            Library {
                id: "abc123".into(),
                name: "sex".into(),
                title: "Sex".into(),
            },
            Library {
                id: "z".into(),
                name: "umore".into(),
                title: "Umore".into(),
            },
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "ID      NAME   TITLE");
        assert_eq!(lines[1], "abc123  sex    Sex");
        assert_eq!(lines[2], "z       umore  Umore");
    }

    #[test]
    fn field_rows_accepts_bare_and_wrapped_lists() {
        let bare = json!([{"id": 1, "name": "umore", "type": "text"}]);
        assert_eq!(
            field_rows(&bare),
            Some(vec![("1".into(), "umore".into(), "text".into())])
        );

        let wrapped = json!({"fields": [{"name": "note"}]});
        assert_eq!(
            field_rows(&wrapped),
            Some(vec![(String::new(), "note".into(), String::new())])
        );
    }

    #[test]
    fn unknown_shapes_fall_back_to_json() {
        assert_eq!(field_rows(&json!({"weird": true})), None);
        assert_eq!(field_rows(&json!([{"type": "text"}])), None);
        assert_eq!(field_rows(&json!("x")), None);
    }
}
