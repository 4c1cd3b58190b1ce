//! Import plan loading.
//!
//! A plan lists the Memento libraries to import and where each one lands.
//! Two file formats are accepted and normalize to the same [`SourceSpec`]:
//!
//! ```ini
//! ; batch.ini: one section per source
//! [sex]
//! mode = cloud
//! library_id = AbCdEf123
//! table = sex
//! id_mode = id
//! tempo_col = inizio
//! limit = 500
//! ```
//!
//! ```yaml
//! # batch.yaml: a list, a name → source mapping, or either under `sources:`
//! sources:
//!   - library_id: AbCdEf123
//!     table: sex
//!     tempo_col: inizio
//! ```
//!
//! Only `mode = cloud` sources are imported; the others are kept in the
//! plan so `mdash import` can report them as skipped.

use anyhow::{bail, Context, Result};
use config::FileFormat;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::ident;
use crate::schema::{EXT_ID, RAW};

/// How the `ext_id` of an entry is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    /// The entry's own identifier (`id`, `_id` or `uuid`).
    Id,
    /// A truncated SHA-256 of the canonical JSON of the whole entry.
    Hash,
}

impl IdMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "id" => Ok(IdMode::Id),
            "hash" => Ok(IdMode::Hash),
            other => bail!("unknown id_mode '{}' (expected 'id' or 'hash')", other),
        }
    }
}

impl fmt::Display for IdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdMode::Id => write!(f, "id"),
            IdMode::Hash => write!(f, "hash"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecMode {
    Cloud,
    Other(String),
}

impl ExecMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "cloud" => ExecMode::Cloud,
            other => ExecMode::Other(other.to_string()),
        }
    }
}

/// One source of an import plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Section name (INI), mapping key or table name (YAML).
    pub name: String,
    pub library_id: String,
    pub table: String,
    /// Kept for compatibility; entries are always read from `/entries`.
    pub form: Option<String>,
    pub id_mode: IdMode,
    pub tempo_col: String,
    pub limit: Option<usize>,
    pub mode: ExecMode,
}

impl SourceSpec {
    pub fn is_active(&self) -> bool {
        self.mode == ExecMode::Cloud
    }
}

/// Ordered list of sources, immutable for the duration of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportPlan {
    pub sources: Vec<SourceSpec>,
}

impl ImportPlan {
    /// Load a plan, picking the parser from the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let raw = match ext.as_deref() {
            Some("ini") => read_ini(path)?,
            Some("yaml" | "yml") => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
                parse_yaml(&text)?
            }
            _ => bail!(
                "Unsupported plan format: {} (expected .ini, .yaml or .yml)",
                path.display()
            ),
        };

        let sources = raw
            .into_iter()
            .map(|(name, src)| {
                src.into_spec(&name)
                    .with_context(|| format!("{}: source '{}'", path.display(), name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sources })
    }

    pub fn active(&self) -> impl Iterator<Item = &SourceSpec> {
        self.sources.iter().filter(|s| s.is_active())
    }

    /// Source by name, falling back to table name.
    pub fn find(&self, name: &str) -> Option<&SourceSpec> {
        self.sources
            .iter()
            .find(|s| s.name == name)
            .or_else(|| self.sources.iter().find(|s| s.table == name))
    }
}

/// INI values are always text; YAML ones may be numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn text(&self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSource {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    library_id: Option<Scalar>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    form: Option<String>,
    #[serde(default)]
    id_mode: Option<String>,
    #[serde(default)]
    tempo_col: Option<String>,
    #[serde(default)]
    limit: Option<Scalar>,
}

impl RawSource {
    fn into_spec(self, name: &str) -> Result<SourceSpec> {
        let library_id = self
            .library_id
            .map(|s| s.text())
            .filter(|s| !s.is_empty())
            .context("missing library_id")?;
        let table = self
            .table
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .context("missing table")?;
        ident::validate(&table).context("table")?;

        let tempo_col = self
            .tempo_col
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "tempo".to_string());
        ident::validate(&tempo_col).context("tempo_col")?;
        if ["id", EXT_ID, RAW]
            .iter()
            .any(|reserved| tempo_col.eq_ignore_ascii_case(reserved))
        {
            bail!("tempo_col '{}' clashes with a base column", tempo_col);
        }

        let limit = match self.limit.as_ref().map(Scalar::text).as_deref() {
            None | Some("") => None,
            Some(text) => {
                let n: usize = text
                    .parse()
                    .with_context(|| format!("limit must be a non-negative integer, got '{}'", text))?;
                // 0 means "no cap"
                (n > 0).then_some(n)
            }
        };

        Ok(SourceSpec {
            name: self.name.unwrap_or_else(|| name.to_string()),
            library_id,
            table,
            form: self.form.filter(|f| !f.trim().is_empty()),
            id_mode: IdMode::parse(self.id_mode.as_deref().unwrap_or(""))?,
            tempo_col,
            limit,
            mode: ExecMode::parse(self.mode.as_deref().unwrap_or("")),
        })
    }
}

fn read_ini(path: &Path) -> Result<Vec<(String, RawSource)>> {
    let name = path
        .to_str()
        .with_context(|| format!("Non UTF-8 plan path: {}", path.display()))?;
    let sections: IndexMap<String, RawSource> = config::Config::builder()
        .add_source(config::File::new(name, FileFormat::Ini))
        .build()
        .and_then(|c| c.try_deserialize())
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
    Ok(sections.into_iter().collect())
}

fn parse_yaml(text: &str) -> Result<Vec<(String, RawSource)>> {
    let doc: serde_yaml::Value = serde_yaml::from_str(text).context("Invalid YAML plan")?;
    let body = match doc.get("sources") {
        Some(inner) => inner.clone(),
        None => doc,
    };

    let mut out = Vec::new();
    match body {
        serde_yaml::Value::Null => {}
        serde_yaml::Value::Sequence(items) => {
            for (i, item) in items.into_iter().enumerate() {
                if !item.is_mapping() {
                    tracing::warn!("plan item {} is not a mapping, ignored", i);
                    continue;
                }
                let src: RawSource = serde_yaml::from_value(item)
                    .with_context(|| format!("plan item {}", i))?;
                let name = src
                    .name
                    .clone()
                    .or_else(|| src.table.clone())
                    .unwrap_or_else(|| format!("source{}", i + 1));
                out.push((name, src));
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (key, item) in map {
                let name = match key {
                    serde_yaml::Value::String(s) => s,
                    other => serde_yaml::to_string(&other)?.trim().to_string(),
                };
                if !item.is_mapping() {
                    tracing::warn!("plan entry '{}' is not a mapping, ignored", name);
                    continue;
                }
                let src: RawSource = serde_yaml::from_value(item)
                    .with_context(|| format!("plan entry '{}'", name))?;
                out.push((name, src));
            }
        }
        _ => bail!("YAML plan must be a list or a mapping of sources"),
    }
    Ok(out)
}
