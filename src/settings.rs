//! Remote API settings resolution.
//!
//! The API token, base URL and timeout can come from three places. Rather
//! than consulting globals, the fetcher is handed a [`SettingsChain`]: an
//! explicit, ordered list of [`SettingsProvider`]s where the first
//! non-empty answer wins.
//!
//! | Order | Provider | Source |
//! |-------|----------|--------|
//! | 1 | [`InlineSettings`] | `[remote]` table of the main config file |
//! | 2 | [`FileSettings`] | `settings.yaml` / `settings.yml`, else `settings.ini` |
//! | 3 | [`EnvSettings`] | `MEMENTO_TOKEN`, `MEMENTO_API_URL`, `MEMENTO_TIMEOUT` |
//!
//! Keys are dotted `section.key` paths (`memento.token`).

use anyhow::{bail, Context, Result};
use config::FileFormat;
use reqwest::Url;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::RemoteConfig;

pub const KEY_TOKEN: &str = "memento.token";
pub const KEY_API_URL: &str = "memento.api_url";
pub const KEY_TIMEOUT: &str = "memento.timeout";

pub const DEFAULT_API_URL: &str = "https://api.mementodatabase.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// One named source of settings values.
pub trait SettingsProvider: Send + Sync {
    /// Short label used in diagnostics (`"config"`, `"settings.yaml"`, `"env"`).
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<String>;
}

/// Values supplied in-process, normally the `[remote]` config table.
#[derive(Debug, Default, Clone)]
pub struct InlineSettings {
    values: BTreeMap<String, String>,
}

impl InlineSettings {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn from_remote_config(remote: &RemoteConfig) -> Self {
        let mut values = BTreeMap::new();
        if let Some(token) = &remote.token {
            values.insert(KEY_TOKEN.to_string(), token.clone());
        }
        if let Some(url) = &remote.api_url {
            values.insert(KEY_API_URL.to_string(), url.clone());
        }
        if let Some(secs) = remote.timeout_secs {
            values.insert(KEY_TIMEOUT.to_string(), secs.to_string());
        }
        Self { values }
    }
}

impl SettingsProvider for InlineSettings {
    fn name(&self) -> &str {
        "config"
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// A local `settings.yaml` / `settings.ini` file.
pub struct FileSettings {
    label: String,
    inner: config::Config,
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("ini") => FileFormat::Ini,
            _ => bail!("Unsupported settings file: {}", path.display()),
        };
        let name = path
            .to_str()
            .with_context(|| format!("Non UTF-8 settings path: {}", path.display()))?;
        let inner = config::Config::builder()
            .add_source(config::File::new(name, format))
            .build()
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let label = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { label, inner })
    }

    /// Find the settings file in `dirs`: any YAML first, then any INI.
    ///
    /// A file that exists but fails to parse is skipped with a warning.
    pub fn discover(dirs: &[PathBuf]) -> Option<Self> {
        let yaml = dirs
            .iter()
            .flat_map(|d| [d.join("settings.yaml"), d.join("settings.yml")]);
        let ini = dirs.iter().map(|d| d.join("settings.ini"));

        for candidate in yaml.chain(ini) {
            if !candidate.is_file() {
                continue;
            }
            match Self::load(&candidate) {
                Ok(settings) => return Some(settings),
                Err(e) => tracing::warn!("ignoring {}: {:#}", candidate.display(), e),
            }
        }
        None
    }
}

impl SettingsProvider for FileSettings {
    fn name(&self) -> &str {
        &self.label
    }

    fn get(&self, key: &str) -> Option<String> {
        self.inner.get_string(key).ok()
    }
}

/// Process environment, through a fixed key → variable map.
pub struct EnvSettings {
    vars: Vec<(String, String)>,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self::with_vars(&[
            (KEY_TOKEN, "MEMENTO_TOKEN"),
            (KEY_API_URL, "MEMENTO_API_URL"),
            (KEY_TIMEOUT, "MEMENTO_TIMEOUT"),
        ])
    }
}

impl EnvSettings {
    pub fn with_vars(vars: &[(&str, &str)]) -> Self {
        Self {
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl SettingsProvider for EnvSettings {
    fn name(&self) -> &str {
        "env"
    }

    fn get(&self, key: &str) -> Option<String> {
        let (_, var) = self.vars.iter().find(|(k, _)| k == key)?;
        std::env::var(var).ok()
    }
}

/// Ordered provider list; the first non-empty value wins.
pub struct SettingsChain {
    providers: Vec<Box<dyn SettingsProvider>>,
}

impl SettingsChain {
    pub fn new(providers: Vec<Box<dyn SettingsProvider>>) -> Self {
        Self { providers }
    }

    /// Config table, then a discovered settings file, then the environment.
    ///
    /// Settings files are searched in the working directory, the config
    /// file's directory and that directory's parent.
    pub fn standard(remote: &RemoteConfig, config_path: &Path) -> Self {
        let mut providers: Vec<Box<dyn SettingsProvider>> =
            vec![Box::new(InlineSettings::from_remote_config(remote))];
        if let Some(file) = FileSettings::discover(&search_dirs(config_path)) {
            providers.push(Box::new(file));
        }
        providers.push(Box::new(EnvSettings::default()));
        Self::new(providers)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lookup(key).map(|(value, _)| value)
    }

    /// Value and the name of the provider that supplied it.
    pub fn lookup(&self, key: &str) -> Option<(String, &str)> {
        self.providers.iter().find_map(|p| {
            p.get(key)
                .map(|v| strip_quotes(&v).to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (v, p.name()))
        })
    }
}

fn search_dirs(config_path: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        dirs.push(dir.to_path_buf());
        if let Some(parent) = dir.parent().filter(|d| !d.as_os_str().is_empty()) {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs.dedup();
    dirs
}

fn strip_quotes(s: &str) -> &str {
    s.trim().trim_matches('"').trim_matches('\'').trim()
}

/// Fully resolved connection settings for the Memento API.
#[derive(Debug)]
pub struct RemoteSettings {
    /// Base URL, always ending in the `/v1` segment.
    pub api_url: Url,
    pub token: SecretString,
    pub timeout: Duration,
}

impl RemoteSettings {
    /// Resolve settings from `chain`. A missing token is a hard error.
    pub fn resolve(chain: &SettingsChain) -> Result<Self> {
        let token = match chain.lookup(KEY_TOKEN) {
            Some((token, source)) => {
                tracing::debug!("API token taken from {}", source);
                token
            }
            None => bail!(
                "Memento token missing: set [remote].token in the config, '{}' in \
                 settings.yaml/settings.ini, or the MEMENTO_TOKEN environment variable",
                KEY_TOKEN
            ),
        };

        let raw_url = chain
            .get(KEY_API_URL)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = versioned_base(&raw_url)?;

        let timeout_secs = match chain.get(KEY_TIMEOUT) {
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!("invalid {} '{}', using {}s", KEY_TIMEOUT, raw, DEFAULT_TIMEOUT_SECS);
                DEFAULT_TIMEOUT_SECS
            }),
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url,
            token: SecretString::new(token.into()),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Remove inline `;`/`#` comments, quotes and stray whitespace from a URL
/// read out of an INI or YAML file.
pub fn sanitize_url(raw: &str) -> String {
    let cut = raw.split([';', '#']).next().unwrap_or("");
    let unquoted = strip_quotes(cut);
    unquoted.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse the API base URL and force it to end with `/v1`.
pub fn versioned_base(raw: &str) -> Result<Url> {
    let clean = sanitize_url(raw);
    let trimmed = clean.trim_end_matches('/');
    let with_version = if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    };
    Url::parse(&with_version).with_context(|| format!("Invalid Memento API URL: '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    fn inline(pairs: &[(&str, &str)]) -> InlineSettings {
        InlineSettings::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn first_provider_wins() {
        let chain = SettingsChain::new(vec![
            Box::new(inline(&[(KEY_TOKEN, "from-config")])),
            Box::new(inline(&[(KEY_TOKEN, "from-file"), (KEY_TIMEOUT, "5")])),
        ]);
        assert_eq!(
            chain.lookup(KEY_TOKEN),
            Some(("from-config".to_string(), "config"))
        );
        assert_eq!(chain.get(KEY_TIMEOUT).as_deref(), Some("5"));
        assert_eq!(chain.get(KEY_API_URL), None);
    }

    #[test]
    fn empty_values_fall_through() {
        let chain = SettingsChain::new(vec![
            Box::new(inline(&[(KEY_TOKEN, "  ")])),
            Box::new(inline(&[(KEY_TOKEN, "\"abc\"")])),
        ]);
        assert_eq!(chain.get(KEY_TOKEN).as_deref(), Some("abc"));
    }

    #[test]
    fn env_provider_reads_mapped_variable() {
        std::env::set_var("MDASH_TEST_TOKEN_ENV_PROVIDER", "env-token");
        let env = EnvSettings::with_vars(&[(KEY_TOKEN, "MDASH_TEST_TOKEN_ENV_PROVIDER")]);
        assert_eq!(env.get(KEY_TOKEN).as_deref(), Some("env-token"));
        assert_eq!(env.get(KEY_API_URL), None);
    }

    #[test]
    fn yaml_file_is_preferred_over_ini() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("settings.ini"),
            "[memento]\ntoken = ini-token\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("settings.yaml"),
            "memento:\n  token: yaml-token\n  timeout: 7\n",
        )
        .unwrap();

        let file = FileSettings::discover(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(file.name(), "settings.yaml");
        assert_eq!(file.get(KEY_TOKEN).as_deref(), Some("yaml-token"));
        assert_eq!(file.get(KEY_TIMEOUT).as_deref(), Some("7"));
    }

    #[test]
    fn ini_file_is_read() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("settings.ini"),
            "[memento]\ntoken = ini-token\napi_url = https://example.org/api\n",
        )
        .unwrap();
        let file = FileSettings::discover(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(file.get(KEY_TOKEN).as_deref(), Some("ini-token"));
    }

    #[test]
    fn missing_token_is_an_error() {
        let chain = SettingsChain::new(vec![Box::new(inline(&[]))]);
        let err = RemoteSettings::resolve(&chain).unwrap_err();
        assert!(err.to_string().contains("token missing"));
    }

    #[test]
    fn resolve_applies_defaults() {
        let chain = SettingsChain::new(vec![Box::new(inline(&[(KEY_TOKEN, "t")]))]);
        let settings = RemoteSettings::resolve(&chain).unwrap();
        assert_eq!(settings.api_url.as_str(), "https://api.mementodatabase.com/v1");
        assert_eq!(settings.timeout, Duration::from_secs(20));
        assert_eq!(settings.token.expose_secret(), "t");
    }

    #[test]
    fn url_is_sanitized_and_versioned() {
        assert_eq!(
            versioned_base("\"https://api.example.com/\" ; prod").unwrap().as_str(),
            "https://api.example.com/v1"
        );
        assert_eq!(
            versioned_base("https://api.example.com/v1/").unwrap().as_str(),
            "https://api.example.com/v1"
        );
        assert!(versioned_base("not a url").is_err());
    }
}
