//! Remote entry fetcher for the Memento REST API.
//!
//! Reads every entry of a library, following whatever continuation the
//! server hands back. Continuations are tried in this order:
//!
//! 1. a next-page URL (`next`, `next_url`, `links.next`)
//! 2. a page token (`nextPageToken`, `cursor`, ...) sent back as `pageToken`
//! 3. `offset` + `total`/`count` counters
//! 4. `page` + `pages` counters
//!
//! Fetching stops when none applies, when a page comes back empty, or when
//! the next request would repeat one already made.
//!
//! Entries listed without their field payload are completed with a
//! per-entry detail request.

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::config::Config;
use crate::envelope::extract_entries;
use crate::error::FetchError;
use crate::http::{
    get_with_backoff, BackoffPolicy, HttpTransport, ReqwestTransport, Sleeper, TokioSleeper,
};
use crate::models::{scalar_string, Library};
use crate::settings::{RemoteSettings, SettingsChain};

const NEXT_URL_KEYS: [&str; 2] = ["next", "next_url"];

const PAGE_TOKEN_KEYS: [&str; 7] = [
    "nextPageToken",
    "next_page_token",
    "pageToken",
    "paginationToken",
    "cursor",
    "continuation",
    "continuationToken",
];

/// A single GET: URL plus query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: Url,
    pub query: Vec<(String, String)>,
}

impl PageRequest {
    fn fingerprint(&self) -> String {
        let mut pairs: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        format!("{}?{}", self.url, pairs.join("&"))
    }
}

/// Context needed to compute the request following a page.
pub struct PageContext<'a> {
    /// Versioned API base (`.../v1`).
    pub base: &'a Url,
    /// The entries endpoint of the library being read.
    pub endpoint: &'a Url,
    pub token: &'a str,
    pub page_size: usize,
}

/// Compute the request for the page after `body`, or `None` when the
/// server signalled no continuation.
pub fn next_page(body: &Value, ctx: &PageContext<'_>) -> Result<Option<PageRequest>, FetchError> {
    let Some(obj) = body.as_object() else {
        return Ok(None);
    };

    if let Some(next) = next_url(obj) {
        let url = resolve_next_url(ctx.base, &next, ctx.token)?;
        return Ok(Some(PageRequest { url, query: Vec::new() }));
    }

    let base_query = || {
        vec![
            ("token".to_string(), ctx.token.to_string()),
            ("limit".to_string(), ctx.page_size.to_string()),
        ]
    };

    if let Some(token) = PAGE_TOKEN_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(scalar_string))
    {
        let mut query = base_query();
        query.push(("pageToken".to_string(), token));
        return Ok(Some(PageRequest { url: ctx.endpoint.clone(), query }));
    }

    if let Some(offset) = obj.get("offset").and_then(as_count) {
        let total = obj
            .get("total")
            .and_then(as_count)
            .filter(|t| *t > 0)
            .or_else(|| obj.get("count").and_then(as_count));
        if let Some(total) = total {
            let next_offset = offset + ctx.page_size as u64;
            if next_offset >= total {
                return Ok(None);
            }
            let mut query = base_query();
            query.push(("offset".to_string(), next_offset.to_string()));
            return Ok(Some(PageRequest { url: ctx.endpoint.clone(), query }));
        }
    }

    if let (Some(page), Some(pages)) = (
        obj.get("page").and_then(as_count),
        obj.get("pages").and_then(as_count),
    ) {
        // counters are 0-based; the last page is `pages - 1`
        if page + 1 >= pages {
            return Ok(None);
        }
        let mut query = base_query();
        query.push(("page".to_string(), (page + 1).to_string()));
        return Ok(Some(PageRequest { url: ctx.endpoint.clone(), query }));
    }

    Ok(None)
}

fn next_url(obj: &Map<String, Value>) -> Option<String> {
    NEXT_URL_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .or_else(|| obj.get("links").and_then(|l| l.get("next")))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Counters arrive as numbers or numeric strings.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve a next-page URL against the API base and make sure it carries
/// the token.
fn resolve_next_url(base: &Url, next: &str, token: &str) -> Result<Url, FetchError> {
    let invalid = |message: String| FetchError::InvalidUrl {
        url: next.to_string(),
        message,
    };
    let root = Url::parse(&format!("{}/", base.as_str().trim_end_matches('/')))
        .map_err(|e| invalid(e.to_string()))?;
    let mut url = root.join(next).map_err(|e| invalid(e.to_string()))?;
    if !url.query_pairs().any(|(k, _)| k == "token") {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Client for the Memento API.
pub struct EntryFetcher {
    transport: Box<dyn HttpTransport>,
    sleeper: Box<dyn Sleeper>,
    policy: BackoffPolicy,
    base: Url,
    token: SecretString,
}

impl EntryFetcher {
    pub fn new(
        settings: RemoteSettings,
        policy: BackoffPolicy,
        transport: Box<dyn HttpTransport>,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
            base: settings.api_url,
            token: settings.token,
        }
    }

    /// Fetcher over `reqwest` and the tokio timer.
    pub fn connect(settings: RemoteSettings, policy: BackoffPolicy) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(settings.timeout)?;
        Ok(Self::new(
            settings,
            policy,
            Box::new(transport),
            Box::new(TokioSleeper),
        ))
    }

    /// Resolve remote settings through the standard chain and connect.
    pub fn from_config(config: &Config, config_path: &std::path::Path) -> anyhow::Result<Self> {
        let chain = SettingsChain::standard(&config.remote, config_path);
        let settings = RemoteSettings::resolve(&chain)?;
        Ok(Self::connect(settings, config.import.backoff())?)
    }

    /// `<base>/<path>`. Built by concatenation: `Url::join` would drop the
    /// `/v1` segment.
    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        let raw = format!("{}/{}", self.base.as_str().trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| FetchError::InvalidUrl {
            url: raw.clone(),
            message: e.to_string(),
        })
    }

    fn token_query(&self) -> Vec<(String, String)> {
        vec![("token".to_string(), self.token.expose_secret().to_string())]
    }

    fn redact(&self, text: &str) -> String {
        let token = self.token.expose_secret();
        if token.is_empty() {
            text.to_string()
        } else {
            text.replace(token, "***")
        }
    }

    /// GET with backoff, then classify the status and decode the body.
    async fn get_json(&self, request: &PageRequest) -> Result<Value, FetchError> {
        let response = get_with_backoff(
            self.transport.as_ref(),
            self.sleeper.as_ref(),
            &self.policy,
            &request.url,
            &request.query,
        )
        .await
        .map_err(|e| match e {
            FetchError::Transport { url, message } => FetchError::Transport {
                url: self.redact(&url),
                message: self.redact(&message),
            },
            other => other,
        })?;

        let url = self.redact(if response.url.is_empty() {
            request.url.as_str()
        } else {
            response.url.as_str()
        });

        if response.status == 404 {
            return Err(FetchError::NotFound {
                url,
                status: response.status,
                body: response.body,
            });
        }
        if !response.is_success() {
            return Err(FetchError::Status {
                url,
                status: response.status,
                body: response.body,
            });
        }

        serde_json::from_str(&response.body).map_err(|source| FetchError::Decode { url, source })
    }

    /// Read every entry of `library_id`, at most `max_entries` when given.
    pub async fn fetch_all_entries(
        &self,
        library_id: &str,
        page_size: usize,
        max_entries: Option<usize>,
    ) -> Result<Vec<Value>, FetchError> {
        let endpoint = self.endpoint(&format!("libraries/{}/entries", library_id))?;
        let token = self.token.expose_secret().to_string();
        let ctx = PageContext {
            base: &self.base,
            endpoint: &endpoint,
            token: &token,
            page_size,
        };

        let mut request = PageRequest {
            url: endpoint.clone(),
            query: vec![
                ("token".to_string(), token.clone()),
                ("limit".to_string(), page_size.to_string()),
            ],
        };
        let mut seen = HashSet::new();
        let mut out: Vec<Value> = Vec::new();
        let mut pages = 0u32;

        loop {
            seen.insert(request.fingerprint());
            let body = self.get_json(&request).await?;
            pages += 1;

            let items = extract_entries(&body);
            tracing::debug!(library = library_id, page = pages, items = items.len(), "page fetched");
            if items.is_empty() {
                break;
            }

            for item in items {
                if max_entries.is_some_and(|cap| out.len() >= cap) {
                    break;
                }
                let item = if needs_detail(&item) {
                    self.complete_entry(library_id, item).await?
                } else {
                    item
                };
                out.push(item);
            }

            if max_entries.is_some_and(|cap| out.len() >= cap) {
                break;
            }

            match next_page(&body, &ctx)? {
                Some(next) if seen.contains(&next.fingerprint()) => {
                    tracing::warn!(
                        library = library_id,
                        "server repeated a continuation, stopping after {} pages",
                        pages
                    );
                    break;
                }
                Some(next) => request = next,
                None => break,
            }
        }

        Ok(out)
    }

    async fn complete_entry(&self, library_id: &str, item: Value) -> Result<Value, FetchError> {
        let Some(entry_id) = item.get("id").and_then(scalar_string) else {
            return Ok(item);
        };
        self.fetch_entry(library_id, &entry_id).await
    }

    /// `GET /libraries/{id}/entries/{entry_id}`.
    pub async fn fetch_entry(&self, library_id: &str, entry_id: &str) -> Result<Value, FetchError> {
        let url = self.endpoint(&format!("libraries/{}/entries/{}", library_id, entry_id))?;
        self.get_json(&PageRequest {
            url,
            query: self.token_query(),
        })
        .await
    }

    /// `GET /libraries`, normalized to id/name/title triples.
    pub async fn list_libraries(&self) -> Result<Vec<Library>, FetchError> {
        let url = self.endpoint("libraries")?;
        let body = self
            .get_json(&PageRequest {
                url,
                query: self.token_query(),
            })
            .await?;
        Ok(normalize_libraries(&body))
    }

    /// Field definitions of a library: `fields` of `GET /libraries/{id}`,
    /// then `data.fields`, else the whole body.
    pub async fn library_fields(&self, library_id: &str) -> Result<Value, FetchError> {
        let url = self.endpoint(&format!("libraries/{}", library_id))?;
        let body = self
            .get_json(&PageRequest {
                url,
                query: self.token_query(),
            })
            .await?;
        let fields = body
            .get("fields")
            .or_else(|| body.get("data").and_then(|d| d.get("fields")))
            .cloned();
        Ok(fields.unwrap_or(body))
    }
}

/// An entry needs a detail request when its field payload is missing or
/// empty and it has an id to ask for.
fn needs_detail(item: &Value) -> bool {
    let has_fields = match item.get("fields") {
        None | Some(Value::Null) => false,
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    };
    !has_fields && item.get("id").and_then(scalar_string).is_some()
}

/// Accept the library list shapes seen in the wild: a bare list, a list
/// under `libraries`/`items`/`data`/`results`, an `id → name` map or a
/// map of library objects.
pub fn normalize_libraries(body: &Value) -> Vec<Library> {
    let items: Vec<Value> = match body {
        Value::Array(list) => list.clone(),
        Value::Object(map) => {
            if let Some(list) = ["libraries", "items", "data", "results"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
            {
                list.clone()
            } else if !map.is_empty() && map.values().all(Value::is_string) {
                map.iter()
                    .map(|(id, name)| serde_json::json!({"id": id, "name": name}))
                    .collect()
            } else {
                map.values().filter(|v| v.is_object()).cloned().collect()
            }
        }
        Value::String(s) => vec![serde_json::json!({"id": s, "name": s})],
        _ => Vec::new(),
    };

    items.iter().filter_map(normalize_library).collect()
}

fn normalize_library(item: &Value) -> Option<Library> {
    let pick = |keys: &[&str]| keys.iter().find_map(|k| item.get(*k).and_then(scalar_string));
    let id = match item {
        Value::String(s) => Some(s.clone()),
        _ => pick(&["id", "uuid", "key", "library_id"]),
    }?;
    let name = pick(&["name", "title", "label"]).unwrap_or_else(|| id.clone());
    let title = pick(&["title", "name"]).unwrap_or_else(|| name.clone());
    Some(Library { id, name, title })
}
