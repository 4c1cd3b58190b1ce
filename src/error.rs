//! Errors raised by the remote fetch layer.
//!
//! Everything above the fetcher (plan loading, importing, calendar
//! rebuilds) reports through `anyhow`; the fetcher keeps a typed error so
//! callers and tests can tell a bad token apart from a flaky server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced an HTTP response (DNS, TLS, timeout).
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The API answered 404. With this API that almost always means an
    /// invalid token or a disabled endpoint rather than a missing library.
    #[error(
        "Memento API answered 404 (invalid token, API not enabled, or wrong endpoint)\n\
         URL: GET {url}\nStatus: {status}\nBody: {body}"
    )]
    NotFound {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Memento API error {status} on GET {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::NotFound { status, .. } | FetchError::Status { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}
