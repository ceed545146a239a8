//! Typed HTTP adapter for a CouchDB-compatible server.
//!
//! Four primitives: single-document get/put, `_all_docs` multi-fetch (by key
//! set or key range), `_bulk_docs` upload, and the `_changes` feed in paged
//! and continuous form. Every request carries HTTP Basic credentials and
//! JSON bodies; non-2xx statuses surface as [`RemoteError`] with the status
//! attached.

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::config::{ConfigError, StoreConfig};
use crate::types::{DocumentId, EntryDoc, Seq};

/// Server-side heartbeat interval for the continuous feed, milliseconds.
pub const CONTINUOUS_HEARTBEAT_MS: u64 = 5_000;
/// Server-side timeout for the continuous feed, milliseconds.
pub const CONTINUOUS_TIMEOUT_MS: u64 = 100_000;

const CHANGES_FILTER: &str = "replicate/pull";
const CHANGES_STYLE: &str = "all_docs";

/// Errors from the remote adapter.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// 401/403 from the remote.
    #[error("authentication rejected by the remote (status {status})")]
    Auth { status: u16 },

    /// Any other non-2xx response.
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Revision mismatch on a single-document put.
    #[error("document update conflict on '{id}'")]
    Conflict { id: DocumentId },

    /// Connection, timeout, or body-decoding failure. One-shot operations
    /// propagate this; the continuous watcher reconnects instead.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The operation was cancelled through its abort handle.
    #[error("operation aborted")]
    Aborted,
}

impl RemoteError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Auth { .. })
    }
}

/// One row of an `_all_docs` response. Error rows (`not_found`) carry no
/// `id`/`value`.
#[derive(Debug, Clone, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub id: Option<DocumentId>,
    pub key: String,
    #[serde(default)]
    pub value: Option<AllDocsRowValue>,
    #[serde(default)]
    pub doc: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AllDocsRow {
    /// Whether the row proves a live (non-deleted) document exists.
    pub fn exists(&self) -> bool {
        self.error.is_none() && self.value.as_ref().is_some_and(|v| !v.deleted)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllDocsRowValue {
    pub rev: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllDocsResponse {
    #[serde(default)]
    pub rows: Vec<AllDocsRow>,
}

/// Per-document outcome of a `_bulk_docs` upload.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkDocResult {
    pub id: DocumentId,
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl BulkDocResult {
    /// A `conflict` on a content-addressed write means the document is
    /// already there; it counts as success.
    pub fn is_benign_conflict(&self) -> bool {
        self.error.as_deref() == Some("conflict")
    }
}

/// Acknowledgement of a single-document put.
#[derive(Debug, Clone, Deserialize)]
pub struct PutResult {
    pub ok: bool,
    pub id: DocumentId,
    pub rev: String,
}

/// One row of a `_changes` response (paged or continuous).
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRow {
    #[serde(default)]
    pub seq: Option<Seq>,
    pub id: DocumentId,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// A page of the normal-mode `_changes` feed.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangesPage {
    #[serde(default)]
    pub results: Vec<ChangeRow>,
    pub last_seq: Seq,
    #[serde(default)]
    pub pending: Option<u64>,
}

/// HTTP client bound to one database.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Clone)]
pub struct CouchClient {
    http: Client,
    base: Url,
    database: String,
    username: String,
    password: SecretString,
}

impl CouchClient {
    pub fn new(config: &StoreConfig) -> Result<Self, ConfigError> {
        let base = Url::parse(&config.url).map_err(|e| ConfigError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            http: Client::new(),
            base,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// URL of a database-level endpoint (`_all_docs`, `_changes`, ...) or of
    /// a document. Slashes inside document ids are percent-encoded, except
    /// for the `_local/` namespace which the server treats as a real path.
    pub(crate) fn endpoint(&self, id: &str) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| RemoteError::Status {
                    status: 0,
                    body: "base url cannot carry paths".to_owned(),
                })?;
            segments.pop_if_empty().push(&self.database);
            match id.strip_prefix("_local/") {
                Some(rest) => {
                    segments.push("_local").push(rest);
                }
                None if id.is_empty() => {}
                None => {
                    segments.push(id);
                }
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    async fn expect_success(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Auth {
                status: status.as_u16(),
            });
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Database info probe; validates credentials and database existence.
    #[instrument(level = "debug", skip(self))]
    pub async fn db_info(&self) -> Result<Value, RemoteError> {
        let response = self.request(Method::GET, self.endpoint("")?).send().await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    /// Fetch one document, `None` when the remote reports not-found.
    #[instrument(level = "trace", skip(self), fields(id = %id))]
    pub async fn get_doc(&self, id: &DocumentId) -> Result<Option<Value>, RemoteError> {
        let response = self
            .request(Method::GET, self.endpoint(id.as_str())?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::expect_success(response).await?.json().await?))
    }

    /// Put one document. A 409 surfaces as [`RemoteError::Conflict`].
    #[instrument(level = "debug", skip(self, doc), fields(id = %doc.id()))]
    pub async fn put_doc(&self, doc: &EntryDoc) -> Result<PutResult, RemoteError> {
        let id = doc.id().clone();
        let response = self
            .request(Method::PUT, self.endpoint(id.as_str())?)
            .json(doc)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(RemoteError::Conflict { id });
        }
        Ok(Self::expect_success(response).await?.json().await?)
    }

    /// Multi-document fetch (or bare existence probe) over an explicit key
    /// set.
    #[instrument(level = "trace", skip(self, keys), fields(keys = keys.len(), include_docs))]
    pub async fn all_docs_by_keys(
        &self,
        keys: &[DocumentId],
        include_docs: bool,
    ) -> Result<AllDocsResponse, RemoteError> {
        let mut url = self.endpoint("_all_docs")?;
        url.query_pairs_mut()
            .append_pair("include_docs", if include_docs { "true" } else { "false" });
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "keys": keys }))
            .send()
            .await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    /// Paged fetch over a key range. Keys go on the query string
    /// JSON-encoded, ascending id order is the server's contract.
    #[instrument(level = "trace", skip(self), fields(startkey, endkey, limit))]
    pub async fn all_docs_range(
        &self,
        startkey: &str,
        endkey: &str,
        limit: usize,
        include_docs: bool,
    ) -> Result<AllDocsResponse, RemoteError> {
        let mut url = self.endpoint("_all_docs")?;
        url.query_pairs_mut()
            .append_pair("startkey", &Value::String(startkey.to_owned()).to_string())
            .append_pair("endkey", &Value::String(endkey.to_owned()).to_string())
            .append_pair("limit", &limit.to_string())
            .append_pair("include_docs", if include_docs { "true" } else { "false" });
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    /// Upload a batch of documents, returning per-document outcomes.
    #[instrument(level = "debug", skip(self, docs), fields(docs = docs.len()))]
    pub async fn bulk_docs(&self, docs: &[EntryDoc]) -> Result<Vec<BulkDocResult>, RemoteError> {
        let response = self
            .request(Method::POST, self.endpoint("_bulk_docs")?)
            .json(&json!({ "docs": docs }))
            .send()
            .await?;
        let results: Vec<BulkDocResult> = Self::expect_success(response).await?.json().await?;
        trace!(results = results.len(), "bulk upload acknowledged");
        Ok(results)
    }

    /// One page of the normal-mode changes feed.
    #[instrument(level = "trace", skip(self), fields(since = %since, limit))]
    pub async fn changes_page(&self, since: &Seq, limit: usize) -> Result<ChangesPage, RemoteError> {
        let mut url = self.endpoint("_changes")?;
        url.query_pairs_mut()
            .append_pair("feed", "normal")
            .append_pair("since", since.as_str())
            .append_pair("limit", &limit.to_string())
            .append_pair("style", CHANGES_STYLE)
            .append_pair("include_docs", "true")
            .append_pair("filter", CHANGES_FILTER);
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    /// Open the continuous changes feed as a raw byte stream of line-delimited
    /// JSON. The caller owns framing, cancellation, and reconnection.
    #[instrument(level = "debug", skip(self), fields(since = %since))]
    pub async fn open_changes_stream(
        &self,
        since: &Seq,
    ) -> Result<BoxStream<'static, Result<Bytes, reqwest::Error>>, RemoteError> {
        let mut url = self.endpoint("_changes")?;
        url.query_pairs_mut()
            .append_pair("feed", "continuous")
            .append_pair("since", since.as_str())
            .append_pair("heartbeat", &CONTINUOUS_HEARTBEAT_MS.to_string())
            .append_pair("timeout", &CONTINUOUS_TIMEOUT_MS.to_string())
            .append_pair("style", CHANGES_STYLE)
            .append_pair("include_docs", "true")
            .append_pair("filter", CHANGES_FILTER);
        let response = self.request(Method::GET, url).send().await?;
        let response = Self::expect_success(response).await?;
        debug!("continuous changes feed connected");
        Ok(response.bytes_stream().boxed())
    }
}
