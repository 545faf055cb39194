//! HTTP clients for the backend's query/feed surface and its deploy/session
//! surface. Structured `tracing` events on every failure path, truncated
//! error bodies for large responses, and JSON error-body parsing into the
//! core's error taxonomy, matching this codebase's existing client
//! conventions.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use crate::app_package::AppPackage;
use crate::document::BackendDocument;
use crate::error::{CoreError, Result};
use crate::query::BackendQueryPlan;

fn should_log_full() -> bool {
    std::env::var("VESPA_LOG_FULL").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

fn truncate_body(body: &str) -> (String, bool) {
    if should_log_full() {
        return (body.to_string(), false);
    }
    const LIMIT: usize = 2_000;
    if body.len() > LIMIT {
        (format!("{}…<truncated {} chars>", &body[..LIMIT], body.len() - LIMIT), true)
    } else {
        (body.to_string(), false)
    }
}

/// Extracts `(error-codes, messages)` from the backend's JSON error body
/// shapes: `{error-code, message}` feed/deploy errors, and
/// `{root:{errors:[{code,message}]}}` search errors.
fn parse_error_body(body: &str) -> (Vec<String>, Vec<String>) {
    let mut codes = Vec::new();
    let mut messages = Vec::new();
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(arr) = json.get("root").and_then(|r| r.get("errors")).and_then(|e| e.as_array()) {
            for e in arr {
                if let Some(msg) = e.get("message").and_then(|m| m.as_str()) {
                    messages.push(msg.to_string());
                }
                if let Some(c) = e.get("code") {
                    codes.push(c.to_string());
                }
            }
        }
        if messages.is_empty() {
            if let Some(m) = json.get("message").and_then(|m| m.as_str()) {
                messages.push(m.to_string());
            }
        }
        if codes.is_empty() {
            if let Some(c) = json.get("error-code").or_else(|| json.get("code")) {
                codes.push(c.as_str().map(str::to_string).unwrap_or_else(|| c.to_string()));
            }
        }
    }
    (codes, messages)
}

/// Maps a non-2xx backend response to the core error taxonomy. Non-JSON
/// bodies become a generic status error carrying the HTTP status.
fn map_backend_error(status: reqwest::StatusCode, body: &str, context: &str) -> CoreError {
    let (codes, messages) = parse_error_body(body);
    let (preview, _) = truncate_body(body);
    let message = messages.first().cloned().unwrap_or(preview);
    if codes.iter().any(|c| c == "INVALID_APPLICATION_PACKAGE") {
        return CoreError::InvalidApplication(message);
    }
    if status.as_u16() >= 500 {
        return CoreError::Transient(format!("{context} failed ({status}): {message}"));
    }
    CoreError::BackendStatus { status: status.as_u16(), message: format!("{context}: {message}") }
}

fn form_key(feature_key: &str) -> String {
    if feature_key.starts_with("query(") {
        format!("input.{feature_key}")
    } else {
        feature_key.to_string()
    }
}

fn value_to_form_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_BACKOFF_MS: u64 = 200;

/// Client for the backend's search/feed/get document-v1 surface.
#[derive(Clone)]
pub struct VespaClient {
    base_url: String,
    http: Client,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl VespaClient {
    pub fn new(base_url: String) -> Self {
        Self { base_url, http: Client::new(), max_retries: DEFAULT_MAX_RETRIES, base_backoff_ms: DEFAULT_BASE_BACKOFF_MS }
    }

    /// Overrides the bounded exponential-backoff retry policy used by
    /// [`Self::feed_documents_batch`]'s per-document retries.
    pub fn with_retry_policy(mut self, max_retries: u32, base_backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_backoff_ms = base_backoff_ms;
        self
    }

    /// `POST {query}/search/` with form-encoded `yql`, `hits`, `offset`,
    /// `ranking`, and `input.query(<name>)` feature values from the
    /// compiled plan.
    pub async fn search(&self, plan: &BackendQueryPlan, timeout: Duration) -> Result<Value> {
        let url = format!("{}/search/", self.base_url.trim_end_matches('/'));
        let mut form: Vec<(String, String)> = vec![
            ("yql".to_string(), plan.yql.clone()),
            ("hits".to_string(), plan.hits.to_string()),
            ("offset".to_string(), plan.offset.to_string()),
            ("ranking".to_string(), plan.rank_profile.clone()),
        ];
        for (k, v) in &plan.query_features {
            form.push((form_key(k), value_to_form_string(v)));
        }
        if let Some(attrs) = &plan.attributes_to_retrieve {
            form.push(("marqo.attributesToRetrieve".to_string(), attrs.join(",")));
        }
        if let Some(attrs) = &plan.searchable_attributes {
            form.push(("marqo.searchableAttributes".to_string(), attrs.join(",")));
        }

        let resp = self.http.post(&url).timeout(timeout).form(&form).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let (codes, messages) = parse_error_body(&body);
            let (preview, truncated) = truncate_body(&body);
            event!(Level::ERROR, target = "vespa.search", http.status = %status, error.codes = ?codes, error.messages = ?messages, body.truncated = truncated, body.preview = preview, yql = %plan.yql, "vespa search failed");
            return Err(map_backend_error(status, &body, "search"));
        }
        serde_json::from_str(&body).map_err(CoreError::from)
    }

    /// `POST {doc}/document/v1/{schema}/{schema}/docid/{id}` with
    /// `{"fields": …}`.
    pub async fn feed_document(&self, schema: &str, doc: &BackendDocument, timeout: Duration) -> Result<()> {
        let url = format!("{}/document/v1/{}/{}/docid/{}", self.base_url.trim_end_matches('/'), schema, schema, urlencoding::encode(&doc.id));
        let body = serde_json::json!({ "fields": doc.fields });
        let resp = self.http.post(&url).timeout(timeout).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let err_body = resp.text().await.unwrap_or_default();
            let (codes, messages) = parse_error_body(&err_body);
            let (preview, truncated) = truncate_body(&err_body);
            event!(Level::ERROR, target = "vespa.feed", http.status = %status, schema = %schema, doc.id = %doc.id, error.codes = ?codes, error.messages = ?messages, body.truncated = truncated, body.preview = preview, "vespa feed failed");
            return Err(map_backend_error(status, &err_body, "feed"));
        }
        Ok(())
    }

    /// `GET …/docid/{id}`. A 404 is reported as `Ok(None)`, not an error —
    /// document absence is an expected outcome, not a failure.
    pub async fn get_document(&self, schema: &str, id: &str, timeout: Duration) -> Result<Option<BackendDocument>> {
        let url = format!("{}/document/v1/{}/{}/docid/{}", self.base_url.trim_end_matches('/'), schema, schema, urlencoding::encode(id));
        let resp = self.http.get(&url).timeout(timeout).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_backend_error(status, &body, "get document"));
        }
        let json: Value = serde_json::from_str(&body)?;
        let fields: HashMap<String, Value> = json.get("fields").and_then(|f| f.as_object()).cloned().unwrap_or_default().into_iter().collect();
        Ok(Some(BackendDocument { id: id.to_string(), fields }))
    }

    /// `GET …/docid?stream=<bool>&continuation=<opaque>`, returning
    /// documents plus an opaque continuation token for the next page.
    pub async fn list_documents(&self, schema: &str, stream: bool, continuation: Option<&str>, timeout: Duration) -> Result<(Vec<BackendDocument>, Option<String>)> {
        let mut url = format!("{}/document/v1/{}/{}/docid?stream={}", self.base_url.trim_end_matches('/'), schema, schema, stream);
        if let Some(c) = continuation {
            url.push_str(&format!("&continuation={}", urlencoding::encode(c)));
        }
        let resp = self.http.get(&url).timeout(timeout).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_backend_error(status, &body, "list documents"));
        }
        let json: Value = serde_json::from_str(&body)?;
        let documents = json
            .get("documents")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|d| {
                        let id = d.get("id").and_then(|v| v.as_str())?.to_string();
                        let fields: HashMap<String, Value> = d.get("fields").and_then(|f| f.as_object()).cloned().unwrap_or_default().into_iter().collect();
                        Some(BackendDocument { id, fields })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let next_continuation = json.get("continuation").and_then(|v| v.as_str()).map(str::to_string);
        Ok((documents, next_continuation))
    }

    /// Raw system metrics from `/metrics/v2/values`; callers truncate/parse
    /// as needed, so this returns the body verbatim.
    pub async fn system_metrics(&self, timeout: Duration) -> Result<String> {
        let url = format!("{}/metrics/v2/values", self.base_url.trim_end_matches('/'));
        let resp = self.http.get(&url).timeout(timeout).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_backend_error(status, &body, "metrics"));
        }
        Ok(body)
    }

    /// Approximates `document_count` via a zero-hit search whose
    /// `root.fields.totalCount` the backend reports.
    pub async fn document_count(&self, schema: &str, timeout: Duration) -> Result<i64> {
        let yql = format!("select * from sources {schema} where true limit 0;");
        let url = format!("{}/search/?yql={}&hits=0", self.base_url.trim_end_matches('/'), urlencoding::encode(&yql));
        let resp = self.http.get(&url).timeout(timeout).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_backend_error(status, &body, "document count"));
        }
        let json: Value = serde_json::from_str(&body)?;
        Ok(json.get("root").and_then(|r| r.get("fields")).and_then(|f| f.get("totalCount")).and_then(|v| v.as_i64()).unwrap_or(0))
    }
}

/// The three document-feed modes from the concurrency/resource model:
/// bounded-concurrency async (production default), sequential (debug), and
/// one task per document via the async runtime's thread pool (debug).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Async,
    Sync,
    ThreadPool,
}

/// Per-document results in input order, plus whether any of them failed.
/// The batch does not abort on first failure. A document whose turn never
/// came because the batch was cancelled gets `CoreError::Transient`.
pub struct BatchFeedResult {
    pub responses: Vec<Result<()>>,
    pub any_error: bool,
}

impl VespaClient {
    /// Feeds a single document with bounded exponential-backoff retry on
    /// transient failures (5xx, timeout): the same "attempt, classify,
    /// sleep doubling backoff, retry up to a cap" shape this codebase uses
    /// for its other outbound HTTP clients.
    async fn feed_one(&self, schema: &str, doc: &BackendDocument, timeout: Duration) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(timeout, self.feed_document(schema, doc, timeout)).await {
                Ok(res) => res,
                Err(_) => Err(CoreError::Transient(format!("feed timed out for document '{}'", doc.id))),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.base_backoff_ms.saturating_mul(1u64 << attempt);
                    event!(Level::WARN, target = "vespa.feed", doc.id = %doc.id, attempt = attempt + 1, backoff_ms = backoff, error = %err, "feed transient error; retrying");
                    crate::metrics::record_batch_retry();
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Feeds `docs` under `mode`, bounding async concurrency at
    /// `max_concurrency` (default 10 per the resource model) and applying
    /// `per_doc_timeout` to each request. Responses preserve input order.
    /// `cancellation` lets a caller drop pending work cooperatively; tasks
    /// already in flight still run to completion, but no new document
    /// starts once it is cancelled.
    pub async fn feed_documents_batch(
        &self,
        schema: &str,
        docs: Vec<BackendDocument>,
        mode: FeedMode,
        max_concurrency: usize,
        per_doc_timeout: Duration,
        cancellation: &CancellationToken,
    ) -> BatchFeedResult {
        let total = docs.len();
        let responses = match mode {
            FeedMode::Sync => {
                let mut out = Vec::with_capacity(total);
                for doc in &docs {
                    if cancellation.is_cancelled() {
                        out.push(Err(CoreError::Transient(format!("feed batch cancelled before document '{}'", doc.id))));
                        continue;
                    }
                    out.push(self.feed_one(schema, doc, per_doc_timeout).await);
                }
                out
            }
            FeedMode::ThreadPool => {
                let handles: Vec<_> = docs
                    .iter()
                    .map(|doc| {
                        let client = self.clone();
                        let schema = schema.to_string();
                        let doc = doc.clone();
                        let cancellation = cancellation.clone();
                        tokio::spawn(async move {
                            if cancellation.is_cancelled() {
                                return Err(CoreError::Transient(format!("feed batch cancelled before document '{}'", doc.id)));
                            }
                            tokio::select! {
                                res = client.feed_one(&schema, &doc, per_doc_timeout) => res,
                                _ = cancellation.cancelled() => Err(CoreError::Transient(format!("feed batch cancelled during document '{}'", doc.id))),
                            }
                        })
                    })
                    .collect();
                let mut out = Vec::with_capacity(total);
                for handle in handles {
                    out.push(handle.await.unwrap_or_else(|e| Err(CoreError::Internal(format!("feed task panicked: {e}")))));
                }
                out
            }
            FeedMode::Async => {
                use futures::stream::{self, StreamExt};
                let indexed: Vec<(usize, Result<()>)> = stream::iter(docs.iter().enumerate())
                    .map(|(i, doc)| {
                        let client = self.clone();
                        let schema = schema.to_string();
                        let cancellation = cancellation.clone();
                        async move {
                            if cancellation.is_cancelled() {
                                return (i, Err(CoreError::Transient(format!("feed batch cancelled before document '{}'", doc.id))));
                            }
                            let res = tokio::select! {
                                res = client.feed_one(&schema, doc, per_doc_timeout) => res,
                                _ = cancellation.cancelled() => Err(CoreError::Transient(format!("feed batch cancelled during document '{}'", doc.id))),
                            };
                            (i, res)
                        }
                    })
                    .buffer_unordered(max_concurrency.max(1))
                    .collect()
                    .await;
                let mut ordered: Vec<Option<Result<()>>> = (0..total).map(|_| None).collect();
                for (i, res) in indexed {
                    ordered[i] = Some(res);
                }
                ordered.into_iter().map(|r| r.expect("every slot filled by its index")).collect()
            }
        };
        let any_error = responses.iter().any(Result::is_err);
        let (ok, fail) = responses.iter().fold((0u64, 0u64), |(ok, fail), r| if r.is_ok() { (ok + 1, fail) } else { (ok, fail + 1) });
        for res in &responses {
            match res {
                Ok(()) => crate::metrics::record_batch_doc_success(),
                Err(CoreError::Transient(_)) => crate::metrics::record_batch_giveup(),
                Err(_) => crate::metrics::record_batch_doc_failure(),
            }
        }
        if any_error {
            event!(Level::ERROR, target = "vespa.feed.batch", schema = %schema, ok, fail, total, "batch feed partial failure");
        } else {
            event!(Level::INFO, target = "vespa.feed.batch", schema = %schema, total, "batch feed ok");
        }
        BatchFeedResult { responses, any_error }
    }
}

/// Client for the backend's deploy/session surface: uploads the gzipped
/// application-package tarball, and downloads the currently active package
/// via session creation plus recursive content listing. A single client
/// instance is reused across a session's requests so its cookie jar
/// preserves session affinity.
#[derive(Clone)]
pub struct VespaDeployClient {
    base_url: String,
    http: Client,
}

impl VespaDeployClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = Client::builder().cookie_store(true).build()?;
        Ok(Self { base_url, http })
    }

    /// `POST {config}/application/v2/tenant/default/prepareandactivate`
    /// with a gzipped tarball of the package root.
    pub async fn deploy_package(&self, pkg: &AppPackage, timeout: Duration) -> Result<()> {
        let url = format!("{}/application/v2/tenant/default/prepareandactivate", self.base_url.trim_end_matches('/'));
        let tarball = pkg.to_gzip_tar()?;
        let resp = self.http.post(&url).timeout(timeout).header("Content-Type", "application/x-gzip").body(tarball).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let (codes, messages) = parse_error_body(&body);
            let (preview, truncated) = truncate_body(&body);
            event!(Level::ERROR, target = "vespa.deploy", http.status = %status, error.codes = ?codes, error.messages = ?messages, body.truncated = truncated, body.preview = preview, "vespa deploy failed");
            return Err(map_backend_error(status, &body, "deploy"));
        }
        event!(Level::INFO, target = "vespa.deploy", "application package deployed");
        Ok(())
    }

    /// Creates a session from the currently active package, then lists and
    /// downloads its content recursively. Entries are identified as files
    /// by a dot in the last path component; entries without one are
    /// directories and are skipped.
    pub async fn download_current_package(&self, timeout: Duration) -> Result<Vec<(String, Bytes)>> {
        let session_url = format!("{}/application/v2/tenant/default/session?from=active", self.base_url.trim_end_matches('/'));
        let resp = self.http.post(&session_url).timeout(timeout).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_backend_error(status, &body, "create deploy session"));
        }
        let session_json: Value = serde_json::from_str(&body)?;
        let session_id = session_json
            .get("session-id")
            .or_else(|| session_json.get("sessionId"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Internal("deploy session response missing a session id".into()))?
            .to_string();

        let content_url = format!("{}/application/v2/tenant/default/session/{session_id}/content/?recursive=true", self.base_url.trim_end_matches('/'));
        let resp = self.http.get(&content_url).timeout(timeout).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_backend_error(status, &body, "list session content"));
        }
        let listing: Value = serde_json::from_str(&body)?;
        let urls: Vec<String> = listing
            .as_array()
            .or_else(|| listing.get("children").and_then(|c| c.as_array()))
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut files = Vec::new();
        for url in urls {
            let last_segment = url.rsplit('/').next().unwrap_or("").to_string();
            if !last_segment.contains('.') {
                continue;
            }
            let resp = self.http.get(&url).timeout(timeout).send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(map_backend_error(status, &body, &format!("download session content '{last_segment}'")));
            }
            let bytes = resp.bytes().await?;
            files.push((last_segment, bytes));
        }
        Ok(files)
    }
}
