use std::{collections::BTreeSet, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION},
    StatusCode,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{page_entries, DocumentFeed, FeedSink};

pub const DEFAULT_API_URL: &str = "https://api.lobbyregister.bundestag.de/rest/v2";
const PREVIEW_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("resource not found at {url}")]
    NotFound { url: String },
    #[error("HTTP {status} for {url}: {preview}")]
    Status { url: String, status: u16, preview: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),
    #[error("failed to fetch {url} after {attempts} attempts, last failure: {last}")]
    Exhausted { url: String, attempts: u32, last: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Initial retry delay in seconds; `0` falls back to one second.
    pub backoff_factor: f64,
    /// Upper bound of a retry delay in seconds; `0` means unbounded.
    pub backoff_max: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            url: DEFAULT_API_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            max_retries: 3,
            backoff_factor: 0.5,
            backoff_max: 8.0,
        }
    }
}

/// Delay before the retry after one that waited `current` seconds.
pub fn next_backoff(current: f64, base: f64, ceiling: f64) -> f64 {
    (current.max(base) * 2.0).min(ceiling).max(base)
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if preview.len() < text.len() {
        preview.push('…');
    }
    preview
}

/// Client for the register REST API with retry and exponential backoff.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ApiConfig,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .gzip(true)
            .build()
            .map_err(|source| ApiError::Request {
                url: config.url.clone(),
                source,
            })?;
        Ok(ApiClient { config, http })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// GETs `path` below the base URL. Network errors, 5xx, 408 and 429 are
    /// retried up to `max_retries` times; 404 is reported as
    /// [`ApiError::NotFound`] at once.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let max_attempts = self.config.max_retries.saturating_add(1);
        let base = match self.config.backoff_factor.max(0.0) {
            b if b > 0.0 => b,
            _ => 1.0,
        };
        let ceiling = match self.config.backoff_max {
            c if c > 0.0 => c,
            _ => f64::INFINITY,
        };
        let mut sleep = base;

        for attempt in 1..=max_attempts {
            debug!(url = %url, attempt, max_attempts, "requesting");
            let mut request = self.http.get(&url).header(ACCEPT, "application/json").query(query);
            if let Some(key) = &self.config.api_key {
                request = request.header(AUTHORIZATION, format!("ApiKey {key}"));
            }

            let failure = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|err| ApiError::UnexpectedPayload(format!("{url}: {err}")));
                    }
                    let body = preview(&response.text().await.unwrap_or_default());
                    if status == StatusCode::NOT_FOUND {
                        warn!(url = %url, preview = %body, "resource not found");
                        return Err(ApiError::NotFound { url });
                    }
                    let retryable = status.is_server_error()
                        || status == StatusCode::REQUEST_TIMEOUT
                        || status == StatusCode::TOO_MANY_REQUESTS;
                    if !retryable {
                        error!(
                            url = %url,
                            status = status.as_u16(),
                            preview = %body,
                            "request rejected"
                        );
                        return Err(ApiError::Status {
                            url,
                            status: status.as_u16(),
                            preview: body,
                        });
                    }
                    format!("HTTP {status}")
                }
                Err(err) => err.to_string(),
            };

            if attempt == max_attempts {
                return Err(ApiError::Exhausted {
                    url,
                    attempts: max_attempts,
                    last: failure,
                });
            }
            let wait = sleep.min(ceiling);
            warn!(
                url = %url,
                attempt,
                max_attempts,
                failure = %failure,
                wait_secs = wait,
                "retrying"
            );
            tokio::time::sleep(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX)).await;
            sleep = next_backoff(sleep, base, ceiling);
        }

        Err(ApiError::Exhausted {
            url,
            attempts: max_attempts,
            last: "no attempt made".to_string(),
        })
    }

    pub async fn statistics(&self) -> Result<Value, ApiError> {
        let payload = self.get_json("statistics/registerentries", &[]).await?;
        if !payload.is_object() {
            return Err(ApiError::UnexpectedPayload(format!(
                "statistics: {}",
                preview(&payload.to_string())
            )));
        }
        Ok(payload)
    }

    /// One page of register entries; `cursor` continues a previous page.
    pub async fn register_entries_page(
        &self,
        search: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Value, ApiError> {
        let mut query = vec![("format", "json".to_string())];
        if let Some(search) = search.filter(|q| !q.is_empty()) {
            query.push(("q", search.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        self.get_json("registerentries", &query).await
    }

    pub async fn register_entry_version(
        &self,
        register_number: &str,
        version: i64,
    ) -> Result<Value, ApiError> {
        let payload = self
            .get_json(&format!("registerentries/{register_number}/{version}"), &[])
            .await?;
        if !payload.is_object() {
            return Err(ApiError::UnexpectedPayload(format!(
                "register entry version {register_number}/{version}: {}",
                preview(&payload.to_string())
            )));
        }
        Ok(payload)
    }
}

/// Version numbers an entry refers to: its own `version`, the one in
/// `registerEntryDetails` and those listed under
/// `accountDetails.registerEntryVersions`.
pub fn collect_versions(entry: &Value) -> BTreeSet<i64> {
    let mut versions = BTreeSet::new();
    let candidates = [
        entry.get("version"),
        entry.pointer("/registerEntryDetails/version"),
    ];
    versions.extend(candidates.into_iter().flatten().filter_map(Value::as_i64));
    if let Some(listed) = entry
        .pointer("/accountDetails/registerEntryVersions")
        .and_then(Value::as_array)
    {
        versions.extend(
            listed
                .iter()
                .filter_map(|item| item.get("version").and_then(Value::as_i64)),
        );
    }
    versions
}

/// Register entries from the API, following the page cursor, plus the
/// optional statistics document and per-entry version documents.
pub struct ApiFeed {
    client: ApiClient,
    pub query: Option<String>,
    pub entries_root: String,
    pub versions_root: Option<String>,
    pub statistics_root: Option<String>,
}

impl ApiFeed {
    pub fn new(client: ApiClient, entries_root: &str) -> Self {
        ApiFeed {
            client,
            query: None,
            entries_root: entries_root.to_string(),
            versions_root: None,
            statistics_root: None,
        }
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_versions(mut self, root: &str) -> Self {
        self.versions_root = Some(root.to_string());
        self
    }

    pub fn with_statistics(mut self, root: &str) -> Self {
        self.statistics_root = Some(root.to_string());
        self
    }

    async fn feed_statistics(&self, sink: &mut FeedSink, root: &str) -> Result<()> {
        match self.client.statistics().await {
            Ok(statistics) => {
                sink.push(root, statistics).await?;
            }
            Err(ApiError::NotFound { url }) => warn!(url = %url, "no statistics published"),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    async fn feed_versions(&self, sink: &mut FeedSink, root: &str, entry: &Value) -> Result<usize> {
        let Some(register_number) = entry.get("registerNumber").and_then(Value::as_str) else {
            return Ok(0);
        };
        let mut fed = 0;
        for version in collect_versions(entry) {
            let fetched = self.client.register_entry_version(register_number, version).await;
            let mut payload = match fetched {
                Ok(payload) => payload,
                Err(ApiError::NotFound { .. }) => {
                    warn!(register_number, version, "register entry version not found");
                    continue;
                }
                Err(err) => {
                    error!(
                        register_number,
                        version,
                        error = %err,
                        "unable to fetch register entry version"
                    );
                    continue;
                }
            };
            if let Some(document) = payload.as_object_mut() {
                document.entry("version").or_insert_with(|| Value::from(version));
            }
            if sink.push(root, payload).await? {
                fed += 1;
            }
        }
        Ok(fed)
    }
}

#[async_trait]
impl DocumentFeed for ApiFeed {
    async fn run(&mut self, sink: &mut FeedSink) -> Result<()> {
        if let Some(root) = self.statistics_root.clone().filter(|r| sink.has_root(r)) {
            self.feed_statistics(sink, &root).await?;
        }
        let versions_root = self.versions_root.clone().filter(|r| sink.has_root(r));

        let mut cursor: Option<String> = None;
        let mut seen_cursors = BTreeSet::new();
        let (mut pages, mut entries, mut versions) = (0usize, 0usize, 0usize);
        loop {
            let payload = self
                .client
                .register_entries_page(self.query.as_deref(), cursor.as_deref())
                .await?;
            let page = page_entries(&payload).ok_or_else(|| {
                let shown = preview(&payload.to_string());
                ApiError::UnexpectedPayload(format!("register entries: {shown}"))
            })?;
            pages += 1;
            for entry in page {
                if let Some(root) = &versions_root {
                    versions += self.feed_versions(sink, root, &entry).await?;
                }
                sink.push(&self.entries_root, entry).await?;
                entries += 1;
            }

            let next = match payload.get("cursor") {
                Some(Value::String(next)) => next.clone(),
                _ => break,
            };
            if cursor.as_deref() == Some(next.as_str()) || !seen_cursors.insert(next.clone()) {
                debug!(cursor = %next, "cursor repeated, stopping");
                break;
            }
            cursor = Some(next);
        }
        info!(pages, entries, versions, "register API exhausted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_next_backoff_doubles_up_to_ceiling() {
        let mut sleep = 0.5;
        let mut waits = Vec::new();
        for _ in 0..6 {
            waits.push(sleep);
            sleep = next_backoff(sleep, 0.5, 8.0);
        }
        assert_eq!(waits, vec![0.5, 1.0, 2.0, 4.0, 8.0, 8.0]);
        assert_eq!(next_backoff(0.1, 1.0, f64::INFINITY), 2.0);
        assert_eq!(next_backoff(4.0, 1.0, 0.5), 1.0);
    }

    #[test]
    fn test_collect_versions() {
        let entry = json!({
            "version": 3,
            "registerEntryDetails": {"version": 3},
            "accountDetails": {"registerEntryVersions": [{"version": 1}, {"version": 2}, {"x": 0}]}
        });
        assert_eq!(collect_versions(&entry).into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(collect_versions(&json!({"registerNumber": "R1"})).is_empty());
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(600);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 1);
    }
}
