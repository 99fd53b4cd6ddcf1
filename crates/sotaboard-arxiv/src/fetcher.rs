//! Cached PDF fetching with bounded retries.
//!
//! A cache hit returns immediately with zero network traffic. Fresh
//! downloads retry transient failures (timeouts, connect errors, 5xx,
//! 429) with exponential backoff and jitter, verify the `%PDF` magic,
//! and land in the store atomically so a concurrent or later stage
//! never sees a partial file. Identifiers that fail repeatedly go into
//! a persisted ledger and are skipped on re-runs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use sotaboard_core::store::{RunStore, StoreError};

use crate::normalize_id;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("paper {id} not found at the source")]
    NotFound { id: String },
    #[error("download of {id} failed after {attempts} attempts: {reason}")]
    TransientFailure {
        id: String,
        attempts: u32,
        reason: String,
    },
    #[error("downloaded file for {id} is not a PDF")]
    CorruptDownload { id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a bulk fetch pass.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Ids now present in the cache (fresh downloads and prior hits).
    pub fetched: Vec<String>,
    pub cache_hits: usize,
    /// Ids that failed this pass, with the error kind.
    pub failed: Vec<(String, FetchError)>,
    /// Ids skipped because the ledger marked them as previously failed.
    pub skipped_ledger: Vec<String>,
}

/// The PDF source endpoint plus retry policy.
#[derive(Debug, Clone)]
pub struct ArxivSource {
    base_url: String,
    max_retries: u32,
    timeout: Duration,
    backoff_base: Duration,
}

impl Default for ArxivSource {
    fn default() -> Self {
        Self {
            base_url: "https://arxiv.org/pdf".to_string(),
            max_retries: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl ArxivSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Resolve a paper id to a local PDF path, downloading on cache miss.
    pub async fn fetch_pdf(
        &self,
        id: &str,
        store: &RunStore,
        client: &reqwest::Client,
    ) -> Result<PathBuf, FetchError> {
        let id = normalize_id(id);

        if store.has_pdf(&id) {
            tracing::debug!(paper_id = %id, "pdf cache hit");
            return Ok(store.pdf_path(&id));
        }

        let url = format!("{}/{}.pdf", self.base_url, id);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_download(&id, &url, client).await {
                Ok(bytes) => {
                    if !bytes.starts_with(b"%PDF") {
                        tracing::warn!(paper_id = %id, "downloaded body lacks PDF magic");
                        return Err(FetchError::CorruptDownload { id });
                    }
                    let path = store.write_pdf(&id, &bytes)?;
                    tracing::info!(paper_id = %id, bytes = bytes.len(), "pdf downloaded");
                    return Ok(path);
                }
                Err(Transient::NotFound) => return Err(FetchError::NotFound { id }),
                Err(Transient::Retryable(reason)) => {
                    if attempt > self.max_retries {
                        return Err(FetchError::TransientFailure {
                            id,
                            attempts: attempt,
                            reason,
                        });
                    }
                    let wait = backoff_delay(self.backoff_base, attempt - 1);
                    tracing::debug!(paper_id = %id, attempt, reason = %reason, wait_ms = wait.as_millis() as u64, "retrying download");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn try_download(
        &self,
        id: &str,
        url: &str,
        client: &reqwest::Client,
    ) -> Result<Vec<u8>, Transient> {
        let resp = client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Transient::Retryable(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(Transient::NotFound);
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Transient::Retryable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            tracing::warn!(paper_id = %id, %status, "unexpected fetch status");
            return Err(Transient::Retryable(format!("HTTP {status}")));
        }

        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Transient::Retryable(e.to_string()))
    }

    /// Fetch a batch of candidates, pacing fresh downloads by `delay`
    /// and honoring the failed-download ledger. Per-paper failures are
    /// recorded and the pass continues. `on_item` fires after each id
    /// is settled (progress display).
    pub async fn fetch_candidates(
        &self,
        ids: &[String],
        store: &RunStore,
        client: &reqwest::Client,
        delay: Duration,
        refetch_failed: bool,
        cancel: &CancellationToken,
        on_item: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> FetchReport {
        let mut report = FetchReport::default();
        let mut ledger = store.load_failed_downloads();

        for raw_id in ids {
            if cancel.is_cancelled() {
                break;
            }
            let id = normalize_id(raw_id);
            if let Some(cb) = on_item {
                cb(&id);
            }

            if !refetch_failed && ledger.contains(&id) {
                tracing::debug!(paper_id = %id, "skipping previously failed download");
                report.skipped_ledger.push(id);
                continue;
            }

            let was_cached = store.has_pdf(&id);
            match self.fetch_pdf(&id, store, client).await {
                Ok(_) => {
                    if was_cached {
                        report.cache_hits += 1;
                    } else {
                        // Pace only fresh downloads; cache hits are free.
                        tokio::time::sleep(delay).await;
                    }
                    ledger.remove(&id);
                    report.fetched.push(id);
                }
                Err(e) => {
                    tracing::warn!(paper_id = %id, error = %e, "fetch failed, continuing");
                    ledger.insert(id.clone());
                    report.failed.push((id, e));
                }
            }
        }

        if let Err(e) = store.save_failed_downloads(&ledger) {
            tracing::error!(error = %e, "failed to persist download ledger");
        }
        report
    }
}

enum Transient {
    NotFound,
    Retryable(String),
}

/// Exponential backoff with ±25% jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis().max(1) as u64;
    let scaled = base_ms.saturating_mul(1u64 << attempt.min(6));
    let jitter = (scaled / 4).max(1);
    Duration::from_millis(scaled - jitter / 2 + fastrand::u64(0..jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hit_returns_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        store.write_pdf("2301.00001", b"%PDF-1.5 cached").unwrap();

        // An unroutable base URL: any network attempt would error.
        let source = ArxivSource::new().with_base_url("http://127.0.0.1:1");
        let client = reqwest::Client::new();
        let path = source
            .fetch_pdf("2301.00001", &store, &client)
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.5 cached");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());

        // Connection refused on every attempt.
        let source = ArxivSource::new()
            .with_base_url("http://127.0.0.1:1")
            .with_max_retries(3)
            .with_backoff_base(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(200));
        let client = reqwest::Client::new();
        let err = source
            .fetch_pdf("2301.00001", &store, &client)
            .await
            .unwrap_err();
        match err {
            FetchError::TransientFailure { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected TransientFailure, got {other:?}"),
        }
        assert!(!store.has_pdf("2301.00001"));
    }

    #[tokio::test]
    async fn batch_records_failures_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        store.write_pdf("2301.00002", b"%PDF-1.5 ok").unwrap();

        let source = ArxivSource::new()
            .with_base_url("http://127.0.0.1:1")
            .with_max_retries(0)
            .with_backoff_base(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(200));
        let client = reqwest::Client::new();
        let cancel = CancellationToken::new();

        let ids = vec!["2301.00001".to_string(), "2301.00002".to_string()];
        let report = source
            .fetch_candidates(&ids, &store, &client, Duration::ZERO, false, &cancel, None)
            .await;

        // The failing paper is recorded; the cached one still succeeds.
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "2301.00001");
        assert_eq!(report.fetched, vec!["2301.00002"]);
        assert_eq!(report.cache_hits, 1);
        assert!(store.load_failed_downloads().contains("2301.00001"));
    }

    #[tokio::test]
    async fn ledger_prevents_refetch_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let mut ledger = std::collections::BTreeSet::new();
        ledger.insert("2301.00001".to_string());
        store.save_failed_downloads(&ledger).unwrap();

        let source = ArxivSource::new().with_base_url("http://127.0.0.1:1");
        let client = reqwest::Client::new();
        let cancel = CancellationToken::new();

        let ids = vec!["2301.00001".to_string()];
        let report = source
            .fetch_candidates(&ids, &store, &client, Duration::ZERO, false, &cancel, None)
            .await;

        assert_eq!(report.skipped_ledger, vec!["2301.00001"]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let base = Duration::from_millis(100);
        let first = backoff_delay(base, 0);
        let third = backoff_delay(base, 2);
        assert!(first < Duration::from_millis(200));
        assert!(third >= Duration::from_millis(300));
    }
}
