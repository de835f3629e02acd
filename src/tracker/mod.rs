//! Issue tracker status lookups.
//!
//! This is the concrete lookup the CLI plugs into the rollup. It reads
//! an issue's summary and status, retries transient failures with
//! exponential backoff and serves repeat lookups from a `StatusCache`.

use crate::analysis::StatusProbe;
use crate::cache::TtlCache;
use crate::error::PipelineError;
use crate::models::TestStatus;
use chrono::Utc;
use serde::Deserialize;
use std::cell::RefCell;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache of recent lookups, keyed by issue key.
pub type StatusCache = TtlCache<String, StatusProbe>;

/// Backoff settings for transient lookup failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempt` (1-indexed).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

#[derive(Debug, Default, Deserialize)]
struct IssueResponse {
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
struct IssueFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    status: Option<NamedValue>,
}

#[derive(Debug, Default, Deserialize)]
struct NamedValue {
    #[serde(default)]
    name: String,
}

/// Map a tracker status or execution status name onto a test outcome.
pub fn parse_status(name: &str) -> TestStatus {
    match name.trim().to_lowercase().as_str() {
        "pass" | "passed" | "done" => TestStatus::Pass,
        "fail" | "failed" | "blocked" => TestStatus::Fail,
        _ => TestStatus::Unknown,
    }
}

/// HTTP client for status lookups.
pub struct TrackerClient {
    http_client: reqwest::Client,
    base_url: String,
    timeout_seconds: u64,
    retry: RetryPolicy,
}

impl TrackerClient {
    pub fn new(
        base_url: &str,
        timeout_seconds: u64,
        retry: RetryPolicy,
    ) -> Result<Self, PipelineError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| PipelineError::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_seconds,
            retry,
        })
    }

    /// Look up one key, consulting `cache` first.
    ///
    /// On failure a stale cached value is returned if one exists.
    pub async fn lookup(
        &self,
        key: &str,
        cache: &RefCell<StatusCache>,
    ) -> Result<StatusProbe, PipelineError> {
        let cache_key = key.to_string();
        if let Some(hit) = cache.borrow().get(&cache_key, Utc::now()) {
            debug!("Status cache hit for {}", key);
            return Ok(hit);
        }

        match self.fetch_with_retry(key).await {
            Ok(probe) => {
                cache
                    .borrow_mut()
                    .insert(cache_key, probe.clone(), Utc::now());
                Ok(probe)
            }
            Err(e) => {
                let stale = cache.borrow().get_stale(&cache_key);
                match stale {
                    Some(probe) => {
                        warn!("Lookup for {} failed ({}), using stale cached status", key, e);
                        Ok(probe)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn fetch_with_retry(&self, key: &str) -> Result<StatusProbe, PipelineError> {
        let mut attempt = 1;
        loop {
            match self.fetch(key).await {
                Ok(probe) => {
                    if attempt > 1 {
                        info!("Lookup for {} succeeded on attempt {}", key, attempt);
                    }
                    return Ok(probe);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt, self.retry.max_attempts, key, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch(&self, key: &str) -> Result<StatusProbe, PipelineError> {
        let url = format!(
            "{}/rest/api/2/issue/{}?fields=summary,status",
            self.base_url, key
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest(e, self.timeout_seconds))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamStatus { status, body });
        }

        let issue: IssueResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::MalformedChunk(format!("issue {}: {}", key, e)))?;

        Ok(StatusProbe {
            summary: issue.fields.summary.unwrap_or_default(),
            status: issue
                .fields
                .status
                .map(|s| parse_status(&s.name))
                .unwrap_or(TestStatus::Unknown),
        })
    }
}
