//! Test status rollup.
//!
//! Fans a status lookup out over a list of issue keys, turns failed
//! lookups into `UNKNOWN` rows and returns the rows rank-sorted.

use crate::analysis::{fan_out, rank_sort};
use crate::error::PipelineError;
use crate::models::{StatusRow, TestStatus};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{info, warn};

/// What a successful lookup reports about one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusProbe {
    pub summary: String,
    pub status: TestStatus,
}

/// Look up every key with at most `limit` lookups in flight.
///
/// A failing lookup only affects its own row.
pub async fn rollup<F, Fut>(keys: &[String], limit: usize, lookup: F) -> Vec<StatusRow>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<StatusProbe, PipelineError>>,
{
    let lookup = &lookup;
    let mut rows = fan_out(keys, limit, move |key: &String| {
        let key = key.clone();
        let probe = lookup(key.clone());
        async move {
            match probe.await {
                Ok(probe) => StatusRow {
                    key,
                    summary: probe.summary,
                    status: probe.status,
                    error: None,
                },
                Err(e) => {
                    warn!("Status lookup for {} failed: {}", key, e);
                    StatusRow::unknown(key, e.to_string())
                }
            }
        }
    })
    .await;

    let failed = rows.iter().filter(|r| r.error.is_some()).count();
    info!("Rolled up {} keys ({} lookups failed)", rows.len(), failed);

    rank_sort(&mut rows);
    rows
}

/// Counts per status, in rank order.
pub fn status_counts(rows: &[StatusRow]) -> [(TestStatus, usize); 3] {
    let count = |status: TestStatus| rows.iter().filter(|r| r.status == status).count();
    [
        (TestStatus::Fail, count(TestStatus::Fail)),
        (TestStatus::Unknown, count(TestStatus::Unknown)),
        (TestStatus::Pass, count(TestStatus::Pass)),
    ]
}
