//! Bounded-concurrency fan-out with ordered merge.
//!
//! `fan_out` runs a lookup over every item with at most `limit` lookups
//! in flight and returns the results in input order. Workers are plain
//! futures polled on the calling task, so the claim cursor is a `Cell`:
//! a claim is a read-and-increment between two await points and cannot
//! race with another worker.

use crate::models::StatusRow;
use futures::future::join_all;
use std::cell::Cell;
use std::future::Future;
use tracing::debug;

/// Run `lookup` over `items` with at most `limit` calls in flight.
///
/// `result[i]` always corresponds to `items[i]`, whatever order the
/// lookups complete in. A `limit` of zero is treated as one.
pub async fn fan_out<T, R, F, Fut>(items: &[T], limit: usize, lookup: F) -> Vec<R>
where
    F: Fn(&T) -> Fut,
    Fut: Future<Output = R>,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = limit.max(1).min(total);
    debug!("Fanning out {} items across {} workers", total, workers);

    let cursor = Cell::new(0usize);
    let claim = || {
        let index = cursor.get();
        if index < total {
            cursor.set(index + 1);
            Some(index)
        } else {
            None
        }
    };

    let claim = &claim;
    let lookup = &lookup;
    let runs = (0..workers).map(move |_| async move {
        let mut done = Vec::new();
        while let Some(index) = claim() {
            let result = lookup(&items[index]).await;
            done.push((index, result));
        }
        done
    });

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
    for (index, result) in join_all(runs).await.into_iter().flatten() {
        slots[index] = Some(result);
    }

    // Every index is claimed exactly once, so every slot is filled.
    slots.into_iter().flatten().collect()
}

/// Sort rows failures first, then unknown, then passes; ties by key.
pub fn rank_sort(rows: &mut [StatusRow]) {
    rows.sort_by(|a, b| {
        a.status
            .rank()
            .cmp(&b.status.rank())
            .then_with(|| a.key.cmp(&b.key))
    });
}
