//! Fan-out and status rollup.
//!
//! `aggregator` is the generic bounded-concurrency primitive; `rollup`
//! applies it to per-test status lookups.

pub mod aggregator;
pub mod rollup;

pub use aggregator::{fan_out, rank_sort};
pub use rollup::{rollup, status_counts, StatusProbe};
