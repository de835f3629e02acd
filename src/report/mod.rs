//! Report extraction and rendering.
//!
//! `normalizer` coerces model output into a `Report`, using the cue
//! tables in `heuristics`; `generator` renders reports and rollups.

pub mod generator;
pub mod heuristics;
pub mod normalizer;

pub use generator::{
    generate_json_report, generate_markdown_report, generate_status_json, generate_status_table,
};
pub use normalizer::ReportNormalizer;
