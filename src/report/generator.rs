//! Terminal rendering of reports and rollups.
//!
//! Produces a Markdown issue-body preview for a generated `Report`
//! and a Markdown table for status rollups.

use crate::analysis::status_counts;
use crate::models::{Priority, Report, StatusRow};
use anyhow::Result;

/// Generate the Markdown issue body for a report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", report.title));
    output.push_str(&generate_fields_section(report));

    if !report.description.is_empty() {
        output.push_str("## Description\n\n");
        output.push_str(&report.description);
        output.push_str("\n\n");
    }

    output.push_str(&generate_steps_section(&report.steps));

    output.push_str("## Expected Result\n\n");
    output.push_str(or_placeholder(&report.expected_result));
    output.push_str("\n\n");

    output.push_str("## Actual Result\n\n");
    output.push_str(or_placeholder(&report.actual_result));
    output.push_str("\n\n");

    if let Some(ref workaround) = report.workaround {
        output.push_str(&format!("> 💡 **Workaround:** {}\n\n", workaround));
    }

    output
}

fn or_placeholder(text: &str) -> &str {
    if text.is_empty() {
        "_Not provided_"
    } else {
        text
    }
}

/// Generate the field table.
fn generate_fields_section(report: &Report) -> String {
    let mut section = String::new();

    let priority_badge = match report.priority {
        Priority::Blocker => "⛔ **BLOCKER**",
        Priority::Critical => "🔴 **CRITICAL**",
        Priority::Major => "🟠 **MAJOR**",
        Priority::Minor => "🟡 **MINOR**",
        Priority::Trivial => "🟢 **TRIVIAL**",
    };

    section.push_str("| Field | Value |\n");
    section.push_str("|:---|:---|\n");
    section.push_str(&format!("| Priority | {} |\n", priority_badge));
    section.push_str(&format!("| Reproducibility | {} |\n", report.reproducibility));
    section.push_str(&format!("| Component | {} |\n", or_placeholder(&report.component)));
    section.push_str(&format!(
        "| Environment | {} |\n",
        or_placeholder(&report.environment)
    ));
    if !report.impact.is_empty() {
        section.push_str(&format!("| Impact | {} |\n", report.impact));
    }
    section.push('\n');

    section
}

/// Generate the numbered steps section.
fn generate_steps_section(steps: &[String]) -> String {
    if steps.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Steps to Reproduce\n\n");
    for (i, step) in steps.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, step));
    }
    section.push('\n');

    section
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Generate the Markdown table for a status rollup.
pub fn generate_status_table(rows: &[StatusRow]) -> String {
    let mut table = String::new();

    let counts = status_counts(rows);
    let headline: Vec<String> = counts
        .iter()
        .map(|(status, count)| format!("{} {}: {}", status.emoji(), status, count))
        .collect();
    table.push_str(&headline.join(" | "));
    table.push_str("\n\n");

    table.push_str("| Key | Status | Summary |\n");
    table.push_str("|:---|:---:|:---|\n");
    for row in rows {
        let summary = match row.error {
            Some(ref error) => format!("_lookup failed: {}_", error),
            None => row.summary.replace('|', "\\|"),
        };
        table.push_str(&format!(
            "| {} | {} {} | {} |\n",
            row.key,
            row.status.emoji(),
            row.status,
            summary
        ));
    }

    table
}

/// Generate the JSON form of a status rollup.
pub fn generate_status_json(rows: &[StatusRow]) -> Result<String> {
    serde_json::to_string_pretty(rows).map_err(Into::into)
}
