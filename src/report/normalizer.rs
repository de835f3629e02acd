//! Turns raw model output into a validated `Report`.
//!
//! The only hard failure is not finding an object at all. Everything
//! else is defaulted: missing strings become empty, enums are coerced
//! through synonym tables, and a few fields are re-inferred from the
//! report text and the original prompt.

use crate::error::PipelineError;
use crate::models::{Priority, Report};
use crate::report::heuristics::{prefix_title, Heuristics};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

const UNTITLED: &str = "Untitled bug report";
const MAX_DERIVED_TITLE_CHARS: usize = 80;

/// Locate a JSON object in `raw`.
///
/// Tries the whole trimmed text first, then the span from the first
/// `{` to the last `}`.
pub fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    let trimmed = raw.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Some(map);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }

    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(map)) => {
            debug!("Recovered report object from braces at {}..={}", start, end);
            Some(map)
        }
        _ => None,
    }
}

/// First present value among `names`.
fn field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| object.get(*name))
        .filter(|value| !value.is_null())
}

fn value_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| value_to_string(Some(item)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(MAX_DERIVED_TITLE_CHARS).collect())
}

/// Builds reports from model output.
pub struct ReportNormalizer {
    heuristics: Heuristics,
    step_prefix: Regex,
    inline_step: Regex,
}

impl Default for ReportNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportNormalizer {
    pub fn new() -> Self {
        Self {
            heuristics: Heuristics::new(),
            step_prefix: Regex::new(r"(?i)^\s*(?:(?:step\s*)?\d+\s*[.):]|[-•*])(?:\s+|$)")
                .expect("static step prefix pattern is valid"),
            inline_step: Regex::new(r"(?:^|\s)(\d+)[.)]\s+")
                .expect("static inline step pattern is valid"),
        }
    }

    /// Normalize `raw` model output; `prompt` is the user's description.
    pub fn normalize(&self, raw: &str, prompt: &str) -> Result<Report, PipelineError> {
        let object = extract_object(raw).ok_or(PipelineError::NoStructuredPayload)?;

        let raw_priority = value_to_string(field(&object, &["priority", "severity"]));
        let raw_reproducibility = value_to_string(field(&object, &["reproducibility"]));

        let description = value_to_string(field(&object, &["description"]));
        let mut title = value_to_string(field(&object, &["title", "summary"]));
        if title.is_empty() {
            title = first_line(&description)
                .or_else(|| first_line(prompt))
                .unwrap_or_else(|| UNTITLED.to_string());
        }

        let workaround = Some(value_to_string(field(&object, &["workaround"])))
            .filter(|w| !w.is_empty());

        let mut report = Report {
            title,
            description,
            steps: self.parse_steps(field(&object, &["steps", "stepsToReproduce", "steps_to_reproduce"])),
            expected_result: value_to_string(field(
                &object,
                &["expectedResult", "expected_result", "expected"],
            )),
            actual_result: value_to_string(field(
                &object,
                &["actualResult", "actual_result", "actual"],
            )),
            component: value_to_string(field(&object, &["component"])),
            environment: value_to_string(field(&object, &["environment"])),
            reproducibility: self.heuristics.coerce_reproducibility(&raw_reproducibility),
            workaround,
            impact: value_to_string(field(&object, &["impact"])),
            priority: Priority::Minor,
        };

        let context = [
            report.title.as_str(),
            report.description.as_str(),
            report.actual_result.as_str(),
            prompt,
        ]
        .join("\n");

        report.priority = self
            .heuristics
            .coerce_priority(&raw_priority)
            .or_else(|| self.heuristics.infer_priority(&context))
            .unwrap_or(Priority::Minor);

        if let Some(reproducibility) = self.heuristics.infer_reproducibility(&context) {
            report.reproducibility = reproducibility;
        }

        if let Some(component) = self.heuristics.classify_component(&context) {
            report.component = component.to_string();
        }

        report.title = prefix_title(&report.title, &report.component);

        Ok(report)
    }

    /// Accept either a list of steps or one string of numbered/bulleted lines.
    fn parse_steps(&self, value: Option<&Value>) -> Vec<String> {
        match value {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| self.strip_step_prefix(&value_to_string(Some(item))))
                .filter(|step| !step.is_empty())
                .collect(),
            Some(Value::String(text)) => text
                .lines()
                .flat_map(|line| self.split_numbered(line))
                .map(|step| self.strip_step_prefix(step))
                .filter(|step| !step.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Split `1. a 2. b 3. c` into its steps.
    ///
    /// Only a run that starts at `1` at the beginning of the line and
    /// counts up by one is split; any other line is one step.
    fn split_numbered<'a>(&self, line: &'a str) -> Vec<&'a str> {
        let mut markers: Vec<(usize, usize)> = Vec::new();
        for caps in self.inline_step.captures_iter(line) {
            let (Some(marker), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if markers.is_empty() && !line[..marker.start()].trim().is_empty() {
                break;
            }
            if number.as_str().parse::<usize>().ok() == Some(markers.len() + 1) {
                markers.push((marker.start(), marker.end()));
            } else if markers.is_empty() {
                break;
            }
        }

        if markers.len() < 2 {
            return vec![line];
        }

        markers
            .iter()
            .enumerate()
            .map(|(i, &(_, content_start))| {
                let end = markers.get(i + 1).map_or(line.len(), |&(start, _)| start);
                &line[content_start..end]
            })
            .collect()
    }

    fn strip_step_prefix(&self, step: &str) -> String {
        self.step_prefix.replace(step, "").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Reproducibility;

    #[test]
    fn test_extract_whole_text() {
        let object = extract_object("  {\"title\": \"x\"}  ").unwrap();
        assert_eq!(object["title"], "x");
    }

    #[test]
    fn test_extract_from_braces() {
        let raw = "Here you go:\n```json\n{\"title\": \"x\", \"nested\": {\"a\": 1}}\n```\nThanks!";
        let object = extract_object(raw).unwrap();
        assert_eq!(object["nested"]["a"], 1);
    }

    #[test]
    fn test_extract_failures() {
        assert!(extract_object("no json here").is_none());
        assert!(extract_object("} backwards {").is_none());
        assert!(extract_object("[1, 2, 3]").is_none());
        assert!(extract_object("{not: valid}").is_none());
    }

    #[test]
    fn test_no_structured_payload() {
        let normalizer = ReportNormalizer::new();
        let err = normalizer.normalize("just prose", "prompt").unwrap_err();
        assert!(matches!(err, PipelineError::NoStructuredPayload));
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let normalizer = ReportNormalizer::new();
        let report = normalizer
            .normalize("{\"description\": \"The footer colour looks off\"}", "")
            .unwrap();

        assert_eq!(report.title, "The footer colour looks off");
        assert!(report.steps.is_empty());
        assert_eq!(report.expected_result, "");
        assert_eq!(report.workaround, None);
        assert_eq!(report.priority, Priority::Minor);
        assert_eq!(report.reproducibility, Reproducibility::Always);
        assert_eq!(report.component, "");
    }

    #[test]
    fn test_untitled_fallback() {
        let normalizer = ReportNormalizer::new();
        let report = normalizer.normalize("{}", "").unwrap();
        assert_eq!(report.title, UNTITLED);
    }

    #[test]
    fn test_steps_from_string() {
        let normalizer = ReportNormalizer::new();
        let raw = r#"{"title": "t", "steps": "1. Open the app\n2) Tap save\n- Wait\n• Observe spinner\n\n"}"#;
        let report = normalizer.normalize(raw, "").unwrap();
        assert_eq!(
            report.steps,
            vec!["Open the app", "Tap save", "Wait", "Observe spinner"]
        );

        let inline = r#"{"title": "t", "steps": "1. Open the app 2. Tap save 3. Observe"}"#;
        let report = normalizer.normalize(inline, "").unwrap();
        assert_eq!(report.steps, vec!["Open the app", "Tap save", "Observe"]);
    }

    #[test]
    fn test_steps_keep_numbers_inside_text() {
        let normalizer = ReportNormalizer::new();
        let raw = r#"{"title": "t", "steps": "Set quantity to 5. Tap buy\nWait 2) minutes\n1. Open cart 3. Pay"}"#;
        let report = normalizer.normalize(raw, "").unwrap();
        assert_eq!(
            report.steps,
            vec!["Set quantity to 5. Tap buy", "Wait 2) minutes", "Open cart 3. Pay"]
        );

        let raw = r#"{"title": "t", "steps": ["1.5x zoom breaks layout", "10.0.2.2 must be reachable", "-5 degrees"]}"#;
        let report = normalizer.normalize(raw, "").unwrap();
        assert_eq!(
            report.steps,
            vec!["1.5x zoom breaks layout", "10.0.2.2 must be reachable", "-5 degrees"]
        );
    }

    #[test]
    fn test_round_trip_keeps_numeric_steps() {
        let original = Report {
            title: "Products: Quantity field rounds down".to_string(),
            description: "Entering a quantity loses the value".to_string(),
            steps: vec![
                "Set quantity to 5. Tap buy".to_string(),
                "Wait 2) minutes".to_string(),
                "1.5x zoom breaks layout".to_string(),
                "10.0.2.2 must be reachable".to_string(),
            ],
            expected_result: "Quantity stays 5".to_string(),
            actual_result: "Quantity shows 4".to_string(),
            component: "Products".to_string(),
            environment: "Android emulator".to_string(),
            reproducibility: Reproducibility::Always,
            workaround: None,
            impact: "Wrong order totals".to_string(),
            priority: Priority::Major,
        };

        let raw = serde_json::to_string(&original).unwrap();
        let normalizer = ReportNormalizer::new();
        assert_eq!(normalizer.normalize(&raw, "").unwrap(), original);
    }

    #[test]
    fn test_steps_from_array() {
        let normalizer = ReportNormalizer::new();
        let raw = r#"{"title": "t", "steps": ["Step 1: Open", "", "2. Close", 3]}"#;
        let report = normalizer.normalize(raw, "").unwrap();
        assert_eq!(report.steps, vec!["Open", "Close", "3"]);
    }

    #[test]
    fn test_enum_coercion() {
        let normalizer = ReportNormalizer::new();
        let raw = r#"{"title": "t", "priority": "P1", "reproducibility": "intermittent"}"#;
        let report = normalizer.normalize(raw, "").unwrap();
        assert_eq!(report.priority, Priority::Critical);
        assert_eq!(report.reproducibility, Reproducibility::Sometimes);

        let unknown = r#"{"title": "t", "priority": "whenever", "reproducibility": "often"}"#;
        let report = normalizer.normalize(unknown, "").unwrap();
        assert_eq!(report.priority, Priority::Minor);
        assert_eq!(report.reproducibility, Reproducibility::Always);
    }

    #[test]
    fn test_priority_inferred_when_missing() {
        let normalizer = ReportNormalizer::new();
        let raw = r#"{"title": "Layout glitch", "description": "A major misalignment and a trivial typo"}"#;
        let report = normalizer.normalize(raw, "").unwrap();
        assert_eq!(report.priority, Priority::Major);
    }

    #[test]
    fn test_end_to_end_login_scenario() {
        let normalizer = ReportNormalizer::new();
        let prompt = "Login fails with 500 error on mobile, happened only once";
        let raw = r#"{"title": "Login fails with 500 error", "description": "Server error on mobile login", "actualResult": "HTTP 500", "reproducibility": "always"}"#;

        let report = normalizer.normalize(raw, prompt).unwrap();

        assert_eq!(report.reproducibility, Reproducibility::Rarely);
        assert!(report.priority >= Priority::Major);
        assert_eq!(report.component, "Authentication");
        assert_eq!(report.title, "Authentication: Login fails with 500 error");
    }

    #[test]
    fn test_round_trip_is_idempotent() {
        let original = Report {
            title: "Authentication: Login button unresponsive".to_string(),
            description: "Tapping the login button does nothing".to_string(),
            steps: vec!["Open the app".to_string(), "Tap the login button".to_string()],
            expected_result: "The home screen opens".to_string(),
            actual_result: "Nothing happens".to_string(),
            component: "Authentication".to_string(),
            environment: "iOS 17, app 4.2".to_string(),
            reproducibility: Reproducibility::Always,
            workaround: Some("Use the web app".to_string()),
            impact: "Users cannot sign in on iOS".to_string(),
            priority: Priority::Critical,
        };

        let raw = serde_json::to_string(&original).unwrap();
        let normalizer = ReportNormalizer::new();
        assert_eq!(normalizer.normalize(&raw, "").unwrap(), original);
    }

    #[test]
    fn test_accepts_snake_case_aliases() {
        let normalizer = ReportNormalizer::new();
        let raw = r#"{"summary": "Checkout total wrong", "expected_result": "10", "actual_result": "12", "severity": "blocker", "environment": ["Chrome", "staging"]}"#;
        let report = normalizer.normalize(raw, "").unwrap();
        assert_eq!(report.title, "Payments: Checkout total wrong");
        assert_eq!(report.expected_result, "10");
        assert_eq!(report.actual_result, "12");
        assert_eq!(report.priority, Priority::Blocker);
        assert_eq!(report.environment, "Chrome, staging");
    }
}
