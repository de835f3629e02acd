//! Field coercion and inference heuristics for bug reports.
//!
//! Raw enum values from the model are matched against synonym tiers;
//! free text is scanned for cues. Tiers are always checked from the
//! strongest to the weakest, so the first match is the highest tier.

use crate::models::{Priority, Reproducibility};
use regex::Regex;

/// Build a case-insensitive regex matching any cue as a whole word.
///
/// Word boundaries are only added next to word characters so cues such
/// as `100%` still match.
fn cue_regex(cues: &[&str]) -> Regex {
    let alternatives: Vec<String> = cues
        .iter()
        .map(|cue| {
            let starts_word = cue.chars().next().is_some_and(|c| c.is_alphanumeric());
            let ends_word = cue.chars().last().is_some_and(|c| c.is_alphanumeric());
            format!(
                "{}{}{}",
                if starts_word { r"\b" } else { "" },
                regex::escape(cue),
                if ends_word { r"\b" } else { "" }
            )
        })
        .collect();

    Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))
        .expect("escaped cue literals always form a valid pattern")
}

const PRIORITY_SYNONYMS: [(Priority, &[&str]); 5] = [
    (
        Priority::Blocker,
        &["p0", "blocker", "blocking", "urgent", "showstopper", "show stopper", "highest"],
    ),
    (Priority::Critical, &["p1", "critical", "severe", "high"]),
    (Priority::Major, &["p2", "major", "medium", "normal", "moderate"]),
    (Priority::Minor, &["p3", "minor", "low"]),
    (Priority::Trivial, &["p4", "trivial", "lowest", "cosmetic"]),
];

const PRIORITY_TEXT_CUES: [(Priority, &[&str]); 5] = [
    (
        Priority::Blocker,
        &["blocker", "blocking", "urgent", "showstopper", "outage", "p0"],
    ),
    (
        Priority::Critical,
        &["critical", "crash", "crashes", "crashed", "data loss", "security", "p1"],
    ),
    (
        Priority::Major,
        &[
            "major", "fail", "fails", "failed", "failing", "failure", "error", "errors",
            "broken", "exception", "500", "p2",
        ],
    ),
    (Priority::Minor, &["minor", "p3"]),
    (Priority::Trivial, &["trivial", "cosmetic", "typo", "p4"]),
];

const RARELY_SYNONYMS: &[&str] = &[
    "rarely",
    "rare",
    "once",
    "one time",
    "hard to reproduce",
    "difficult to reproduce",
    "unable to reproduce",
    "cannot reproduce",
    "can't reproduce",
    "can’t reproduce",
    "could not reproduce",
    "not reproducible",
];

const SOMETIMES_SYNONYMS: &[&str] = &[
    "sometimes",
    "intermittent",
    "intermittently",
    "sporadic",
    "sporadically",
    "occasional",
    "occasionally",
    "random",
    "randomly",
    "flaky",
    "50%",
];

const ALWAYS_SYNONYMS: &[&str] = &[
    "always",
    "consistently",
    "consistent",
    "every time",
    "100%",
    "reproducible",
];

const RARELY_TEXT_CUES: &[&str] = &[
    "rarely",
    "only once",
    "happened once",
    "just once",
    "one time",
    "one-off",
    "hard to reproduce",
    "difficult to reproduce",
    "unable to reproduce",
    "cannot reproduce",
    "can't reproduce",
    "can’t reproduce",
    "could not reproduce",
    "not reproducible",
];

const SOMETIMES_TEXT_CUES: &[&str] = &[
    "sometimes",
    "intermittent",
    "intermittently",
    "sporadic",
    "sporadically",
    "occasionally",
    "randomly",
    "flaky",
    "not always",
    "from time to time",
];

/// Component keyword families, most specific first.
const COMPONENT_FAMILIES: &[(&str, &[&str])] = &[
    ("BOM", &["bom", "boms", "bill of materials", "bill-of-materials"]),
    (
        "Authentication",
        &[
            "login", "log in", "logout", "log out", "sign in", "sign-in", "signin", "sign out",
            "password", "sso", "2fa", "mfa", "otp", "two-factor", "session expired",
            "authentication",
        ],
    ),
    (
        "Payments",
        &["payment", "payments", "checkout", "invoice", "invoices", "billing", "refund", "credit card"],
    ),
    ("Reporting", &["dashboard", "dashboards", "chart", "charts", "analytics", "export"]),
    ("Search", &["search", "search results", "filter", "filters", "sorting"]),
    (
        "Notifications",
        &["notification", "notifications", "push notification", "email", "emails", "sms"],
    ),
    (
        "Products",
        &["product", "products", "catalog", "catalogue", "inventory", "sku", "part number"],
    ),
    (
        "User Interface",
        &["button", "layout", "modal", "dropdown", "tooltip", "dark mode", "css", "alignment"],
    ),
];

/// Compiled cue tables, built once per normalizer.
pub struct Heuristics {
    priority_synonyms: Vec<(Priority, Regex)>,
    priority_cues: Vec<(Priority, Regex)>,
    rarely_synonyms: Regex,
    sometimes_synonyms: Regex,
    always_synonyms: Regex,
    rarely_cues: Regex,
    sometimes_cues: Regex,
    components: ComponentClassifier,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self::new()
    }
}

impl Heuristics {
    pub fn new() -> Self {
        let compile = |table: &[(Priority, &[&str])]| -> Vec<(Priority, Regex)> {
            table
                .iter()
                .map(|(priority, cues)| (*priority, cue_regex(cues)))
                .collect()
        };

        Self {
            priority_synonyms: compile(&PRIORITY_SYNONYMS),
            priority_cues: compile(&PRIORITY_TEXT_CUES),
            rarely_synonyms: cue_regex(RARELY_SYNONYMS),
            sometimes_synonyms: cue_regex(SOMETIMES_SYNONYMS),
            always_synonyms: cue_regex(ALWAYS_SYNONYMS),
            rarely_cues: cue_regex(RARELY_TEXT_CUES),
            sometimes_cues: cue_regex(SOMETIMES_TEXT_CUES),
            components: ComponentClassifier::new(COMPONENT_FAMILIES),
        }
    }

    /// Coerce a raw priority value.
    ///
    /// Returns `None` when the value is blank or unrecognised so the
    /// caller can fall back to inference.
    pub fn coerce_priority(&self, raw: &str) -> Option<Priority> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        self.priority_synonyms
            .iter()
            .find(|(_, pattern)| pattern.is_match(raw))
            .map(|(priority, _)| *priority)
            .or_else(|| title_case(raw).parse().ok())
    }

    /// Coerce a raw reproducibility value; unrecognised values are `Always`.
    pub fn coerce_reproducibility(&self, raw: &str) -> Reproducibility {
        if self.rarely_synonyms.is_match(raw) {
            Reproducibility::Rarely
        } else if self.sometimes_synonyms.is_match(raw) {
            Reproducibility::Sometimes
        } else if self.always_synonyms.is_match(raw) {
            Reproducibility::Always
        } else {
            title_case(raw.trim())
                .parse()
                .unwrap_or(Reproducibility::Always)
        }
    }

    /// Highest priority tier with a cue in `text`.
    pub fn infer_priority(&self, text: &str) -> Option<Priority> {
        self.priority_cues
            .iter()
            .find(|(_, pattern)| pattern.is_match(text))
            .map(|(priority, _)| *priority)
    }

    /// Explicit reproducibility cues in `text`; rarely beats sometimes.
    pub fn infer_reproducibility(&self, text: &str) -> Option<Reproducibility> {
        if self.rarely_cues.is_match(text) {
            Some(Reproducibility::Rarely)
        } else if self.sometimes_cues.is_match(text) {
            Some(Reproducibility::Sometimes)
        } else {
            None
        }
    }

    pub fn classify_component(&self, text: &str) -> Option<&'static str> {
        self.components.classify(text)
    }
}

/// Ordered keyword families mapping text to a canonical component.
pub struct ComponentClassifier {
    families: Vec<(&'static str, Regex)>,
}

impl ComponentClassifier {
    pub fn new(families: &[(&'static str, &[&str])]) -> Self {
        Self {
            families: families
                .iter()
                .map(|(name, cues)| (*name, cue_regex(cues)))
                .collect(),
        }
    }

    /// First family with a matching trigger, in declaration order.
    pub fn classify(&self, text: &str) -> Option<&'static str> {
        self.families
            .iter()
            .find(|(_, pattern)| pattern.is_match(text))
            .map(|(name, _)| *name)
    }
}

/// Prefix `title` with `component` unless it already starts with it.
///
/// Existing ` > ` separators become `: ` when the prefix is added.
pub fn prefix_title(title: &str, component: &str) -> String {
    let component = component.trim();
    if component.is_empty() {
        return title.to_string();
    }

    let lower_title = title.to_lowercase();
    let lower_component = component.to_lowercase();
    let bracketed = format!("[{}]", lower_component);
    if lower_title.starts_with(&lower_component) || lower_title.starts_with(&bracketed) {
        return title.to_string();
    }

    format!("{}: {}", component, title.replace(" > ", ": "))
}

/// `"mAJOR issue"` -> `"Major Issue"`.
fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_priority_synonyms() {
        let h = Heuristics::new();
        assert_eq!(h.coerce_priority("P0"), Some(Priority::Blocker));
        assert_eq!(h.coerce_priority("urgent"), Some(Priority::Blocker));
        assert_eq!(h.coerce_priority("Highest"), Some(Priority::Blocker));
        assert_eq!(h.coerce_priority("High"), Some(Priority::Critical));
        assert_eq!(h.coerce_priority("medium"), Some(Priority::Major));
        assert_eq!(h.coerce_priority("p3"), Some(Priority::Minor));
        assert_eq!(h.coerce_priority("lowest"), Some(Priority::Trivial));
        assert_eq!(h.coerce_priority("MAJOR"), Some(Priority::Major));
        assert_eq!(h.coerce_priority("whenever"), None);
        assert_eq!(h.coerce_priority("  "), None);
    }

    #[test]
    fn test_coerce_reproducibility_synonyms() {
        let h = Heuristics::new();
        assert_eq!(h.coerce_reproducibility("100%"), Reproducibility::Always);
        assert_eq!(h.coerce_reproducibility("Consistently"), Reproducibility::Always);
        assert_eq!(h.coerce_reproducibility("intermittent"), Reproducibility::Sometimes);
        assert_eq!(h.coerce_reproducibility("sporadic"), Reproducibility::Sometimes);
        assert_eq!(h.coerce_reproducibility("hard to reproduce"), Reproducibility::Rarely);
        assert_eq!(h.coerce_reproducibility("Unable to reproduce"), Reproducibility::Rarely);
        assert_eq!(h.coerce_reproducibility("not reproducible"), Reproducibility::Rarely);
        assert_eq!(h.coerce_reproducibility("unclear"), Reproducibility::Always);
        assert_eq!(h.coerce_reproducibility(""), Reproducibility::Always);
    }

    #[test]
    fn test_infer_priority_highest_tier_wins() {
        let h = Heuristics::new();
        assert_eq!(
            h.infer_priority("A major regression next to a trivial typo"),
            Some(Priority::Major)
        );
        assert_eq!(h.infer_priority("App crashes on save"), Some(Priority::Critical));
        assert_eq!(h.infer_priority("Login fails with 500 error"), Some(Priority::Major));
        assert_eq!(h.infer_priority("The footer colour looks off"), None);
    }

    #[test]
    fn test_infer_reproducibility_rarely_beats_sometimes() {
        let h = Heuristics::new();
        assert_eq!(
            h.infer_reproducibility("It sometimes hangs, but rarely crashes"),
            Some(Reproducibility::Rarely)
        );
        assert_eq!(
            h.infer_reproducibility("flaky on CI"),
            Some(Reproducibility::Sometimes)
        );
        assert_eq!(
            h.infer_reproducibility("happened only once on mobile"),
            Some(Reproducibility::Rarely)
        );
        assert_eq!(h.infer_reproducibility("once the page loads it breaks"), None);
    }

    #[test]
    fn test_component_specific_family_wins() {
        let h = Heuristics::new();
        assert_eq!(
            h.classify_component("Product page shows wrong BOM totals"),
            Some("BOM")
        );
        assert_eq!(h.classify_component("Product page is slow"), Some("Products"));
        assert_eq!(h.classify_component("Login fails"), Some("Authentication"));
        assert_eq!(h.classify_component("Nothing relevant"), None);
        // Whole words only.
        assert_eq!(h.classify_component("bombastic loading spinner"), None);
    }

    #[test]
    fn test_prefix_title() {
        assert_eq!(
            prefix_title("Login fails", "Authentication"),
            "Authentication: Login fails"
        );
        assert_eq!(
            prefix_title("Settings > Profile > Save fails", "Authentication"),
            "Authentication: Settings: Profile: Save fails"
        );
        assert_eq!(
            prefix_title("authentication: Login fails", "Authentication"),
            "authentication: Login fails"
        );
        assert_eq!(
            prefix_title("[Authentication] Login fails", "Authentication"),
            "[Authentication] Login fails"
        );
        assert_eq!(prefix_title("Login fails", ""), "Login fails");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("mAJOR issue"), "Major Issue");
        assert_eq!(title_case(""), "");
    }
}
