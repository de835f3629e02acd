//! Incremental split of a model stream into narrative and payload.
//!
//! The model is asked to talk to the user first and then emit a JSON
//! object between two markers. `StreamRelay` forwards the narrative as
//! it arrives, swallows everything from the begin marker on, and once
//! the stream ends hands the captured payload to the normalizer.
//!
//! A marker may be split across chunks. The relay never forwards a
//! trailing fragment that could still grow into the begin marker; that
//! fragment is held until the next chunk settles it, or flushed when the
//! stream ends without a marker.

use crate::error::PipelineError;
use crate::models::Report;
use crate::report::ReportNormalizer;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BEGIN_MARKER: &str = "<<BEGIN_JSON>>";
pub const DEFAULT_END_MARKER: &str = "<<END_JSON>>";

#[derive(Debug, Error)]
#[error("invalid protocol marker {0:?}: markers must be non-empty ASCII")]
pub struct InvalidMarker(pub String);

/// Begin/end delimiters around the structured payload. Matched
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMarkers {
    begin: String,
    end: String,
    begin_lower: String,
    end_lower: String,
}

impl Default for ProtocolMarkers {
    fn default() -> Self {
        Self {
            begin: DEFAULT_BEGIN_MARKER.to_string(),
            end: DEFAULT_END_MARKER.to_string(),
            begin_lower: DEFAULT_BEGIN_MARKER.to_ascii_lowercase(),
            end_lower: DEFAULT_END_MARKER.to_ascii_lowercase(),
        }
    }
}

impl ProtocolMarkers {
    pub fn new(begin: &str, end: &str) -> Result<Self, InvalidMarker> {
        for marker in [begin, end] {
            if marker.is_empty() || !marker.is_ascii() {
                return Err(InvalidMarker(marker.to_string()));
            }
        }

        Ok(Self {
            begin: begin.to_string(),
            end: end.to_string(),
            begin_lower: begin.to_ascii_lowercase(),
            end_lower: end.to_ascii_lowercase(),
        })
    }

    pub fn begin(&self) -> &str {
        &self.begin
    }

    pub fn end(&self) -> &str {
        &self.end
    }
}

/// Where the relay is in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Forwarding narrative text.
    Preamble,
    /// Begin marker seen; buffering the payload silently.
    JsonCapture,
    /// A report was produced.
    Done,
    /// The stream or the payload failed.
    Error,
}

/// Per-request relay state. Not shared between requests.
#[derive(Debug)]
pub struct StreamRelay {
    markers: ProtocolMarkers,
    text: String,
    /// Byte offset up to which `text` has been forwarded or consumed.
    forwarded: usize,
    state: RelayState,
}

impl StreamRelay {
    pub fn new(markers: ProtocolMarkers) -> Self {
        Self {
            markers,
            text: String::new(),
            forwarded: 0,
            state: RelayState::Preamble,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Everything received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Feed one delta. Returns the narrative text that is now safe to
    /// forward, if any.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.text.push_str(delta);
        if self.state != RelayState::Preamble {
            return None;
        }

        // Only the unforwarded tail can still contain the begin marker.
        let window = &self.text[self.forwarded..];
        if let Some(pos) = find_ignore_ascii_case(window, &self.markers.begin_lower) {
            let marker_at = self.forwarded + pos;
            let narrative = self.text[self.forwarded..marker_at].to_string();
            self.forwarded = marker_at;
            self.state = RelayState::JsonCapture;
            debug!("Begin marker found at byte {}; capturing payload", marker_at);
            return non_empty(narrative);
        }

        let held = partial_marker_len(window, &self.markers.begin_lower);
        let safe_end = self.text.len() - held;
        let narrative = self.text[self.forwarded..safe_end].to_string();
        self.forwarded = safe_end;
        non_empty(narrative)
    }

    /// Release a held fragment once the stream has ended. Only returns
    /// text while still in the preamble.
    pub fn flush(&mut self) -> Option<String> {
        if self.state != RelayState::Preamble {
            return None;
        }
        let rest = self.text[self.forwarded..].to_string();
        self.forwarded = self.text.len();
        non_empty(rest)
    }

    /// The text between the markers, or the whole text when the begin
    /// marker never appeared. A begin marker without an end marker
    /// yields everything after it.
    pub fn payload(&self) -> &str {
        let lower = self.text.to_ascii_lowercase();
        let Some(begin_at) = lower.find(&self.markers.begin_lower) else {
            return &self.text;
        };

        let start = begin_at + self.markers.begin_lower.len();
        match lower[start..].find(&self.markers.end_lower) {
            Some(len) => &self.text[start..start + len],
            None => &self.text[start..],
        }
    }

    /// Normalize the payload into a report. `prompt` is the user's
    /// original description.
    pub fn finish(
        &mut self,
        normalizer: &ReportNormalizer,
        prompt: &str,
    ) -> Result<Report, PipelineError> {
        let result = normalizer.normalize(self.payload(), prompt);
        self.state = match result {
            Ok(_) => RelayState::Done,
            Err(_) => RelayState::Error,
        };
        result
    }

    /// Mark the relay as failed after a transport error.
    pub fn fail(&mut self) {
        self.state = RelayState::Error;
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// `needle_lower` must already be ASCII lowercase.
fn find_ignore_ascii_case(haystack: &str, needle_lower: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle_lower)
}

/// Length of the longest proper prefix of the marker that `window` ends
/// with. Markers are ASCII so the cut always falls on a char boundary.
fn partial_marker_len(window: &str, marker_lower: &str) -> usize {
    let window = window.as_bytes();
    let marker = marker_lower.as_bytes();
    let longest = (marker.len() - 1).min(window.len());

    (1..=longest)
        .rev()
        .find(|&len| window[window.len() - len..].eq_ignore_ascii_case(&marker[..len]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Reproducibility};

    fn feed(relay: &mut StreamRelay, chunks: &[&str]) -> String {
        let mut forwarded = String::new();
        for chunk in chunks {
            if let Some(text) = relay.push(chunk) {
                forwarded.push_str(&text);
            }
        }
        forwarded
    }

    #[test]
    fn test_marker_validation() {
        assert!(ProtocolMarkers::new("", "<<END>>").is_err());
        assert!(ProtocolMarkers::new("«BEGIN»", "<<END>>").is_err());
        let markers = ProtocolMarkers::new("<<Json>>", "<</Json>>").unwrap();
        assert_eq!(markers.begin(), "<<Json>>");
    }

    #[test]
    fn test_partial_marker_len() {
        assert_eq!(partial_marker_len("text <<BEG", "<<begin_json>>"), 5);
        assert_eq!(partial_marker_len("text <", "<<begin_json>>"), 1);
        assert_eq!(partial_marker_len("text", "<<begin_json>>"), 0);
        assert_eq!(partial_marker_len("<<begin_json>", "<<begin_json>>"), 13);
        assert_eq!(partial_marker_len("", "<<begin_json>>"), 0);
    }

    #[test]
    fn test_forwards_narrative_before_marker() {
        let mut relay = StreamRelay::new(ProtocolMarkers::default());

        assert_eq!(relay.push("Looks like a login "), Some("Looks like a login ".to_string()));
        assert_eq!(relay.push("issue.\n"), Some("issue.\n".to_string()));
        assert_eq!(relay.push("<<BEGIN_JSON>>{\"title\":"), None);
        assert_eq!(relay.state(), RelayState::JsonCapture);
        assert_eq!(relay.push("\"x\"}<<END_JSON>>"), None);
        assert_eq!(relay.flush(), None);
        assert_eq!(relay.payload(), "{\"title\":\"x\"}");
    }

    #[test]
    fn test_split_marker_is_never_forwarded() {
        let mut relay = StreamRelay::new(ProtocolMarkers::default());
        let forwarded = feed(
            &mut relay,
            &["Checking now.<<BEG", "IN_JS", "ON>>{\"title\": \"t\"}", "<<END_", "JSON>>"],
        );

        assert_eq!(forwarded, "Checking now.");
        assert_eq!(relay.state(), RelayState::JsonCapture);
        assert_eq!(relay.payload(), "{\"title\": \"t\"}");
    }

    #[test]
    fn test_false_marker_prefix_is_released() {
        let mut relay = StreamRelay::new(ProtocolMarkers::default());

        assert_eq!(relay.push("a <<B"), Some("a ".to_string()));
        assert_eq!(relay.push("OLD>> b"), Some("<<BOLD>> b".to_string()));
        assert_eq!(relay.state(), RelayState::Preamble);
    }

    #[test]
    fn test_no_marker_forwards_everything() {
        let mut relay = StreamRelay::new(ProtocolMarkers::default());
        let mut forwarded = feed(&mut relay, &["Plain answer with {\"title\": \"x\"} <"]);
        forwarded.push_str(&relay.flush().unwrap_or_default());

        assert_eq!(forwarded, relay.text());
        assert_eq!(relay.payload(), relay.text());

        let report = relay.finish(&ReportNormalizer::new(), "").unwrap();
        assert_eq!(report.title, "x");
        assert_eq!(relay.state(), RelayState::Done);
    }

    #[test]
    fn test_markers_match_case_insensitively() {
        let mut relay = StreamRelay::new(ProtocolMarkers::default());
        let forwarded = feed(&mut relay, &["hi <<begin_json>>{}<<End_Json>> trailing"]);

        assert_eq!(forwarded, "hi ");
        assert_eq!(relay.payload(), "{}");
    }

    #[test]
    fn test_begin_without_end_takes_rest() {
        let mut relay = StreamRelay::new(ProtocolMarkers::default());
        feed(&mut relay, &["<<BEGIN_JSON>> {\"title\": \"cut off\"} "]);
        assert_eq!(relay.payload(), " {\"title\": \"cut off\"} ");
    }

    #[test]
    fn test_finish_without_object_is_error() {
        let mut relay = StreamRelay::new(ProtocolMarkers::default());
        feed(&mut relay, &["I could not produce a report."]);

        let err = relay.finish(&ReportNormalizer::new(), "").unwrap_err();
        assert!(matches!(err, PipelineError::NoStructuredPayload));
        assert_eq!(relay.state(), RelayState::Error);
        assert_eq!(relay.text(), "I could not produce a report.");
    }

    #[test]
    fn test_login_scenario_end_to_end() {
        let mut relay = StreamRelay::new(ProtocolMarkers::default());
        let prompt = "Login fails with 500 error on mobile, happened only once";

        let forwarded = feed(
            &mut relay,
            &[
                "This looks like a server-side failure in sign-in. ",
                "<<BEGIN_",
                "JSON>>\n{\"title\": \"Login fails with 500 error\", ",
                "\"actualResult\": \"HTTP 500\", \"reproducibility\": \"always\", ",
                "\"priority\": \"major\"}\n<<END_JSON>>",
            ],
        );

        assert_eq!(forwarded, "This looks like a server-side failure in sign-in. ");
        assert!(!forwarded.contains("<<"));

        let report = relay.finish(&ReportNormalizer::new(), prompt).unwrap();
        assert_eq!(report.reproducibility, Reproducibility::Rarely);
        assert!(report.priority >= Priority::Major);
        assert_eq!(report.component, "Authentication");
        assert!(report.title.starts_with("Authentication: "));
    }
}
