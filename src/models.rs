//! Data models for the report pipeline.
//!
//! This module contains the core data structures shared by the relay,
//! the normalizer and the status rollup: requests, stream events,
//! bug reports and status rows.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Author of a prior conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A prior turn of the conversation, replayed to the model in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// An attached media blob (usually a screenshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaBlob {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64-encoded payload.
    pub data_base64: String,
}

impl MediaBlob {
    /// Encode raw bytes into a blob.
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            data_base64: BASE64_STANDARD.encode(bytes),
        }
    }

    /// `data:` URI form used by OpenAI-compatible endpoints.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data_base64)
    }
}

/// A request to generate one bug report.
///
/// Fields are private so the request cannot change after it is handed
/// to a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    description: String,
    #[serde(default)]
    attachments: Vec<MediaBlob>,
    #[serde(default)]
    history: Vec<ConversationTurn>,
}

impl GenerationRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            attachments: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, blob: MediaBlob) -> Self {
        self.attachments.push(blob);
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn attachments(&self) -> &[MediaBlob] {
        &self.attachments
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }
}

/// Error returned when an enum name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised value: {0}")]
pub struct UnknownVariant(pub String);

/// Priority of a bug report, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Trivial,
    Minor,
    Major,
    Critical,
    Blocker,
}

impl Priority {
    /// All priorities, highest first.
    pub const DESCENDING: [Priority; 5] = [
        Priority::Blocker,
        Priority::Critical,
        Priority::Major,
        Priority::Minor,
        Priority::Trivial,
    ];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Trivial => write!(f, "Trivial"),
            Priority::Minor => write!(f, "Minor"),
            Priority::Major => write!(f, "Major"),
            Priority::Critical => write!(f, "Critical"),
            Priority::Blocker => write!(f, "Blocker"),
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trivial" => Ok(Priority::Trivial),
            "minor" => Ok(Priority::Minor),
            "major" => Ok(Priority::Major),
            "critical" => Ok(Priority::Critical),
            "blocker" => Ok(Priority::Blocker),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// How reliably a bug can be reproduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reproducibility {
    Always,
    Sometimes,
    Rarely,
}

impl fmt::Display for Reproducibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reproducibility::Always => write!(f, "Always"),
            Reproducibility::Sometimes => write!(f, "Sometimes"),
            Reproducibility::Rarely => write!(f, "Rarely"),
        }
    }
}

impl FromStr for Reproducibility {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(Reproducibility::Always),
            "sometimes" => Ok(Reproducibility::Sometimes),
            "rarely" => Ok(Reproducibility::Rarely),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// A structured bug report.
///
/// This is the shape the downstream issue-creation step consumes, so
/// field names and enum values must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Short title, never empty.
    pub title: String,
    pub description: String,
    /// Ordered reproduction steps, each non-empty.
    pub steps: Vec<String>,
    pub expected_result: String,
    pub actual_result: String,
    pub component: String,
    pub environment: String,
    pub reproducibility: Reproducibility,
    pub workaround: Option<String>,
    pub impact: String,
    pub priority: Priority,
}

/// One event of a generation stream.
///
/// Any number of `Chunk` events are followed by exactly one terminal
/// `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Chunk(String),
    Complete(Report),
    Error(String),
}

impl StreamEvent {
    /// Event name used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Chunk(_) => "chunk",
            StreamEvent::Complete(_) => "complete",
            StreamEvent::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }

    /// Render the event as one Server-Sent-Events frame.
    pub fn to_sse(&self) -> String {
        let data = match self {
            StreamEvent::Chunk(text) => serde_json::json!({ "text": text }),
            StreamEvent::Complete(report) => {
                serde_json::to_value(report).unwrap_or(serde_json::Value::Null)
            }
            StreamEvent::Error(message) => serde_json::json!({ "message": message }),
        };
        format!("event: {}\ndata: {}\n\n", self.kind(), data)
    }
}

/// Outcome of a single test status lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
    Unknown,
}

impl TestStatus {
    /// Sort rank for rollups: failures first, passes last.
    pub fn rank(&self) -> u8 {
        match self {
            TestStatus::Fail => 0,
            TestStatus::Unknown => 1,
            TestStatus::Pass => 2,
        }
    }

    /// Returns an emoji representation of the status.
    pub fn emoji(&self) -> &'static str {
        match self {
            TestStatus::Pass => "🟢",
            TestStatus::Fail => "🔴",
            TestStatus::Unknown => "⚪",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One row of a status rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub key: String,
    pub summary: String,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusRow {
    /// A row for a lookup that failed.
    pub fn unknown(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            summary: String::new(),
            status: TestStatus::Unknown,
            error: Some(error.into()),
        }
    }
}
