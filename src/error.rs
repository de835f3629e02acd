//! Error taxonomy for the report pipeline.

use thiserror::Error;

/// Failures surfaced by the relay, the normalizer and the tracker lookup.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transport-level failure opening or reading the completion stream.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream answered with a non-success HTTP status.
    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("upstream timed out after {0}s")]
    Timeout(u64),

    /// One envelope line could not be decoded. Logged and skipped.
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    /// No parseable object could be located in the model output.
    #[error("no structured payload found in model output")]
    NoStructuredPayload,

    /// The caller went away before the stream finished.
    #[error("caller disconnected")]
    Cancelled,
}

impl PipelineError {
    /// Whether a lookup that failed this way is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::UpstreamUnavailable(_) | PipelineError::Timeout(_) => true,
            PipelineError::UpstreamStatus { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// Map a reqwest failure, keeping timeouts distinct.
    pub fn from_reqwest(err: reqwest::Error, timeout_seconds: u64) -> Self {
        if err.is_timeout() {
            PipelineError::Timeout(timeout_seconds)
        } else if err.is_connect() {
            PipelineError::UpstreamUnavailable(format!("cannot connect: {}", err))
        } else {
            PipelineError::UpstreamUnavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let retryable = PipelineError::UpstreamStatus {
            status: 503,
            body: String::new(),
        };
        assert!(retryable.is_retryable());

        let not_found = PipelineError::UpstreamStatus {
            status: 404,
            body: String::new(),
        };
        assert!(!not_found.is_retryable());

        assert!(PipelineError::Timeout(5).is_retryable());
        assert!(!PipelineError::NoStructuredPayload.is_retryable());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            PipelineError::Timeout(30).to_string(),
            "upstream timed out after 30s"
        );
        assert_eq!(
            PipelineError::NoStructuredPayload.to_string(),
            "no structured payload found in model output"
        );
    }
}
