//! Upstream completion providers.
//!
//! Each provider speaks a different streaming envelope. The adapter is
//! picked once from `ProviderKind` when the client is built; after that
//! the relay only sees decoded `LineEvent`s.

use crate::error::PipelineError;
use crate::models::{GenerationRequest, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Which wire format the upstream endpoint speaks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama's native NDJSON chat stream.
    #[default]
    Ollama,
    /// OpenAI-compatible `data:` lines (hosted proxies, vLLM, LM Studio).
    #[value(name = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub fn adapter(self) -> Box<dyn ProviderAdapter> {
        match self {
            ProviderKind::Ollama => Box::new(OllamaAdapter),
            ProviderKind::OpenAi => Box::new(OpenAiAdapter),
        }
    }
}

/// Settings for one upstream model.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub api_key: Option<String>,
}

/// One decoded envelope line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineEvent {
    /// Incremental text, if the line carried any.
    pub delta: Option<String>,
    /// The line was the end sentinel.
    pub done: bool,
}

impl LineEvent {
    fn skip() -> Self {
        Self::default()
    }

    fn done() -> Self {
        Self {
            delta: None,
            done: true,
        }
    }
}

/// Request construction and line decoding for one provider.
pub trait ProviderAdapter: Send + Sync {
    fn endpoint(&self, base_url: &str) -> String;

    fn request_body(
        &self,
        settings: &ModelSettings,
        system_prompt: &str,
        request: &GenerationRequest,
    ) -> Value;

    /// Decode one line. Undecodable lines yield `MalformedChunk`; an
    /// error reported by the upstream inside the stream yields
    /// `UpstreamUnavailable`.
    fn decode_line(&self, line: &str) -> Result<LineEvent, PipelineError>;
}

/// An `"error": null` field is not an error.
fn upstream_error(envelope: &Value) -> Option<PipelineError> {
    let error = envelope.get("error").filter(|e| !e.is_null())?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("unknown error");
    Some(PipelineError::UpstreamUnavailable(message.to_string()))
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.filter(|t| !t.is_empty()).map(str::to_string)
}

/// Message in the Ollama chat history.
#[derive(Debug, Clone, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama `/api/chat` (and `/api/generate`) streams.
pub struct OllamaAdapter;

impl ProviderAdapter for OllamaAdapter {
    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/api/chat", base_url.trim_end_matches('/'))
    }

    fn request_body(
        &self,
        settings: &ModelSettings,
        system_prompt: &str,
        request: &GenerationRequest,
    ) -> Value {
        let mut messages = vec![OllamaMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
            images: Vec::new(),
        }];

        messages.extend(request.history().iter().map(|turn| OllamaMessage {
            role: turn.role.to_string(),
            content: turn.content.clone(),
            images: Vec::new(),
        }));

        messages.push(OllamaMessage {
            role: Role::User.to_string(),
            content: request.description().to_string(),
            images: request
                .attachments()
                .iter()
                .map(|blob| blob.data_base64.clone())
                .collect(),
        });

        let body = OllamaChatRequest {
            model: settings.model_name.clone(),
            messages,
            stream: true,
            options: OllamaOptions {
                temperature: settings.temperature,
            },
        };

        serde_json::to_value(body).unwrap_or(Value::Null)
    }

    fn decode_line(&self, line: &str) -> Result<LineEvent, PipelineError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineEvent::skip());
        }

        let envelope: Value = serde_json::from_str(line)
            .map_err(|e| PipelineError::MalformedChunk(format!("{}: {}", e, line)))?;

        if let Some(err) = upstream_error(&envelope) {
            return Err(err);
        }

        let delta = non_empty(
            envelope
                .pointer("/message/content")
                .or_else(|| envelope.get("response"))
                .and_then(Value::as_str),
        );
        let done = envelope
            .get("done")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(LineEvent { delta, done })
    }
}

/// OpenAI-compatible `/v1/chat/completions` streams.
pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
    }

    fn request_body(
        &self,
        settings: &ModelSettings,
        system_prompt: &str,
        request: &GenerationRequest,
    ) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": system_prompt })];

        messages.extend(
            request
                .history()
                .iter()
                .map(|turn| json!({ "role": turn.role.to_string(), "content": turn.content })),
        );

        let content = if request.attachments().is_empty() {
            json!(request.description())
        } else {
            let mut parts = vec![json!({ "type": "text", "text": request.description() })];
            parts.extend(request.attachments().iter().map(|blob| {
                json!({ "type": "image_url", "image_url": { "url": blob.data_uri() } })
            }));
            Value::Array(parts)
        };
        messages.push(json!({ "role": "user", "content": content }));

        json!({
            "model": settings.model_name,
            "messages": messages,
            "stream": true,
            "temperature": settings.temperature,
        })
    }

    fn decode_line(&self, line: &str) -> Result<LineEvent, PipelineError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return Ok(LineEvent::skip());
        }

        let payload = match line.strip_prefix("data:") {
            Some(rest) => rest.trim(),
            // `event:`, `id:` and `retry:` fields carry nothing we need.
            None if line.starts_with("event:")
                || line.starts_with("id:")
                || line.starts_with("retry:") =>
            {
                return Ok(LineEvent::skip())
            }
            None => line,
        };

        if payload == "[DONE]" {
            return Ok(LineEvent::done());
        }

        let envelope: Value = serde_json::from_str(payload)
            .map_err(|e| PipelineError::MalformedChunk(format!("{}: {}", e, payload)))?;

        if let Some(err) = upstream_error(&envelope) {
            return Err(err);
        }

        let delta = non_empty(
            envelope
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str),
        );

        Ok(LineEvent { delta, done: false })
    }
}
