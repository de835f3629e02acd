//! HTTP streaming to the upstream model and the per-request relay loop.

use crate::error::PipelineError;
use crate::llm::prompt::system_prompt;
use crate::llm::provider::{ModelSettings, ProviderAdapter};
use crate::llm::relay::{ProtocolMarkers, StreamRelay};
use crate::models::{GenerationRequest, StreamEvent};
use crate::report::ReportNormalizer;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Client for one configured upstream model.
pub struct UpstreamClient {
    http_client: Client,
    adapter: Box<dyn ProviderAdapter>,
    settings: ModelSettings,
    markers: ProtocolMarkers,
}

impl UpstreamClient {
    pub fn new(settings: ModelSettings, markers: ProtocolMarkers) -> Result<Self, PipelineError> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| PipelineError::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            adapter: settings.provider.adapter(),
            settings,
            markers,
        })
    }

    /// Run one generation, sending events to `tx` until a terminal event
    /// or until the receiver goes away.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        normalizer: &ReportNormalizer,
        tx: &mpsc::Sender<StreamEvent>,
    ) {
        info!(
            "Generating report with {} ({} attachment(s), {} history turn(s))",
            self.settings.model_name,
            request.attachments().len(),
            request.history().len()
        );

        let mut relay = StreamRelay::new(self.markers.clone());
        let deadline = Duration::from_secs(self.settings.timeout_seconds);

        let outcome = tokio::select! {
            biased;
            _ = tx.closed() => Err(PipelineError::Cancelled),
            outcome = with_deadline(deadline, self.pump(request, &mut relay, tx)) => outcome,
        };

        complete_relay(outcome, &mut relay, normalizer, request.description(), tx).await;
        debug!("Relay finished in state {:?}", relay.state());
    }

    /// Open the upstream stream and relay it until the end sentinel.
    async fn pump(
        &self,
        request: &GenerationRequest,
        relay: &mut StreamRelay,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), PipelineError> {
        let url = self.adapter.endpoint(&self.settings.base_url);
        let body = self
            .adapter
            .request_body(&self.settings, &system_prompt(&self.markers), request);

        debug!("POST {}", url);

        let mut builder = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest(e, self.settings.timeout_seconds))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes_stream().map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| PipelineError::UpstreamUnavailable(e.to_string()))
        });

        relay_stream(Box::pin(bytes), self.adapter.as_ref(), relay, tx).await
    }
}

/// Start a generation on its own task and return the event receiver.
pub fn spawn_generation(
    client: Arc<UpstreamClient>,
    normalizer: Arc<ReportNormalizer>,
    request: GenerationRequest,
    channel_capacity: usize,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));

    tokio::spawn(async move {
        client.generate(&request, &normalizer, &tx).await;
    });

    rx
}

/// Bound `operation` by `deadline`.
pub async fn with_deadline<F>(deadline: Duration, operation: F) -> Result<(), PipelineError>
where
    F: Future<Output = Result<(), PipelineError>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(outcome) => outcome,
        Err(_) => Err(PipelineError::Timeout(deadline.as_secs())),
    }
}

/// Split a byte stream into lines, decode each one and feed the relay.
///
/// Returns once the adapter reports the end sentinel or the stream
/// closes. Malformed lines are logged and skipped. A final line without
/// a trailing newline gets one parse attempt. Returns `Cancelled` as
/// soon as the receiver is dropped.
pub async fn relay_stream<S>(
    mut bytes: S,
    adapter: &dyn ProviderAdapter,
    relay: &mut StreamRelay,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), PipelineError>
where
    S: Stream<Item = Result<Vec<u8>, PipelineError>> + Unpin,
{
    let mut line_buffer: Vec<u8> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => return Err(PipelineError::Cancelled),
            next = bytes.next() => next,
        };

        let chunk = match next {
            Some(chunk) => chunk?,
            None => break,
        };

        line_buffer.extend_from_slice(&chunk);
        while let Some(newline) = line_buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = line_buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            if handle_line(&line, adapter, relay, tx).await? {
                debug!("Upstream signalled end of stream");
                return Ok(());
            }
        }
    }

    if !line_buffer.is_empty() {
        let line = String::from_utf8_lossy(&line_buffer).into_owned();
        handle_line(&line, adapter, relay, tx).await?;
    }

    Ok(())
}

/// Returns `true` when the line was the end sentinel.
async fn handle_line(
    line: &str,
    adapter: &dyn ProviderAdapter,
    relay: &mut StreamRelay,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<bool, PipelineError> {
    match adapter.decode_line(line) {
        Ok(decoded) => {
            if let Some(text) = decoded.delta.and_then(|delta| relay.push(&delta)) {
                forward(tx, StreamEvent::Chunk(text)).await?;
            }
            Ok(decoded.done)
        }
        Err(PipelineError::MalformedChunk(reason)) => {
            warn!("Skipping malformed chunk: {}", reason);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn forward(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), PipelineError> {
    tx.send(event).await.map_err(|_| PipelineError::Cancelled)
}

/// Emit the terminal event for a finished relay loop.
///
/// Nothing is sent when the caller has disconnected.
pub async fn complete_relay(
    outcome: Result<(), PipelineError>,
    relay: &mut StreamRelay,
    normalizer: &ReportNormalizer,
    prompt: &str,
    tx: &mpsc::Sender<StreamEvent>,
) {
    let terminal = match outcome {
        Ok(()) => {
            if let Some(tail) = relay.flush() {
                if forward(tx, StreamEvent::Chunk(tail)).await.is_err() {
                    debug!("Receiver dropped before the final chunk");
                    return;
                }
            }
            match relay.finish(normalizer, prompt) {
                Ok(report) => {
                    info!("Report ready: {}", report.title);
                    StreamEvent::Complete(report)
                }
                Err(e) => {
                    warn!("Could not build a report: {}", e);
                    debug!("Raw model output:\n{}", relay.text());
                    StreamEvent::Error(e.to_string())
                }
            }
        }
        Err(PipelineError::Cancelled) => {
            debug!("Receiver dropped; abandoning relay");
            return;
        }
        Err(e) => {
            warn!("Relay failed: {}", e);
            relay.fail();
            StreamEvent::Error(e.to_string())
        }
    };

    if tx.send(terminal).await.is_err() {
        debug!("Receiver dropped before the terminal event");
    }
}
