pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod markup;
pub mod protocol;
pub mod render;
pub mod stream;
pub mod transcript;

use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{info, warn};

use config::Settings;
use error::ChatError;
use markup::{MarkupScanner, ScanReport, VisualDocumentParser};
use protocol::{ChatMessage, ChatRequest, ModelList};
use render::{DetachedLayoutEngine, GraphRenderResponse, LayoutEngine, MarkdownRenderer};
use stream::{StreamConsumer, StreamEvent, Termination};
use transcript::Transcript;

// ---------------------------------------------------------------------------
// Turn summary
// ---------------------------------------------------------------------------

/// Outcome of one assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    /// Index of the assistant message in the transcript.
    pub message_index: usize,
    /// Final assembled text, possibly partial.
    pub text: String,
    pub termination: Termination,
    pub deltas: usize,
    pub malformed: usize,
    /// Result of the single scan run over the finished message.
    pub scan: ScanReport,
}

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

pub struct ChatSession {
    client: Client,
    settings: Settings,
    transcript: Transcript,
    parser: VisualDocumentParser<MarkdownRenderer>,
    layout: Box<dyn LayoutEngine>,
    layout_responses: Option<mpsc::UnboundedReceiver<GraphRenderResponse>>,
}

impl ChatSession {
    pub fn new(settings: Settings) -> Result<Self, ChatError> {
        let client = Client::builder().timeout(settings.request_timeout()).build()?;
        Ok(ChatSession {
            client,
            transcript: Transcript::new(settings.fence_label.clone()),
            settings,
            parser: VisualDocumentParser::new(MarkdownRenderer),
            layout: Box::new(DetachedLayoutEngine),
            layout_responses: None,
        })
    }

    pub fn with_layout_engine(mut self, engine: impl LayoutEngine + 'static) -> Self {
        self.layout = Box::new(engine);
        self
    }

    /// Channel on which the layout engine delivers finished graphs.
    pub fn with_layout_responses(mut self, responses: mpsc::UnboundedReceiver<GraphRenderResponse>) -> Self {
        self.layout_responses = Some(responses);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Start a new conversation. Layout results still in flight are dropped.
    pub fn clear(&mut self) {
        self.transcript.clear();
    }

    // -----------------------------------------------------------------------
    // Transcript updates
    // -----------------------------------------------------------------------

    /// Append a message and resolve its visual segments.
    pub fn push_message(&mut self, message: ChatMessage) -> (usize, ScanReport) {
        let index = self.transcript.push(message);
        (index, self.scan_message(index))
    }

    fn scan_message(&mut self, index: usize) -> ScanReport {
        let scanner = MarkupScanner::new(&self.parser, self.layout.as_ref());
        self.transcript.scan_message(index, &scanner)
    }

    /// Scan the whole transcript again. Already resolved segments are skipped.
    pub fn rescan(&mut self) -> ScanReport {
        let scanner = MarkupScanner::new(&self.parser, self.layout.as_ref());
        self.transcript.scan_all(&scanner)
    }

    // -----------------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------------

    /// Send `message` and stream the assistant reply. Transport problems do
    /// not fail the call: the reply is finalized with whatever arrived and
    /// the cause is reported as a `StreamError` event.
    pub async fn send<F>(&mut self, message: ChatMessage, mut on_event: F) -> Result<TurnSummary, ChatError>
    where
        F: FnMut(&StreamEvent),
    {
        self.push_message(message);

        let request = ChatRequest {
            model: &self.settings.model,
            messages: self.transcript.messages().collect(),
            stream: true,
            user: &self.settings.user,
        };
        let mut builder = self.client.post(self.settings.chat_url()).json(&request);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Ok(self.finalize_failed(e.to_string(), &mut on_event)),
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let cause = format!("HTTP {}: {}", status.as_u16(), body.trim());
            return Ok(self.finalize_failed(cause, &mut on_event));
        }

        Ok(self.consume_response(Box::pin(response.bytes_stream()), on_event).await)
    }

    /// Assemble the assistant reply from `stream`, append it to the
    /// transcript, and run exactly one markup scan over it.
    pub async fn consume_response<S, B, E, F>(&mut self, stream: S, mut on_event: F) -> TurnSummary
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
        F: FnMut(&StreamEvent),
    {
        let mut consumer = StreamConsumer::new();
        let mut deltas = 0;
        let mut malformed = 0;
        let termination = stream::consume(stream, &mut consumer, |event| {
            match event {
                StreamEvent::ContentDelta(_) => deltas += 1,
                StreamEvent::MalformedEvent { .. } => malformed += 1,
                StreamEvent::Done | StreamEvent::StreamError(_) => {}
            }
            on_event(event);
        })
        .await;
        self.finalize(consumer.into_text(), termination, deltas, malformed)
    }

    fn finalize_failed<F>(&mut self, cause: String, on_event: &mut F) -> TurnSummary
    where
        F: FnMut(&StreamEvent),
    {
        warn!(error = %cause, "chat request failed");
        on_event(&StreamEvent::StreamError(cause.clone()));
        self.finalize(String::new(), Termination::Failed(cause), 0, 0)
    }

    fn finalize(&mut self, text: String, termination: Termination, deltas: usize, malformed: usize) -> TurnSummary {
        let (message_index, scan) = self.push_message(ChatMessage::assistant(text.clone()));
        info!(
            ?termination,
            deltas,
            malformed,
            visuals = scan.rendered,
            failed_visuals = scan.failed,
            "assistant turn finished"
        );
        TurnSummary { message_index, text, termination, deltas, malformed, scan }
    }

    // -----------------------------------------------------------------------
    // Layout responses
    // -----------------------------------------------------------------------

    /// Apply every layout response already delivered, without waiting.
    pub fn apply_layout_responses(&mut self) -> usize {
        let Some(rx) = self.layout_responses.as_mut() else {
            return 0;
        };
        let mut applied = 0;
        while let Ok(response) = rx.try_recv() {
            if self.transcript.apply_graph_render(response) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait up to `wait` for outstanding graph layouts and apply them.
    pub async fn drain_layout(&mut self, wait: Duration) -> usize {
        let Some(rx) = self.layout_responses.as_mut() else {
            return 0;
        };
        let deadline = tokio::time::Instant::now() + wait;
        let mut applied = 0;
        while self.transcript.pending_graphs() > 0 {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(response)) => {
                    if self.transcript.apply_graph_render(response) {
                        applied += 1;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        applied
    }

    // -----------------------------------------------------------------------
    // Models
    // -----------------------------------------------------------------------

    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let mut builder = self.client.get(self.settings.models_url());
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status: status.as_u16(), body });
        }
        let list: ModelList = response.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}
