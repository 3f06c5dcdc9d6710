pub mod ollama;
pub mod openai;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;

use crate::config::{BackendConfig, BackendKind};

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

// ── Response types ────────────────────────────────────────────────────────────

/// Result of a non-streaming request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Terminal record of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalMetadata {
    /// Full text accumulated by the backend over the stream
    pub completion_text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Error reported in-band by the endpoint (the stream itself did not fail)
    pub error: Option<String>,
}

impl FinalMetadata {
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Text(String),
    Final(FinalMetadata),
}

/// Single-pass response stream. Ends after a `Final` item or on the first error.
pub type ResponseStream = BoxStream<'static, Result<StreamItem, BackendError>>;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Could not reach the endpoint, or the connection dropped mid-response.
    #[error("{0}")]
    Connection(String),

    /// Endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not what the wire format promised.
    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Short label used in transcript annotations.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Connection(_) => "ConnectionError",
            BackendError::Status { .. } => "HttpError",
            BackendError::Decode(_) => "DecodeError",
            BackendError::Other(_) => "Error",
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_body() {
            BackendError::Connection(e.to_string())
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            BackendError::Other(e.to_string())
        }
    }
}

// ── Backend contract ──────────────────────────────────────────────────────────

#[async_trait]
pub trait Backend: Send + Sync {
    /// Kind label ("ollama", "openai")
    fn kind(&self) -> &'static str;
    fn endpoint(&self) -> &str;
    fn model(&self) -> &str;

    /// Send one prompt and wait for the whole answer.
    async fn generate(&self, prompt: &str) -> Result<Completion, BackendError>;

    /// Send one prompt and return the answer as an incremental stream.
    /// Nothing is sent until the stream is first polled.
    fn generate_stream(&self, prompt: &str) -> ResponseStream;

    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}

/// Name → backend mapping, ordered by name.
pub type BackendMap = BTreeMap<String, Arc<dyn Backend>>;

/// Instantiate every configured backend.
pub fn build(configs: &BTreeMap<String, BackendConfig>) -> anyhow::Result<BackendMap> {
    let http = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;

    let mut out = BackendMap::new();
    for (name, cfg) in configs {
        let backend: Arc<dyn Backend> = match cfg.kind {
            BackendKind::Ollama => Arc::new(OllamaBackend::new(http.clone(), cfg)),
            BackendKind::Openai => Arc::new(OpenAiBackend::new(http.clone(), cfg)),
        };
        tracing::debug!(
            backend = %name,
            kind = backend.kind(),
            endpoint = backend.endpoint(),
            model = backend.model(),
            "backend configured"
        );
        out.insert(name.to_lowercase(), backend);
    }
    Ok(out)
}

// ── Line framing shared by both wire formats ──────────────────────────────────

/// Reassembles newline-terminated lines from arbitrarily split byte chunks.
#[derive(Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line[..pos]);
        Some(text.trim_end_matches('\r').to_string())
    }

    /// Whatever is left once the body has ended (a final line with no newline).
    pub fn take_rest(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        if rest.is_empty() { None } else { Some(rest) }
    }
}

/// Per-format decoding of one framed line into stream items.
pub(crate) trait LineDecoder: Send + 'static {
    fn decode(&mut self, line: &str) -> Result<Vec<StreamItem>, BackendError>;

    /// Called once when the body closes without a `Final` item.
    fn finish(&mut self) -> Option<StreamItem> {
        None
    }
}

enum Phase {
    Idle(reqwest::RequestBuilder),
    Body(BoxStream<'static, Result<Vec<u8>, BackendError>>),
    Ended,
}

struct DecodeState<D> {
    phase: Phase,
    decoder: D,
    lines: LineBuffer,
    pending: VecDeque<StreamItem>,
    /// Decode error held back until the items before it are yielded.
    failed: Option<BackendError>,
}

impl<D: LineDecoder> DecodeState<D> {
    fn decode_buffered(&mut self) {
        while let Some(line) = self.lines.next_line() {
            if let Err(e) = self.decode_line(&line) {
                self.failed = Some(e);
                return;
            }
        }
    }

    fn decode_line(&mut self, line: &str) -> Result<(), BackendError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let items = self.decoder.decode(line)?;
        self.pending.extend(items);
        Ok(())
    }

    /// Stop producing: the next poll ends the stream.
    fn halt(mut self) -> Self {
        self.phase = Phase::Ended;
        self.pending.clear();
        self.failed = None;
        self
    }
}

/// Turn a prepared request into a lazy `ResponseStream`: the request is sent on
/// first poll, the body is split into lines and each line fed to `decoder`.
/// The stream ends after the first `Final` item or the first error. Items
/// decoded from lines ahead of a bad line are still yielded.
pub(crate) fn decode_stream<D: LineDecoder>(request: reqwest::RequestBuilder, decoder: D) -> ResponseStream {
    let state = DecodeState {
        phase: Phase::Idle(request),
        decoder,
        lines: LineBuffer::default(),
        pending: VecDeque::new(),
        failed: None,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if matches!(item, StreamItem::Final(_)) {
                    return Some((Ok(item), st.halt()));
                }
                return Some((Ok(item), st));
            }
            if let Some(e) = st.failed.take() {
                return Some((Err(e), st.halt()));
            }

            match std::mem::replace(&mut st.phase, Phase::Ended) {
                Phase::Idle(request) => match request.send().await {
                    Ok(resp) if resp.status().is_success() => {
                        let body = resp
                            .bytes_stream()
                            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(BackendError::from))
                            .boxed();
                        st.phase = Phase::Body(body);
                    }
                    Ok(resp) => return Some((Err(status_error(resp).await), st.halt())),
                    Err(e) => return Some((Err(e.into()), st.halt())),
                },
                Phase::Body(mut body) => match body.next().await {
                    Some(Ok(bytes)) => {
                        st.lines.push(&bytes);
                        st.decode_buffered();
                        st.phase = Phase::Body(body);
                    }
                    Some(Err(e)) => return Some((Err(e), st.halt())),
                    None => {
                        // Body ended; a last line may lack its newline.
                        if let Some(rest) = st.lines.take_rest() {
                            if let Err(e) = st.decode_line(&rest) {
                                st.failed = Some(e);
                                continue;
                            }
                        }
                        if !st.pending.iter().any(|i| matches!(i, StreamItem::Final(_))) {
                            st.pending.extend(st.decoder.finish());
                        }
                    }
                },
                Phase::Ended => return None,
            }
        }
    })
    .boxed()
}

/// Join `path` onto `endpoint` without doubling slashes.
pub(crate) fn join_url(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Read an error body for a non-success response.
pub(crate) async fn status_error(resp: reqwest::Response) -> BackendError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    BackendError::Status {
        status,
        body: api_error_message(&body).unwrap_or_else(|| body.trim().to_string()),
    }
}

/// Human-readable message from a JSON error body, in either the Ollama
/// (`{"error": "..."}`) or OpenAI (`{"error": {"message": "..."}}`) shape.
pub(crate) fn api_error_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let err = v.get("error")?;
    err.as_str()
        .or_else(|| err.get("message")?.as_str())
        .map(str::to_string)
}
