use async_trait::async_trait;
use serde::Deserialize;

use super::{
    Backend, BackendError, Completion, FinalMetadata, LineBuffer, LineDecoder, ResponseStream,
    StreamItem, decode_stream, join_url, status_error,
};
use crate::config::BackendConfig;

// ── Wire types ────────────────────────────────────────────────────────────────

/// One NDJSON line of `/api/generate` output.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

// ── Backend ───────────────────────────────────────────────────────────────────

pub struct OllamaBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    system_prompt: String,
}

impl OllamaBackend {
    pub fn new(http: reqwest::Client, cfg: &BackendConfig) -> Self {
        Self {
            http,
            endpoint: normalize_endpoint(&cfg.endpoint),
            model: cfg.model.clone(),
            system_prompt: cfg.system_prompt.clone(),
        }
    }

    fn request(&self, prompt: &str, stream: bool) -> reqwest::RequestBuilder {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "system": self.system_prompt,
            "stream": stream,
        });
        self.http
            .post(join_url(&self.endpoint, "api/generate"))
            .json(&body)
    }
}

/// Accept endpoints configured with the generate path already attached.
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    trimmed
        .strip_suffix("/api/generate")
        .unwrap_or(trimmed)
        .to_string()
}

#[async_trait]
impl Backend for OllamaBackend {
    fn kind(&self) -> &'static str {
        "ollama"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Completion, BackendError> {
        let resp = self.request(prompt, false).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        let body = resp.text().await?;

        // Some servers still answer line-by-line with stream=false; fold every line.
        let mut decoder = GenerateDecoder::default();
        let mut lines = LineBuffer::default();
        lines.push(body.as_bytes());
        let mut all = Vec::new();
        while let Some(line) = lines.next_line() {
            if !line.trim().is_empty() {
                all.extend(decoder.decode(&line)?);
            }
        }
        if let Some(rest) = lines.take_rest() {
            all.extend(decoder.decode(&rest)?);
        }

        let mut completion = Completion {
            text: decoder.text.clone(),
            ..Default::default()
        };
        for item in all {
            if let StreamItem::Final(meta) = item {
                if let Some(err) = meta.error {
                    return Err(BackendError::Other(err));
                }
                completion.prompt_tokens = meta.prompt_tokens;
                completion.completion_tokens = meta.completion_tokens;
                completion.total_tokens = meta.total_tokens;
            }
        }
        if completion.total_tokens == 0 {
            tracing::warn!(endpoint = %self.endpoint, "ollama response had no final 'done' record");
        }
        Ok(completion)
    }

    fn generate_stream(&self, prompt: &str) -> ResponseStream {
        decode_stream(self.request(prompt, true), GenerateDecoder::default())
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let resp = self
            .http
            .get(join_url(&self.endpoint, "api/tags"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        let tags: TagsResponse = resp.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

// ── NDJSON decoding ───────────────────────────────────────────────────────────

#[derive(Default)]
struct GenerateDecoder {
    text: String,
}

impl LineDecoder for GenerateDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<StreamItem>, BackendError> {
        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|e| BackendError::Decode(format!("invalid ollama chunk: {e}")))?;

        if let Some(err) = chunk.error {
            return Ok(vec![StreamItem::Final(FinalMetadata {
                completion_text: self.text.clone(),
                ..FinalMetadata::with_error(format!("Error: {err}"))
            })]);
        }

        if !chunk.done {
            if chunk.response.is_empty() {
                return Ok(Vec::new());
            }
            self.text.push_str(&chunk.response);
            return Ok(vec![StreamItem::Text(chunk.response)]);
        }

        // The done record may still carry a trailing piece of text.
        let mut out = Vec::new();
        if !chunk.response.is_empty() {
            self.text.push_str(&chunk.response);
            out.push(StreamItem::Text(chunk.response));
        }
        let prompt_tokens = chunk.prompt_eval_count.unwrap_or(0);
        let completion_tokens = chunk.eval_count.unwrap_or(0);
        out.push(StreamItem::Final(FinalMetadata {
            completion_text: self.text.clone(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            error: None,
        }));
        Ok(out)
    }
}
