use async_trait::async_trait;
use serde::Deserialize;

use super::{
    Backend, BackendError, Completion, FinalMetadata, LineDecoder, ResponseStream, StreamItem,
    decode_stream, join_url, status_error,
};
use crate::config::BackendConfig;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageStats>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
struct UsageStats {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl UsageStats {
    fn total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0)
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<UsageStats>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

// ── Backend ───────────────────────────────────────────────────────────────────

pub struct OpenAiBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    system_prompt: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(http: reqwest::Client, cfg: &BackendConfig) -> Self {
        Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            system_prompt: cfg.system_prompt.clone(),
            api_key: cfg.api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        // Accept both "http://host" and "http://host/v1" as the configured endpoint.
        if self.endpoint.ends_with("/v1") {
            join_url(&self.endpoint, path)
        } else {
            join_url(&self.endpoint, &format!("v1/{path}"))
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    fn request(&self, prompt: &str, stream: bool) -> reqwest::RequestBuilder {
        let mut body = serde_json::json!({
            "model": self.model,
            "stream": stream,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt },
            ],
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        self.authorize(
            self.http
                .post(self.url("chat/completions"))
                .header("Content-Type", "application/json")
                .json(&body),
        )
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn kind(&self) -> &'static str {
        "openai"
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
        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        let usage = parsed.usage.unwrap_or_default();
        Ok(Completion {
            text,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
            total_tokens: usage.total(),
        })
    }

    fn generate_stream(&self, prompt: &str) -> ResponseStream {
        decode_stream(self.request(prompt, true), SseDecoder::default())
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let resp = self.authorize(self.http.get(self.url("models"))).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        let list: ModelList = resp.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

// ── SSE decoding ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct SseDecoder {
    text: String,
    usage: Option<UsageStats>,
}

impl SseDecoder {
    fn final_record(&self, error: Option<String>) -> StreamItem {
        let usage = self.usage.unwrap_or_default();
        StreamItem::Final(FinalMetadata {
            completion_text: self.text.clone(),
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
            total_tokens: usage.total(),
            error,
        })
    }
}

impl LineDecoder for SseDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<StreamItem>, BackendError> {
        // Only `data:` fields matter; comments and `event:` lines are skipped.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(Vec::new());
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(vec![self.final_record(None)]);
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                // Some servers interleave non-JSON keep-alives; skip them.
                tracing::warn!("skipping undecodable SSE data: {e}");
                return Ok(Vec::new());
            }
        };

        if let Some(err) = chunk.error {
            return Ok(vec![self.final_record(Some(format!("Error: {}", err.message)))]);
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let mut out = Vec::new();
        for choice in chunk.choices.unwrap_or_default() {
            if let Some(content) = choice.delta.and_then(|d| d.content) {
                if !content.is_empty() {
                    self.text.push_str(&content);
                    out.push(StreamItem::Text(content));
                }
            }
        }
        Ok(out)
    }

    /// A server that closes without `[DONE]` still reports the usage it sent.
    fn finish(&mut self) -> Option<StreamItem> {
        self.usage.map(|_| self.final_record(None))
    }
}
