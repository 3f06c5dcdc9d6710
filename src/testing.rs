//! Scripted in-process backend for exercising the session, dispatcher and UI
//! without a server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;

use crate::backend::{Backend, BackendError, BackendMap, Completion, ResponseStream, StreamItem};

pub struct ScriptedBackend {
    items: Vec<StreamItem>,
    /// Connection error raised after `items` are yielded
    fail_with: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(items: Vec<StreamItem>) -> Arc<Self> {
        Arc::new(Self {
            items,
            fail_with: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(items: Vec<StreamItem>, detail: &str) -> Arc<Self> {
        Arc::new(Self {
            items,
            fail_with: Some(detail.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn endpoint(&self) -> &str {
        "http://scripted.test"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, prompt: &str) -> Result<Completion, BackendError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(detail) = &self.fail_with {
            return Err(BackendError::Connection(detail.clone()));
        }
        let mut completion = Completion::default();
        for item in &self.items {
            match item {
                StreamItem::Text(t) => completion.text.push_str(t),
                StreamItem::Final(meta) => {
                    completion.prompt_tokens = meta.prompt_tokens;
                    completion.completion_tokens = meta.completion_tokens;
                    completion.total_tokens = meta.total_tokens;
                }
            }
        }
        Ok(completion)
    }

    fn generate_stream(&self, prompt: &str) -> ResponseStream {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut items: Vec<Result<StreamItem, BackendError>> =
            self.items.iter().cloned().map(Ok).collect();
        if let Some(detail) = &self.fail_with {
            items.push(Err(BackendError::Connection(detail.clone())));
        }
        stream::iter(items).boxed()
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec![self.model().to_string()])
    }
}

pub fn backends(entries: Vec<(&str, Arc<ScriptedBackend>)>) -> BackendMap {
    entries
        .into_iter()
        .map(|(name, b)| (name.to_string(), b as Arc<dyn Backend>))
        .collect()
}
