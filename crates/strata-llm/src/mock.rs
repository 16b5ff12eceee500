//! Test-only mock LLM and embedder.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{LlmError, Result};
use crate::provider::{BoxFuture, Embedder, GenerateOptions, Llm};

#[derive(Debug, Clone)]
pub struct MockLlm {
    responses: Arc<Mutex<Vec<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub fail: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            fail: false,
            delay_ms: 0,
        }
    }
}

impl MockLlm {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Prompts received so far, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Llm for MockLlm {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        _options: &'a GenerateOptions,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_owned());
            }
            if self.fail {
                return Err(LlmError::Unavailable("mock LLM error".into()));
            }
            let mut responses = self
                .responses
                .lock()
                .map_err(|e| LlmError::Other(e.to_string()))?;
            if responses.is_empty() {
                Ok(self.default_response.clone())
            } else {
                Ok(responses.remove(0))
            }
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets and the result is L2-normalized, so texts with the same tokens
/// get identical vectors and cosine similarity tracks token overlap.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
    calls: Arc<AtomicUsize>,
    fail: bool,
    fail_on: Option<String>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
            fail_on: None,
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Fail any text containing `needle`.
    #[must_use]
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    /// Number of texts embedded so far, batch members counted individually.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Embedder for MockEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::Embedding("mock embedder error".into()));
            }
            if let Some(needle) = &self.fail_on
                && text.contains(needle.as_str())
            {
                return Err(LlmError::Embedding(format!("mock refused text with {needle}")));
            }
            Ok(self.vector_for(text))
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
