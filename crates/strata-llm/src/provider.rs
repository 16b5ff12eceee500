use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Turns text into dense vectors.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or rejects the input.
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;

    /// Embed several texts, preserving order.
    ///
    /// The default implementation embeds one text at a time.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by [`Embedder::embed`].
    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        })
    }

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;
}

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    256
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop: Vec::new(),
        }
    }
}

impl GenerateOptions {
    #[must_use]
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
            stop: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// Single-turn text generation.
pub trait Llm: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or returns nothing usable.
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a GenerateOptions,
    ) -> BoxFuture<'a, Result<String>>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmError;

    struct FixedEmbedder;

    impl Embedder for FixedEmbedder {
        fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
            Box::pin(async move {
                if text.is_empty() {
                    return Err(LlmError::Embedding("empty input".into()));
                }
                #[allow(clippy::cast_precision_loss)]
                Ok(vec![text.len() as f32, 1.0])
            })
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn default_batch_preserves_order() {
        let texts = vec!["a".to_string(), "abc".to_string()];
        let vectors = FixedEmbedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);
    }

    #[tokio::test]
    async fn default_batch_stops_at_first_error() {
        let texts = vec!["a".to_string(), String::new(), "b".to_string()];
        let err = FixedEmbedder.embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, LlmError::Embedding(_)));
    }

    #[test]
    fn generate_options_defaults() {
        let opts = GenerateOptions::default();
        assert!((opts.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, 256);
        assert!(opts.stop.is_empty());
    }

    #[test]
    fn with_stop_appends() {
        let opts = GenerateOptions::new(0.0, 50).with_stop("\n\n");
        assert_eq!(opts.stop, vec!["\n\n".to_string()]);
    }
}
