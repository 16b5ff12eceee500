use std::sync::Arc;

use strata_llm::{GenerateOptions, Llm};

use super::sanitize::sanitize_input;
use crate::error::SearchError;

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 300;

/// Hypothetical document embeddings: answer the query first, then search
/// with the answer's vector.
#[derive(Clone)]
pub struct HydeGenerator {
    llm: Arc<dyn Llm>,
    options: GenerateOptions,
}

impl HydeGenerator {
    #[must_use]
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            llm,
            options: GenerateOptions::new(TEMPERATURE, MAX_TOKENS),
        }
    }

    fn prompt(query: &str) -> String {
        format!(
            "Write a short, factual passage that directly answers the following question. \
             Write it as it would appear in a reference document, without preamble.\n\n\
             Question: {}\n\nPassage:",
            sanitize_input(query)
        )
    }

    /// # Errors
    ///
    /// Returns an error if generation fails or produces only whitespace.
    pub async fn generate(&self, query: &str) -> Result<String, SearchError> {
        let text = self
            .llm
            .generate(&Self::prompt(query), &self.options)
            .await
            .map_err(|e| {
                SearchError::new("hyde", "generate", "hypothetical document generation failed", query)
                    .with_source(e)
            })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SearchError::new("hyde", "generate", "empty hypothetical document", query));
        }
        tracing::debug!(chars = text.len(), "generated hypothetical document");
        Ok(text.to_owned())
    }
}

impl std::fmt::Debug for HydeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydeGenerator")
            .field("llm", &self.llm.name())
            .finish_non_exhaustive()
    }
}
