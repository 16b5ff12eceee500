use std::collections::HashSet;
use std::sync::Arc;

use strata_llm::{GenerateOptions, Llm};

use super::sanitize::sanitize_input;
use crate::error::SearchError;

pub const DEFAULT_NUM_QUERIES: usize = 3;
pub const MAX_NUM_QUERIES: usize = 5;

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 200;

/// Asks an LLM for paraphrases of a query so recall does not hinge on one
/// wording.
#[derive(Clone)]
pub struct MultiQueryExpander {
    llm: Arc<dyn Llm>,
    num_queries: usize,
    options: GenerateOptions,
}

/// Zero selects the default; anything above the maximum is capped.
#[must_use]
pub fn clamp_num_queries(n: usize) -> usize {
    match n {
        0 => DEFAULT_NUM_QUERIES,
        n => n.min(MAX_NUM_QUERIES),
    }
}

impl MultiQueryExpander {
    #[must_use]
    pub fn new(llm: Arc<dyn Llm>, num_queries: usize) -> Self {
        Self {
            llm,
            num_queries: clamp_num_queries(num_queries),
            options: GenerateOptions::new(TEMPERATURE, MAX_TOKENS),
        }
    }

    #[must_use]
    pub fn num_queries(&self) -> usize {
        self.num_queries
    }

    /// The original query followed by up to `num_queries` distinct variants
    /// (`None` uses the configured count).
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM call fails.
    pub async fn expand(&self, query: &str, num_queries: Option<usize>) -> Result<Vec<String>, SearchError> {
        let n = num_queries.map_or(self.num_queries, clamp_num_queries);
        let prompt = format!(
            "Generate {n} alternative versions of the following search query.\n\
             Each alternative should:\n\
             - Search for the same information but with different wording\n\
             - Use synonyms or related terms\n\
             - Rephrase the question from different angles\n\n\
             Original query: \"{}\"\n\n\
             Respond with only the alternative queries, one per line, without numbering or bullets.",
            sanitize_input(query)
        );
        let response = self.llm.generate(&prompt, &self.options).await.map_err(|e| {
            SearchError::new("multi_query", "expand", "query expansion failed", query).with_source(e)
        })?;
        let queries = parse_variants(&response, query, n);
        tracing::debug!(variants = queries.len() - 1, "expanded query");
        Ok(queries)
    }
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start_matches(['-', '•', '*', ' ', '\t']);
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest;
        }
    }
    line
}

/// One variant per line with bullets, numbering and quotes removed,
/// deduplicated case-insensitively against each other and the original.
#[must_use]
pub fn parse_variants(response: &str, original: &str, limit: usize) -> Vec<String> {
    let mut queries = vec![original.to_owned()];
    let mut seen: HashSet<String> = HashSet::from([original.to_lowercase()]);
    for line in response.lines() {
        if queries.len() > limit {
            break;
        }
        let variant = strip_list_marker(line.trim())
            .trim()
            .trim_matches(['"', '\''])
            .trim();
        if variant.is_empty() || !seen.insert(variant.to_lowercase()) {
            continue;
        }
        queries.push(variant.to_owned());
    }
    queries
}

impl std::fmt::Debug for MultiQueryExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiQueryExpander")
            .field("llm", &self.llm.name())
            .field("num_queries", &self.num_queries)
            .finish_non_exhaustive()
    }
}
