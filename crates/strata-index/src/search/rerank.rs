use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Deserialize;
use strata_llm::{GenerateOptions, Llm};

use super::sanitize::sanitize_input;
use crate::document::SearchResult;

pub const DEFAULT_MAX_RESULTS: usize = 20;

const MAX_CANDIDATE_CHARS: usize = 500;
const MAX_TOKENS: u32 = 1024;
const SCORE_STEP: f32 = 0.05;
const MIN_SCORE: f32 = 0.1;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RankingDecision {
    pub index: i64,
    pub relevance: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Re-orders the head of a result list by LLM-judged relevance.
#[derive(Clone)]
pub struct LlmReranker {
    llm: Arc<dyn Llm>,
    max_results: usize,
    options: GenerateOptions,
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

impl LlmReranker {
    /// `max_results` of zero selects the default of 20.
    #[must_use]
    pub fn new(llm: Arc<dyn Llm>, max_results: usize) -> Self {
        Self {
            llm,
            max_results: if max_results == 0 { DEFAULT_MAX_RESULTS } else { max_results },
            options: GenerateOptions::new(0.0, MAX_TOKENS),
        }
    }

    #[must_use]
    pub fn max_results(&self) -> usize {
        self.max_results
    }

    fn prompt(query: &str, candidates: &[SearchResult]) -> String {
        let mut prompt = format!(
            "Given the query: \"{}\"\n\n\
             Rank the following documents by their relevance to the query.\n\
             For each document, provide a relevance score from 1-10 (10 being most relevant).\n\n\
             Documents:\n",
            sanitize_input(query)
        );
        for (i, candidate) in candidates.iter().enumerate() {
            let _ = write!(
                prompt,
                "\n[{i}] {}\n",
                truncate_chars(&candidate.content, MAX_CANDIDATE_CHARS)
            );
        }
        prompt.push_str(
            "\n\nRespond with a JSON array of rankings, ordered from most to least relevant:\n\
             [{\"index\": 0, \"relevance\": 9, \"reason\": \"directly answers the query\"}, ...]\n\n\
             Only include the JSON array, no other text.",
        );
        prompt
    }

    /// Rerank `results`, returning them with `true` when the LLM ordering was
    /// applied. Any failure keeps the original order and returns `false`.
    pub async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> (Vec<SearchResult>, bool) {
        if results.is_empty() {
            return (results, false);
        }
        let head_len = results.len().min(self.max_results);
        let prompt = Self::prompt(query, &results[..head_len]);

        let response = match self.llm.generate(&prompt, &self.options).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("reranking failed, keeping original order: {e}");
                return (results, false);
            }
        };
        let rankings = match parse_rankings(&response, head_len) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("failed to parse rankings, keeping original order: {e}");
                return (results, false);
            }
        };

        let mut results = results;
        let tail = results.split_off(head_len);
        let mut reranked = apply_rankings(results, &rankings);
        reranked.extend(tail);
        tracing::debug!(candidates = head_len, "reranked search results");
        (reranked, true)
    }
}

/// Extract the JSON array from `response`, keep valid unique indices, append
/// any missing ones with relevance 1, and sort by relevance descending.
///
/// # Errors
///
/// Returns a description of the problem when no parsable array is found.
pub fn parse_rankings(response: &str, candidates: usize) -> Result<Vec<RankingDecision>, String> {
    let (Some(start), Some(end)) = (response.find('['), response.rfind(']')) else {
        return Err("no JSON array found in response".into());
    };
    if start >= end {
        return Err("no JSON array found in response".into());
    }
    let parsed: Vec<RankingDecision> = serde_json::from_str(&response[start..=end])
        .map_err(|e| format!("failed to parse rankings JSON: {e}"))?;

    let mut seen = HashSet::new();
    let mut valid: Vec<RankingDecision> = parsed
        .into_iter()
        .filter(|r| {
            usize::try_from(r.index).is_ok_and(|i| i < candidates && seen.insert(i))
        })
        .collect();
    for i in 0..candidates {
        if !seen.contains(&i) {
            valid.push(RankingDecision {
                index: i64::try_from(i).unwrap_or(i64::MAX),
                relevance: 1.0,
                reason: None,
            });
        }
    }
    valid.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    Ok(valid)
}

/// Position-based scores: `1.0 - 0.05 * rank`, floored at 0.1.
fn apply_rankings(candidates: Vec<SearchResult>, rankings: &[RankingDecision]) -> Vec<SearchResult> {
    let mut slots: Vec<Option<SearchResult>> = candidates.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    for ranking in rankings {
        let Some(mut result) = usize::try_from(ranking.index)
            .ok()
            .and_then(|i| slots.get_mut(i))
            .and_then(Option::take)
        else {
            continue;
        };
        #[allow(clippy::cast_precision_loss)]
        let score = 1.0 - out.len() as f32 * SCORE_STEP;
        result.score = score.max(MIN_SCORE);
        out.push(result);
    }
    out
}

impl std::fmt::Debug for LlmReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmReranker")
            .field("llm", &self.llm.name())
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}
