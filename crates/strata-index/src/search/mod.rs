//! Query pipeline and chunk storage over a [`VectorProvider`].
//!
//! A query is normalized, optionally expanded into variants, optionally
//! rewritten into a hypothetical answer, embedded and searched; hits from all
//! variants are merged and the head is optionally reranked by an LLM. Every
//! optional stage degrades to the plain path when it fails.

mod hyde;
mod multiquery;
mod rerank;
mod sanitize;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strata_llm::{Embedder, Llm};
use strata_memory::{ScoredVectorPoint, VectorFilter, VectorPoint, VectorProvider, VectorStoreError};
use tokio::sync::RwLock;

use crate::chunk::Chunker;
use crate::document::{Chunk, Document, SearchResult, chunk_id, keys};
use crate::error::{IndexError, Result, SearchError};
use crate::languages::CodeStructure;
use crate::metrics::{SearchMetrics, SearchMetricsSnapshot, StagesUsed};

pub use hyde::HydeGenerator;
pub use multiquery::{
    DEFAULT_NUM_QUERIES, MAX_NUM_QUERIES, MultiQueryExpander, clamp_num_queries, parse_variants,
};
pub use rerank::{DEFAULT_MAX_RESULTS, LlmReranker, RankingDecision, parse_rankings};
pub use sanitize::sanitize_input;

pub const DEFAULT_COLLECTION: &str = "rag_documents";
pub const DEFAULT_TOP_K: usize = 10;
pub const MIN_QUERY_LENGTH: usize = 2;
pub const MAX_QUERY_LENGTH: usize = 10_000;

const RERANK_FETCH_FACTOR: usize = 3;
const MAX_RERANK_FETCH: usize = 100;
const MAX_DOCUMENT_CHUNKS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum similarity score; unset or non-positive keeps every hit.
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub hyde: bool,
    #[serde(default)]
    pub multi_query: bool,
    #[serde(default = "default_num_queries")]
    pub num_queries: usize,
    #[serde(default)]
    pub rerank: bool,
    #[serde(default = "default_rerank_max_results")]
    pub rerank_max_results: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_num_queries() -> usize {
    DEFAULT_NUM_QUERIES
}

fn default_rerank_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: None,
            hyde: false,
            multi_query: false,
            num_queries: default_num_queries(),
            rerank: false,
            rerank_max_results: default_rerank_max_results(),
        }
    }
}

/// Per-query overrides. `None` falls back to the engine's [`SearchConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub hyde: Option<bool>,
    pub multi_query: Option<bool>,
    pub num_queries: Option<usize>,
    pub rerank: Option<bool>,
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    /// Overrides the engine's default collection.
    pub collection: Option<String>,
    /// Zero uses the configured `top_k`.
    pub top_k: usize,
    pub filter: Option<VectorFilter>,
    pub options: SearchOptions,
}

impl SearchRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: VectorFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub took: Duration,
    /// Queries actually searched, the normalized original first.
    pub query_expansions: Vec<String>,
}

/// Trim and collapse runs of whitespace to a single space.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn validate_query(query: &str) -> std::result::Result<(), SearchError> {
    let len = query.chars().count();
    if len < MIN_QUERY_LENGTH {
        return Err(SearchError::new(
            "engine",
            "validate",
            format!("query must be at least {MIN_QUERY_LENGTH} characters"),
            query,
        ));
    }
    if len > MAX_QUERY_LENGTH {
        return Err(SearchError::new(
            "engine",
            "validate",
            format!("query exceeds {MAX_QUERY_LENGTH} characters"),
            query,
        ));
    }
    Ok(())
}

/// Merge hit lists, keeping the best score per hit id, best first. Ties are
/// broken by id so the order is deterministic.
#[must_use]
pub fn combine_results(sets: Vec<Vec<SearchResult>>) -> Vec<SearchResult> {
    let mut best: HashMap<String, SearchResult> = HashMap::new();
    for result in sets.into_iter().flatten() {
        match best.get(&result.id) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                best.insert(result.id.clone(), result);
            }
        }
    }
    let mut merged: Vec<SearchResult> = best.into_values().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    merged
}

fn to_result(point: ScoredVectorPoint) -> SearchResult {
    let content = point
        .payload
        .get(keys::CONTENT)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned();
    SearchResult {
        id: point.id,
        content,
        score: point.score,
        vector: point.vector,
        metadata: point.payload,
    }
}

fn chunk_payload(
    collection: &str,
    doc: &Document,
    chunk: &Chunk,
) -> HashMap<String, serde_json::Value> {
    use serde_json::json;

    let mut payload = doc.metadata.clone();
    payload.insert(keys::DOCUMENT_ID.into(), json!(doc.id));
    payload.insert(keys::CHUNK_INDEX.into(), json!(chunk.index));
    payload.insert(keys::CHUNK_TOTAL.into(), json!(chunk.total));
    payload.insert(keys::START_LINE.into(), json!(chunk.start_line));
    payload.insert(keys::END_LINE.into(), json!(chunk.end_line));
    payload.insert(keys::START_BYTE.into(), json!(chunk.start_byte));
    payload.insert(keys::END_BYTE.into(), json!(chunk.end_byte));
    payload.insert(keys::CONTENT.into(), json!(chunk.content));
    payload.insert(keys::COLLECTION.into(), json!(collection));
    if !doc.title.is_empty() {
        payload.insert(keys::TITLE.into(), json!(doc.title));
    }
    if !doc.source_path.is_empty() {
        payload.insert(keys::SOURCE_PATH.into(), json!(doc.source_path));
    }
    if let Some(extractor) = &doc.extractor {
        payload.insert(keys::EXTRACTOR.into(), json!(extractor));
    }
    if let Some(ctx) = &chunk.context {
        if let Some(name) = &ctx.function_name {
            payload.insert(keys::FUNCTION_NAME.into(), json!(name));
        }
        if let Some(name) = &ctx.type_name {
            payload.insert(keys::TYPE_NAME.into(), json!(name));
        }
    }
    payload
}

/// Embeds chunks into a vector provider and answers queries against it.
///
/// Ingest, delete and search may run concurrently; [`SearchEngine::clear`]
/// waits for them and blocks new ones until the collection is recreated.
pub struct SearchEngine {
    provider: Arc<dyn VectorProvider>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    config: SearchConfig,
    hyde: Option<HydeGenerator>,
    multi_query: Option<MultiQueryExpander>,
    reranker: Option<LlmReranker>,
    metrics: SearchMetrics,
    ready: Mutex<HashSet<String>>,
    gate: RwLock<()>,
}

impl SearchEngine {
    #[must_use]
    pub fn new(provider: Arc<dyn VectorProvider>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            provider,
            embedder,
            collection: DEFAULT_COLLECTION.into(),
            config: SearchConfig::default(),
            hyde: None,
            multi_query: None,
            reranker: None,
            metrics: SearchMetrics::new(),
            ready: Mutex::new(HashSet::new()),
            gate: RwLock::new(()),
        }
    }

    /// Empty keeps the default collection.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        if !collection.is_empty() {
            self.collection = collection;
        }
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable every LLM-backed stage with `llm`, sized from the current
    /// config. Whether a stage runs is still decided per query.
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.hyde = Some(HydeGenerator::new(Arc::clone(&llm)));
        self.multi_query = Some(MultiQueryExpander::new(
            Arc::clone(&llm),
            self.config.num_queries,
        ));
        self.reranker = Some(LlmReranker::new(llm, self.config.rerank_max_results));
        self
    }

    #[must_use]
    pub fn with_hyde(mut self, hyde: HydeGenerator) -> Self {
        self.hyde = Some(hyde);
        self
    }

    #[must_use]
    pub fn with_multi_query(mut self, expander: MultiQueryExpander) -> Self {
        self.multi_query = Some(expander);
        self
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: LlmReranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn VectorProvider> {
        &self.provider
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    #[must_use]
    pub fn metrics(&self) -> SearchMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn ready(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `collection` with the embedder's dimension unless it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be queried or the collection
    /// cannot be created.
    pub async fn ensure_collection(&self, collection: &str) -> Result<()> {
        if self.ready().contains(collection) {
            return Ok(());
        }
        if !self.provider.collection_exists(collection).await? {
            let dimension = self.embedder.dimension();
            self.provider.create_collection(collection, dimension).await?;
            tracing::info!(collection, dimension, "created vector collection");
        }
        self.ready().insert(collection.to_owned());
        Ok(())
    }

    /// Chunk, embed and store `doc`, replacing any chunks stored for it
    /// before. Returns the number of chunks written.
    ///
    /// # Errors
    ///
    /// Returns an error if chunking, embedding or the provider fails. Nothing
    /// is removed unless every chunk was embedded.
    pub async fn ingest(&self, collection: &str, doc: &Document, chunker: &dyn Chunker) -> Result<usize> {
        if doc.id.is_empty() {
            return Err(IndexError::new(collection, "", "ingest", "document id is required").into());
        }
        if doc.content.trim().is_empty() {
            return Ok(0);
        }
        let _gate = self.gate.read().await;
        self.ensure_collection(collection).await?;

        let structure = if chunker.wants_structure() {
            CodeStructure::parse(&doc.file_path(), &doc.content)
        } else {
            None
        };
        let chunks = chunker
            .chunk(&doc.content, structure.as_ref())
            .map_err(|e| e.for_document(&doc.id))?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await.map_err(|e| {
            IndexError::new(collection, &doc.id, "embed", "failed to embed chunks").with_source(e)
        })?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::new(
                collection,
                &doc.id,
                "embed",
                format!("embedder returned {} vectors for {} chunks", vectors.len(), chunks.len()),
            )
            .into());
        }

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: chunk_id(&doc.id, chunk.index),
                vector,
                payload: chunk_payload(collection, doc, chunk),
            })
            .collect();
        let count = points.len();

        self.provider
            .delete_by_filter(collection, VectorFilter::eq(keys::DOCUMENT_ID, doc.id.as_str()))
            .await
            .map_err(|e| {
                IndexError::new(collection, &doc.id, "delete", "failed to remove stale chunks")
                    .with_source(e)
            })?;
        self.provider.upsert(collection, points).await.map_err(|e| {
            IndexError::new(collection, &doc.id, "upsert", "failed to store chunks").with_source(e)
        })?;

        tracing::debug!(collection, document_id = %doc.id, chunks = count, "ingested document");
        Ok(count)
    }

    /// Remove every chunk of `document_id`, returning how many were removed.
    /// A missing collection counts as nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the delete.
    pub async fn delete_document(&self, collection: &str, document_id: &str) -> Result<usize> {
        let _gate = self.gate.read().await;
        match self
            .provider
            .delete_by_filter(collection, VectorFilter::eq(keys::DOCUMENT_ID, document_id))
            .await
        {
            Ok(removed) => {
                tracing::debug!(collection, document_id, removed, "deleted document chunks");
                Ok(removed)
            }
            Err(VectorStoreError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(IndexError::new(collection, document_id, "delete", "failed to delete chunks")
                .with_source(e)
                .into()),
        }
    }

    /// Stored chunks of `document_id` ordered by chunk index.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider lookup fails.
    pub async fn document_chunks(&self, collection: &str, document_id: &str) -> Result<Vec<SearchResult>> {
        let _gate = self.gate.read().await;
        let probe = vec![0.0; self.embedder.dimension()];
        let hits = match self
            .provider
            .search_with_filter(
                collection,
                probe,
                MAX_DOCUMENT_CHUNKS,
                Some(VectorFilter::eq(keys::DOCUMENT_ID, document_id)),
            )
            .await
        {
            Ok(hits) => hits,
            Err(VectorStoreError::CollectionNotFound(_)) => return Ok(Vec::new()),
            Err(e) => {
                return Err(SearchError::new("vector_provider", "lookup", "document lookup failed", document_id)
                    .with_source(e)
                    .into());
            }
        };
        let mut chunks: Vec<SearchResult> = hits.into_iter().map(to_result).collect();
        chunks.sort_by_key(|c| {
            c.metadata
                .get(keys::CHUNK_INDEX)
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(u64::MAX)
        });
        Ok(chunks)
    }

    /// Drop and recreate `collection`. Waits for in-flight operations and
    /// holds off new ones until done.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot delete or recreate it.
    pub async fn clear(&self, collection: &str) -> Result<()> {
        let _gate = self.gate.write().await;
        match self.provider.delete_collection(collection).await {
            Ok(()) | Err(VectorStoreError::CollectionNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.ready().remove(collection);
        self.provider
            .create_collection(collection, self.embedder.dimension())
            .await?;
        self.ready().insert(collection.to_owned());
        tracing::info!(collection, "cleared vector collection");
        Ok(())
    }

    /// Number of chunks stored in `collection`; missing counts as zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot count.
    pub async fn count(&self, collection: &str) -> Result<usize> {
        match self.provider.count(collection).await {
            Ok(n) => Ok(n),
            Err(VectorStoreError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Run the full query pipeline. An empty (or all-whitespace) query
    /// returns an empty response.
    ///
    /// # Errors
    ///
    /// Returns an error if the query length is out of bounds or every query
    /// variant failed to embed or search.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let query = normalize_query(&request.query);
        if query.is_empty() {
            let took = started.elapsed();
            self.metrics.record(took, 0, StagesUsed::default());
            return Ok(SearchResponse {
                took,
                ..SearchResponse::default()
            });
        }
        validate_query(&query)?;

        let opts = &request.options;
        let top_k = if request.top_k == 0 {
            self.config.top_k.max(1)
        } else {
            request.top_k
        };
        let collection = request
            .collection
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.collection);
        let threshold = opts.threshold.or(self.config.threshold).filter(|t| *t > 0.0);
        let use_hyde = self.hyde.is_some() && opts.hyde.unwrap_or(self.config.hyde);
        let use_multi = self.multi_query.is_some() && opts.multi_query.unwrap_or(self.config.multi_query);
        let use_rerank = self.reranker.is_some() && opts.rerank.unwrap_or(self.config.rerank);

        let _gate = self.gate.read().await;
        let mut stages = StagesUsed::default();

        let expansions = match &self.multi_query {
            Some(expander) if use_multi => match expander.expand(&query, opts.num_queries).await {
                Ok(queries) => {
                    stages.multi_query = true;
                    queries
                }
                Err(e) => {
                    tracing::warn!("multi-query expansion failed, using original query: {e}");
                    vec![query.clone()]
                }
            },
            _ => vec![query.clone()],
        };

        let fetch = if use_rerank {
            top_k
                .saturating_mul(RERANK_FETCH_FACTOR)
                .min(MAX_RERANK_FETCH)
                .max(top_k)
        } else {
            top_k
        };
        let filter = request.filter.as_ref().filter(|f| !f.is_empty());

        let outcomes = futures::future::join_all(
            expansions
                .iter()
                .map(|variant| self.search_single(variant, collection, fetch, threshold, filter, use_hyde)),
        )
        .await;

        let mut sets = Vec::with_capacity(outcomes.len());
        let mut last_error = None;
        for (variant, outcome) in expansions.iter().zip(outcomes) {
            match outcome {
                Ok((hits, hyde_used)) => {
                    stages.hyde |= hyde_used;
                    sets.push(hits);
                }
                Err(e) => {
                    tracing::warn!(query = %variant, "search failed for query variant: {e}");
                    last_error = Some(e);
                }
            }
        }
        if sets.is_empty()
            && let Some(e) = last_error
        {
            self.metrics.record(started.elapsed(), 0, stages);
            return Err(e.into());
        }

        let mut results = combine_results(sets);
        if use_rerank
            && !results.is_empty()
            && let Some(reranker) = &self.reranker
        {
            (results, stages.rerank) = reranker.rerank(&query, results).await;
        }
        results.truncate(top_k);

        let took = started.elapsed();
        self.metrics.record(took, results.len(), stages);
        tracing::debug!(
            collection,
            results = results.len(),
            variants = expansions.len(),
            hyde = stages.hyde,
            rerank = stages.rerank,
            took_ms = u64::try_from(took.as_millis()).unwrap_or(u64::MAX),
            "search completed"
        );
        Ok(SearchResponse {
            results,
            took,
            query_expansions: expansions,
        })
    }

    /// Embed one query (through HyDE when asked) and search the provider.
    /// The flag reports whether the hypothetical document was used.
    async fn search_single(
        &self,
        query: &str,
        collection: &str,
        limit: usize,
        threshold: Option<f32>,
        filter: Option<&VectorFilter>,
        use_hyde: bool,
    ) -> std::result::Result<(Vec<SearchResult>, bool), SearchError> {
        let mut vector = None;
        if use_hyde && let Some(hyde) = &self.hyde {
            match hyde.generate(query).await {
                Ok(passage) => match self.embedder.embed(&passage).await {
                    Ok(v) => vector = Some(v),
                    Err(e) => {
                        tracing::warn!("embedding hypothetical document failed, using original query: {e}");
                    }
                },
                Err(e) => tracing::warn!("HyDE failed, using original query: {e}"),
            }
        }
        let hyde_used = vector.is_some();
        let vector = match vector {
            Some(v) => v,
            None => self.embedder.embed(query).await.map_err(|e| {
                SearchError::new("embedder", "embed", "failed to embed query", query).with_source(e)
            })?,
        };

        let hits = self
            .provider
            .search_with_filter(collection, vector, limit, filter.cloned())
            .await
            .map_err(|e| {
                SearchError::new("vector_provider", "search", "vector search failed", query).with_source(e)
            })?;
        let results = hits
            .into_iter()
            .filter(|hit| threshold.is_none_or(|t| hit.score >= t))
            .map(to_result)
            .collect();
        Ok((results, hyde_used))
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("provider", &self.provider.name())
            .field("collection", &self.collection)
            .field("config", &self.config)
            .field("hyde", &self.hyde.is_some())
            .field("multi_query", &self.multi_query.is_some())
            .field("rerank", &self.reranker.is_some())
            .finish_non_exhaustive()
    }
}
