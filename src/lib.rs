//! Strata: document indexing and retrieval for LLM agents.
//!
//! This crate re-exports the workspace members under one roof:
//!
//! - [`index`]: sources, extractors, chunkers, the document store and the
//!   search engine
//! - [`llm`]: the embedding and generation contracts the engine consumes
//! - [`memory`]: the vector storage contract and an in-memory backend
//! - [`tools`]: the tool-execution contract used by delegated extraction
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use strata::index::{
//!     DirectorySource, DocumentStoreBuilder, RagConfig, SearchEngine, SearchRequest,
//! };
//! use strata::memory::InMemoryVectorStore;
//!
//! # async fn run(
//! #     embedder: Arc<dyn strata::llm::Embedder>,
//! #     llm: Arc<dyn strata::llm::Llm>,
//! # ) -> anyhow::Result<()> {
//! let config = RagConfig::load(std::path::Path::new("strata.toml"))?;
//! config.validate()?;
//!
//! let engine = SearchEngine::new(Arc::new(InMemoryVectorStore::new()), embedder)
//!     .with_config(config.search.clone())
//!     .with_llm(llm);
//! let store = DocumentStoreBuilder::from_config(&config)
//!     .source(Arc::new(DirectorySource::new(config.directory.clone())?))
//!     .engine(Arc::new(engine))
//!     .build()?;
//!
//! let token = tokio_util::sync::CancellationToken::new();
//! store.index(&token).await?;
//! let hits = store.search(SearchRequest::new("how are retries configured")).await?;
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```

pub use strata_index as index;
pub use strata_llm as llm;
pub use strata_memory as memory;
pub use strata_tools as tools;

pub use strata_index::{
    DocumentStore, Document, RagConfig, RagError, SearchEngine, SearchRequest, SearchResponse,
    SearchResult,
};
