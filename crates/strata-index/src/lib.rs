//! Document indexing and semantic retrieval.
//!
//! Sources stream documents into a bounded worker pool; each document is
//! extracted through a priority-ordered fallback chain, split by a chunker,
//! embedded and upserted into a vector collection. Runs are checkpointed so
//! an interrupted index resumes where it stopped, and a filesystem watcher
//! keeps the collection current between runs. Search embeds the query,
//! optionally rewritten by `HyDE` or multi-query expansion, and can rerank
//! the merged hits with an LLM.

pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod health;
pub mod languages;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod search;
pub mod source;
pub mod store;
pub mod watcher;

pub use chunk::{Chunker, ChunkerConfig, ChunkerKind, build_chunker};
pub use config::RagConfig;
pub use document::{Chunk, ChunkContext, Document, SearchResult};
pub use error::{RagError, Result};
pub use extract::{Extraction, Extractor, ExtractorRegistry};
pub use search::{SearchConfig, SearchEngine, SearchOptions, SearchRequest, SearchResponse};
pub use source::{DataSource, DirectoryConfig, DirectorySource, SqlSource};
pub use store::{DocumentStore, DocumentStoreBuilder, IndexReport, StoreConfig, StoreStats};
