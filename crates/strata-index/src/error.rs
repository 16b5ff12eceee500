//! Error types for strata-index.
//!
//! The taxonomy mirrors where a failure happens: store setup, per-file
//! extraction, chunking, per-document index operations and query-time search.
//! [`RagError`] wraps all of them for `?` propagation.

use strata_llm::LlmError;
use strata_memory::VectorStoreError;
use strata_tools::ToolError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const MAX_QUERY_IN_ERROR: usize = 50;

fn file_suffix(path: Option<&str>) -> String {
    path.filter(|p| !p.is_empty())
        .map(|p| format!(" (file: {p})"))
        .unwrap_or_default()
}

fn query_suffix(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    if query.len() <= MAX_QUERY_IN_ERROR {
        return format!(" (query: {query:?})");
    }
    let mut end = MAX_QUERY_IN_ERROR;
    while !query.is_char_boundary(end) {
        end -= 1;
    }
    format!(" (query: \"{}...\")", &query[..end])
}

fn cause_suffix(source: Option<&(dyn std::error::Error + Send + Sync)>) -> String {
    source.map(|e| format!(": {e}")).unwrap_or_default()
}

/// Store-level failure such as misconfiguration or an unusable collaborator.
#[derive(Debug, thiserror::Error)]
#[error(
    "[{store}] {operation}: {message}{}{}",
    file_suffix(.file_path.as_deref()),
    cause_suffix(.source.as_deref())
)]
pub struct DocumentStoreError {
    pub store: String,
    pub operation: String,
    pub message: String,
    pub file_path: Option<String>,
    pub source: Option<BoxError>,
}

impl DocumentStoreError {
    #[must_use]
    pub fn new(store: impl Into<String>, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            operation: operation.into(),
            message: message.into(),
            file_path: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A single extractor failed on a single file.
#[derive(Debug, thiserror::Error)]
#[error(
    "[{extractor}] extraction failed for {file_path}: {message}{}",
    cause_suffix(.source.as_deref())
)]
pub struct ExtractionError {
    pub extractor: String,
    pub file_path: String,
    pub message: String,
    pub source: Option<BoxError>,
}

impl ExtractionError {
    #[must_use]
    pub fn new(extractor: impl Into<String>, file_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            extractor: extractor.into(),
            file_path: file_path.into(),
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("[{strategy}] chunking failed for {document_id}: {message}")]
pub struct ChunkingError {
    pub strategy: String,
    pub document_id: String,
    pub message: String,
}

impl ChunkingError {
    #[must_use]
    pub fn new(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            document_id: String::new(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn for_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = document_id.into();
        self
    }
}

/// Embed, upsert or delete failed for one document.
#[derive(Debug, thiserror::Error)]
#[error(
    "[{store}] index {operation} failed for {document_id}: {message}{}",
    cause_suffix(.source.as_deref())
)]
pub struct IndexError {
    pub store: String,
    pub document_id: String,
    pub operation: String,
    pub message: String,
    pub source: Option<BoxError>,
}

impl IndexError {
    #[must_use]
    pub fn new(
        store: impl Into<String>,
        document_id: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            store: store.into(),
            document_id: document_id.into(),
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Query-time failure in one pipeline component. The query is truncated in
/// the message so logs stay bounded.
#[derive(Debug, thiserror::Error)]
#[error(
    "[{component}] {operation}: {message}{}{}",
    query_suffix(.query),
    cause_suffix(.source.as_deref())
)]
pub struct SearchError {
    pub component: String,
    pub operation: String,
    pub message: String,
    pub query: String,
    pub source: Option<BoxError>,
}

impl SearchError {
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            query: query.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Returned by the retryer once an operation stops being retried.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        last_error: Box<RagError>,
    },

    #[error("{operation} failed (attempt {attempts}): {last_error}")]
    Failed {
        operation: String,
        attempts: u32,
        #[source]
        last_error: Box<RagError>,
    },
}

impl RetryError {
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub fn last_error(&self) -> &RagError {
        match self {
            Self::Exhausted { last_error, .. } | Self::Failed { last_error, .. } => last_error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error(transparent)]
    Store(#[from] DocumentStoreError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl RagError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Retry(e) => e.last_error().is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
