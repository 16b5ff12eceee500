//! Where documents come from.

mod directory;
mod filter;
mod sql;

use std::path::Path;
use std::sync::Arc;

use strata_llm::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::document::Document;
use crate::error::{RagError, Result};

pub use directory::{DirectoryConfig, DirectorySource};
pub use filter::{PatternFilter, validate_pattern};
pub use sql::{SqlSource, SqlTableConfig};

pub(crate) const DOCUMENT_CHANNEL_CAPACITY: usize = 100;
pub(crate) const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Receiving ends of a discovery run. Both channels close once the producer
/// finishes or is cancelled.
#[derive(Debug)]
pub struct Discovery {
    pub documents: mpsc::Receiver<Document>,
    pub errors: mpsc::Receiver<RagError>,
}

/// Sending ends handed to the producer task.
#[derive(Debug, Clone)]
pub struct DiscoverySender {
    pub documents: mpsc::Sender<Document>,
    pub errors: mpsc::Sender<RagError>,
}

impl Discovery {
    #[must_use]
    pub fn channel() -> (DiscoverySender, Self) {
        let (doc_tx, doc_rx) = mpsc::channel(DOCUMENT_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        (
            DiscoverySender {
                documents: doc_tx,
                errors: err_tx,
            },
            Self {
                documents: doc_rx,
                errors: err_rx,
            },
        )
    }
}

/// A corpus the store can enumerate and re-read by id.
pub trait DataSource: Send + Sync {
    fn source_type(&self) -> &str;

    /// Start streaming documents. Must be called inside a tokio runtime; the
    /// producer runs on its own task and stops when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery cannot start at all.
    fn discover(&self, token: CancellationToken) -> Result<Discovery>;

    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] for unknown ids.
    fn read_document<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document>>;

    fn supports_incremental(&self) -> bool;

    /// Modification time of `id` in unix seconds, `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be looked up.
    fn last_modified<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<i64>>>;

    /// Filesystem root, when the source has one. Enables checkpoints and
    /// file watching.
    fn base_path(&self) -> Option<&Path> {
        None
    }

    /// Include/exclude rules the watcher should apply.
    fn filter(&self) -> Option<Arc<PatternFilter>> {
        None
    }

    /// Directory names pruned from walks under [`DataSource::base_path`].
    fn excluded_dirs(&self) -> &[String] {
        &[]
    }

    /// # Errors
    ///
    /// Returns an error if releasing the source's resources fails.
    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
