//! Indexing orchestrator: discover → filter → extract → chunk → embed → upsert.
//!
//! One producer task streams documents from the [`DataSource`]; a semaphore
//! admits at most `max_concurrent` worker tasks at a time. A failing document
//! is retried, then recorded as failed, and never aborts the run.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointManager, FileStatus};
use crate::chunk::{Chunker, ChunkerConfig, build_chunker};
use crate::config::RagConfig;
use crate::document::{Document, SearchResult, keys};
use crate::error::{DocumentStoreError, RagError, Result};
use crate::extract::ExtractorRegistry;
use crate::metrics::{IndexMetrics, IndexMetricsSnapshot};
use crate::progress::{ProgressStats, ProgressTracker};
use crate::retry::{RetryConfig, Retryer};
use crate::search::{SearchEngine, SearchRequest, SearchResponse};
use crate::source::DataSource;
use crate::watcher::{FileEvent, FileEventKind, FileWatcher, WatcherConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `strata-checkpoints` under the system temp directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_save_interval_secs() -> u64 {
    10
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            save_interval_secs: default_save_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_name")]
    pub name: String,
    /// Vector collection; defaults to the store name.
    #[serde(default)]
    pub collection: Option<String>,
    /// Worker pool size. Zero uses the host CPU count.
    #[serde(default)]
    pub max_concurrent: usize,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default = "default_true")]
    pub progress: bool,
}

fn default_store_name() -> String {
    "default".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: default_store_name(),
            collection: None,
            max_concurrent: 0,
            incremental: false,
            watch: false,
            checkpoint: CheckpointConfig::default(),
            progress: true,
        }
    }
}

/// Resolve a configured pool size, zero meaning one worker per CPU.
#[must_use]
pub fn effective_concurrency(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Outcome of one [`DocumentStore::index`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub total: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub deleted: u64,
    pub discovery_errors: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub name: String,
    pub source_type: String,
    pub collection: String,
    /// Documents currently tracked as indexed by this process.
    pub indexed_documents: usize,
    pub total_docs: u64,
    pub indexed_docs: u64,
    pub skipped_docs: u64,
    pub error_docs: u64,
    pub docs_per_second: f64,
    pub search_count: u64,
    pub watching: bool,
    pub last_index: Option<DateTime<Utc>>,
}

/// State shared between the store, its workers and the watch loop.
struct Shared {
    name: String,
    collection: String,
    source: Arc<dyn DataSource>,
    engine: Arc<SearchEngine>,
    chunker: Arc<dyn Chunker>,
    extractors: ExtractorRegistry,
    retryer: Retryer,
    checkpoints: CheckpointManager,
    progress: Arc<ProgressTracker>,
    metrics: IndexMetrics,
    /// Document id to unix seconds of its last successful index.
    indexed: RwLock<HashMap<String, i64>>,
}

impl Shared {
    fn indexed_at(&self, id: &str) -> Option<i64> {
        self.indexed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    fn mark_indexed(&self, id: &str) {
        self.indexed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_owned(), Utc::now().timestamp());
    }

    fn forget(&self, id: &str) {
        self.indexed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Extract and ingest one document, returning the extractor used.
    async fn index_document(&self, mut doc: Document) -> Result<String> {
        let extractor = self.extractors.extract(&mut doc).await?;
        doc.metadata
            .insert(keys::COLLECTION.into(), serde_json::json!(self.collection));
        self.engine
            .ingest(&self.collection, &doc, self.chunker.as_ref())
            .await?;
        Ok(extractor)
    }

    /// Worker body: retry, then record the outcome everywhere it is tracked.
    async fn process(&self, doc: Document, size: u64, mod_time: i64, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        let id = doc.id.clone();
        self.progress.set_current_file(&id);

        let outcome = self
            .retryer
            .run(token, "index_document", || self.index_document(doc.clone()))
            .await;

        match outcome {
            Ok(extractor) => {
                self.metrics.inc_indexed();
                self.progress.record_indexed();
                self.progress.record_extractor(&extractor);
                self.mark_indexed(&id);
                self.checkpoints.record(&id, size, mod_time, FileStatus::Indexed);
                tracing::debug!(store = %self.name, document_id = %id, extractor = %extractor, "indexed document");
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(store = %self.name, document_id = %id, "indexing cancelled");
                return;
            }
            Err(e) => {
                self.metrics.inc_errors();
                self.progress.record_failed();
                self.checkpoints.record(&id, size, mod_time, FileStatus::Failed);
                tracing::warn!(store = %self.name, document_id = %id, "failed to index document: {e}");
            }
        }
        if let Err(e) = self.checkpoints.save().await {
            tracing::warn!(store = %self.name, "failed to save checkpoint: {e}");
        }
    }

    /// Re-read `id` from the source and index it. Documents the source marks
    /// as excluded are left alone and report zero chunks.
    async fn refresh(&self, id: &str) -> Result<usize> {
        let mut doc = self.source.read_document(id).await?;
        if !doc.should_index() {
            tracing::debug!(store = %self.name, document_id = %id, "refresh skipped, excluded by filters");
            return Ok(0);
        }
        self.extractors.extract(&mut doc).await?;
        doc.metadata
            .insert(keys::COLLECTION.into(), serde_json::json!(self.collection));
        let chunks = self
            .engine
            .ingest(&self.collection, &doc, self.chunker.as_ref())
            .await?;
        self.mark_indexed(&doc.id);
        Ok(chunks)
    }

    async fn delete(&self, id: &str) -> Result<usize> {
        let removed = self.engine.delete_document(&self.collection, id).await?;
        self.forget(id);
        Ok(removed)
    }

    async fn handle_event(&self, event: &FileEvent) -> Result<()> {
        let id = event.path.to_string_lossy();
        match event.kind {
            FileEventKind::Create | FileEventKind::Update => {
                let chunks = self.refresh(&id).await?;
                tracing::debug!(store = %self.name, document_id = %id, kind = ?event.kind, chunks, "indexed changed document");
            }
            FileEventKind::Delete => {
                let removed = self.delete(&id).await?;
                tracing::debug!(store = %self.name, document_id = %id, removed, "removed deleted document");
            }
        }
        Ok(())
    }

    /// Remove documents indexed earlier that this run did not discover.
    async fn cleanup_deleted(&self, found: &HashSet<String>) -> u64 {
        let stale: Vec<String> = self
            .indexed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|id| !found.contains(*id))
            .cloned()
            .collect();

        let mut deleted = 0;
        for id in stale {
            match self.delete(&id).await {
                Ok(_) => {
                    deleted += 1;
                    self.progress.record_deleted();
                }
                Err(e) => {
                    tracing::warn!(store = %self.name, document_id = %id, "failed to delete stale document: {e}");
                }
            }
        }
        if deleted > 0 {
            tracing::info!(store = %self.name, deleted, "cleaned up deleted documents");
        }
        deleted
    }
}

struct WatchHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
    _watcher: FileWatcher,
}

/// A named, searchable index over one data source.
pub struct DocumentStore {
    shared: Arc<Shared>,
    max_concurrent: usize,
    incremental: bool,
    watch_enabled: bool,
    watcher_config: WatcherConfig,
    watch: Mutex<Option<WatchHandle>>,
    last_index: Mutex<Option<DateTime<Utc>>>,
}

impl DocumentStore {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DocumentStoreBuilder {
        DocumentStoreBuilder::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.shared.collection
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<SearchEngine> {
        &self.shared.engine
    }

    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Live progress snapshots, updated while an index run is in flight.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<ProgressStats> {
        self.shared.progress.subscribe()
    }

    #[must_use]
    pub fn progress_stats(&self) -> ProgressStats {
        self.shared.progress.stats()
    }

    /// Run a full indexing pass over the source.
    ///
    /// Per-document failures are counted in the report and never returned.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Cancelled`] if `token` fires, or an error if
    /// discovery cannot start.
    pub async fn index(&self, token: &CancellationToken) -> Result<IndexReport> {
        let shared = &self.shared;
        let started = Instant::now();
        tracing::info!(
            store = %shared.name,
            source = shared.source.source_type(),
            workers = self.max_concurrent,
            "indexing started"
        );

        shared.metrics.reset();
        shared.metrics.mark_started();

        let resuming = match shared.checkpoints.load().await {
            Some(cp) if cp.is_complete() => {
                if let Err(e) = shared.checkpoints.clear().await {
                    tracing::warn!(store = %shared.name, "failed to clear complete checkpoint: {e}");
                }
                false
            }
            Some(cp) => {
                let resumable = !cp.processed_files.is_empty();
                if resumable {
                    tracing::info!(store = %shared.name, "resuming from checkpoint: {}", cp.summary());
                }
                resumable
            }
            None => false,
        };
        shared.checkpoints.begin();

        let mut discovery = shared.source.discover(token.child_token())?;
        shared.progress.start();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut workers = JoinSet::new();
        let mut found: HashSet<String> = HashSet::new();
        let mut report = IndexReport::default();
        let mut errors_open = true;
        let mut cancelled = false;

        loop {
            let doc = tokio::select! {
                biased;
                () = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                err = discovery.errors.recv(), if errors_open => {
                    match err {
                        Some(e) => {
                            report.discovery_errors += 1;
                            tracing::warn!(store = %shared.name, "discovery error: {e}");
                        }
                        None => errors_open = false,
                    }
                    continue;
                }
                doc = discovery.documents.recv() => match doc {
                    Some(doc) => doc,
                    None => break,
                },
            };

            report.total += 1;
            shared.metrics.inc_total();
            shared.progress.inc_total();
            found.insert(doc.id.clone());

            if !doc.should_index() {
                self.record_skip(&mut report, &doc.id, "excluded by filters");
                continue;
            }

            let mod_time = doc.last_modified().unwrap_or(0);
            let size = doc.size;

            if resuming && !shared.checkpoints.should_process(&doc.id, size, mod_time) {
                self.record_skip(&mut report, &doc.id, "already processed");
                continue;
            }
            if self.incremental
                && !resuming
                && shared.indexed_at(&doc.id).is_some_and(|at| mod_time <= at)
            {
                self.record_skip(&mut report, &doc.id, "unchanged");
                continue;
            }

            let permit = tokio::select! {
                () = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|_| RagError::Other("indexing worker pool closed".into()))?,
            };
            let worker_shared = Arc::clone(shared);
            let worker_token = token.clone();
            workers.spawn(async move {
                let _permit = permit;
                worker_shared.process(doc, size, mod_time, &worker_token).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                shared.metrics.inc_errors();
                tracing::error!(store = %shared.name, "indexing worker panicked: {e}");
            }
        }

        if cancelled {
            if let Err(e) = shared.checkpoints.flush().await {
                tracing::warn!(store = %shared.name, "failed to save checkpoint: {e}");
            }
            shared.progress.stop().await;
            shared.metrics.mark_finished();
            tracing::info!(store = %shared.name, "indexing cancelled");
            return Err(RagError::Cancelled);
        }

        if errors_open {
            while let Some(e) = discovery.errors.recv().await {
                report.discovery_errors += 1;
                tracing::warn!(store = %shared.name, "discovery error: {e}");
            }
        }
        shared.checkpoints.set_total(found.len());

        if self.incremental {
            report.deleted = shared.cleanup_deleted(&found).await;
        }

        let snapshot = shared.metrics.snapshot();
        report.indexed = snapshot.indexed_docs;
        report.failed = snapshot.error_docs;

        let checkpoint_result = if report.failed == 0 && report.discovery_errors == 0 {
            shared.checkpoints.clear().await
        } else {
            shared.checkpoints.flush().await
        };
        if let Err(e) = checkpoint_result {
            tracing::warn!(store = %shared.name, "failed to finalize checkpoint: {e}");
        }

        shared.progress.stop().await;
        shared.metrics.mark_finished();
        *self
            .last_index
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

        report.elapsed = started.elapsed();
        #[allow(clippy::cast_precision_loss)]
        let docs_per_sec = if report.elapsed.as_secs_f64() > 0.0 {
            report.indexed as f64 / report.elapsed.as_secs_f64()
        } else {
            0.0
        };
        tracing::info!(
            store = %shared.name,
            total = report.total,
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            deleted = report.deleted,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            docs_per_sec,
            "indexing complete"
        );
        Ok(report)
    }

    fn record_skip(&self, report: &mut IndexReport, id: &str, reason: &str) {
        report.skipped += 1;
        self.shared.metrics.inc_skipped();
        self.shared.progress.record_skipped();
        tracing::trace!(store = %self.shared.name, document_id = %id, reason, "skipped document");
    }

    /// Watch the source's directory and keep the index in step with it.
    /// Does nothing unless watching is enabled and the source has a
    /// filesystem root.
    ///
    /// # Errors
    ///
    /// Returns an error if already watching or the watcher cannot start.
    pub fn start_watching(&self, token: &CancellationToken) -> Result<()> {
        let shared = &self.shared;
        if !self.watch_enabled {
            tracing::debug!(store = %shared.name, "file watching disabled");
            return Ok(());
        }
        let Some(root) = shared.source.base_path() else {
            tracing::warn!(
                store = %shared.name,
                source = shared.source.source_type(),
                "file watching needs a filesystem source"
            );
            return Ok(());
        };

        let mut slot = self.watch.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DocumentStoreError::new(&shared.name, "start_watching", "already watching").into());
        }

        let (watcher, mut events) = FileWatcher::start(
            root,
            shared.source.filter(),
            shared.source.excluded_dirs(),
            &self.watcher_config,
        )
        .map_err(|e| {
            DocumentStoreError::new(&shared.name, "start_watching", "failed to start file watcher")
                .with_source(e)
        })?;

        let child = token.child_token();
        let loop_token = child.clone();
        let loop_shared = Arc::clone(shared);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if let Err(e) = loop_shared.handle_event(&event).await {
                            tracing::warn!(
                                store = %loop_shared.name,
                                path = %event.path.display(),
                                kind = ?event.kind,
                                "failed to apply file change: {e}"
                            );
                        }
                    }
                }
            }
        });

        *slot = Some(WatchHandle {
            token: child,
            task,
            _watcher: watcher,
        });
        tracing::info!(store = %shared.name, root = %root.display(), "watching for document changes");
        Ok(())
    }

    /// Stop the watch loop and wait for it to finish its current event.
    pub async fn stop_watching(&self) {
        let handle = self
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        handle.token.cancel();
        if let Err(e) = handle.task.await {
            tracing::warn!(store = %self.shared.name, "watch loop ended abnormally: {e}");
        }
        tracing::info!(store = %self.shared.name, "stopped watching for document changes");
    }

    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Apply one filesystem change to the index.
    ///
    /// # Errors
    ///
    /// Returns an error if re-reading, extracting, ingesting or deleting the
    /// document fails.
    pub async fn handle_event(&self, event: &FileEvent) -> Result<()> {
        self.shared.handle_event(event).await
    }

    /// Search this store's collection unless the request names another.
    ///
    /// # Errors
    ///
    /// Returns an error if the query is invalid or the search itself fails.
    pub async fn search(&self, mut request: SearchRequest) -> Result<SearchResponse> {
        if request.collection.as_deref().is_none_or(str::is_empty) {
            request.collection = Some(self.shared.collection.clone());
        }
        let response = self.shared.engine.search(&request).await?;
        self.shared.metrics.record_search(response.took);
        Ok(response)
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let shared = &self.shared;
        let snapshot = shared.metrics.snapshot();
        StoreStats {
            name: shared.name.clone(),
            source_type: shared.source.source_type().to_owned(),
            collection: shared.collection.clone(),
            indexed_documents: shared
                .indexed
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            total_docs: snapshot.total_docs,
            indexed_docs: snapshot.indexed_docs,
            skipped_docs: snapshot.skipped_docs,
            error_docs: snapshot.error_docs,
            docs_per_second: snapshot.docs_per_second,
            search_count: snapshot.search_count,
            watching: self.is_watching(),
            last_index: *self.last_index.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> IndexMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Reassemble an indexed document from its stored chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector lookup fails.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let chunks = self
            .shared
            .engine
            .document_chunks(&self.shared.collection, id)
            .await?;
        Ok(assemble_document(id, &chunks))
    }

    /// Re-read, re-extract and re-index one document, returning its chunk
    /// count.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot read it or indexing fails.
    pub async fn refresh_document(&self, id: &str) -> Result<usize> {
        let chunks = self.shared.refresh(id).await?;
        tracing::info!(store = %self.shared.name, document_id = %id, chunks, "refreshed document");
        Ok(chunks)
    }

    /// # Errors
    ///
    /// Returns an error if the provider rejects the delete.
    pub async fn delete_document(&self, id: &str) -> Result<usize> {
        self.shared.delete(id).await
    }

    /// Drop every indexed chunk and forget indexing history, including any
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be recreated or the
    /// checkpoint file cannot be removed.
    pub async fn clear(&self) -> Result<()> {
        let shared = &self.shared;
        shared
            .indexed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        shared.engine.clear(&shared.collection).await?;
        shared.checkpoints.clear().await?;
        tracing::info!(store = %shared.name, "cleared store");
        Ok(())
    }

    /// Stop watching and release the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails to close.
    pub async fn close(&self) -> Result<()> {
        self.stop_watching().await;
        self.shared.source.close().await
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("name", &self.shared.name)
            .field("collection", &self.shared.collection)
            .field("source", &self.shared.source.source_type())
            .field("max_concurrent", &self.max_concurrent)
            .field("incremental", &self.incremental)
            .finish_non_exhaustive()
    }
}

fn payload_usize(chunk: &SearchResult, key: &str) -> Option<usize> {
    chunk
        .metadata
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

const CHUNK_KEYS: [&str; 9] = [
    keys::CHUNK_INDEX,
    keys::CHUNK_TOTAL,
    keys::START_LINE,
    keys::END_LINE,
    keys::START_BYTE,
    keys::END_BYTE,
    keys::CONTENT,
    keys::FUNCTION_NAME,
    keys::TYPE_NAME,
];

/// Stitch ordered chunks back into one document, dropping regions repeated
/// by overlapping chunks.
fn assemble_document(id: &str, chunks: &[SearchResult]) -> Option<Document> {
    let first = chunks.first()?;
    let mut content = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        match (
            payload_usize(chunk, keys::START_BYTE),
            payload_usize(chunk, keys::END_BYTE),
        ) {
            (Some(start), Some(end)) => {
                if end <= covered {
                    continue;
                }
                let skip = covered.saturating_sub(start);
                content.push_str(chunk.content.get(skip..).unwrap_or(&chunk.content));
                covered = end;
            }
            _ => content.push_str(&chunk.content),
        }
    }

    let text = |key: &str| {
        first
            .metadata
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    };
    let mut metadata = first.metadata.clone();
    for key in CHUNK_KEYS {
        metadata.remove(key);
    }

    Some(Document {
        id: id.to_owned(),
        size: content.len() as u64,
        content,
        source_path: text(keys::SOURCE_PATH).unwrap_or_default(),
        title: text(keys::TITLE).unwrap_or_default(),
        extractor: text(keys::EXTRACTOR),
        metadata,
        ..Document::default()
    })
}

pub struct DocumentStoreBuilder {
    name: String,
    source: Option<Arc<dyn DataSource>>,
    engine: Option<Arc<SearchEngine>>,
    chunker: Option<Arc<dyn Chunker>>,
    chunker_config: ChunkerConfig,
    collection: Option<String>,
    config: StoreConfig,
    retry: RetryConfig,
    extractors: Option<ExtractorRegistry>,
    watcher: WatcherConfig,
}

impl DocumentStoreBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            engine: None,
            chunker: None,
            chunker_config: ChunkerConfig::default(),
            collection: None,
            config: StoreConfig::default(),
            retry: RetryConfig::default(),
            extractors: None,
            watcher: WatcherConfig::default(),
        }
    }

    /// Start from loaded settings: the store name and options, chunker,
    /// retry policy and watcher. The search settings belong to the
    /// [`SearchEngine`] passed to [`DocumentStoreBuilder::engine`].
    #[must_use]
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            chunker_config: config.chunker.clone(),
            config: config.store.clone(),
            retry: config.retry.clone(),
            watcher: config.watcher.clone(),
            ..Self::new(config.store.name.clone())
        }
    }

    #[must_use]
    pub fn source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: Arc<SearchEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Takes precedence over [`DocumentStoreBuilder::chunker_config`].
    #[must_use]
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    #[must_use]
    pub fn chunker_config(mut self, config: ChunkerConfig) -> Self {
        self.chunker_config = config;
        self
    }

    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Everything but the name, which stays as given to the builder.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n;
        self
    }

    #[must_use]
    pub fn incremental(mut self, on: bool) -> Self {
        self.config.incremental = on;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn extractors(mut self, registry: ExtractorRegistry) -> Self {
        self.extractors = Some(registry);
        self
    }

    #[must_use]
    pub fn watcher(mut self, config: WatcherConfig) -> Self {
        self.watcher = config;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the name, source or engine is missing, or the
    /// chunker configuration is invalid.
    pub fn build(self) -> Result<DocumentStore> {
        let name = self.name;
        if name.trim().is_empty() {
            return Err(DocumentStoreError::new("", "new", "store name is required").into());
        }
        let source = self
            .source
            .ok_or_else(|| DocumentStoreError::new(&name, "new", "data source is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| DocumentStoreError::new(&name, "new", "search engine is required"))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => build_chunker(&self.chunker_config).map_err(|e| {
                DocumentStoreError::new(&name, "new", "invalid chunker configuration").with_source(e)
            })?,
        };
        let collection = self
            .collection
            .or_else(|| self.config.collection.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| name.clone());

        let checkpoint_cfg = &self.config.checkpoint;
        let checkpoints = match source.base_path() {
            Some(root) if checkpoint_cfg.enabled => CheckpointManager::new(
                &name,
                &root.to_string_lossy(),
                checkpoint_cfg.dir.as_deref(),
                true,
            )
            .with_save_interval(Duration::from_secs(checkpoint_cfg.save_interval_secs)),
            _ => CheckpointManager::disabled(),
        };

        let max_concurrent = effective_concurrency(self.config.max_concurrent);
        let metrics = IndexMetrics::new(&name);
        tracing::debug!(
            store = %name,
            collection = %collection,
            chunker = chunker.name(),
            max_concurrent,
            checkpoints = checkpoints.is_enabled(),
            "document store created"
        );

        Ok(DocumentStore {
            shared: Arc::new(Shared {
                name,
                collection,
                source,
                engine,
                chunker,
                extractors: self.extractors.unwrap_or_else(ExtractorRegistry::with_defaults),
                retryer: Retryer::new(self.retry),
                checkpoints,
                progress: Arc::new(ProgressTracker::new(self.config.progress)),
                metrics,
                indexed: RwLock::new(HashMap::new()),
            }),
            max_concurrent,
            incremental: self.config.incremental,
            watch_enabled: self.config.watch,
            watcher_config: self.watcher,
            watch: Mutex::new(None),
            last_index: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for DocumentStoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStoreBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
