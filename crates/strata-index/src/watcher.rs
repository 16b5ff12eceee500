//! Debounced filesystem events for live re-indexing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ignore::WalkBuilder;
use notify_debouncer_mini::{DebouncedEventKind, Debouncer, new_debouncer};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Result;
use crate::source::PatternFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Events beyond this many pending ones are dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_channel_capacity() -> usize {
    100
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

/// Turns raw "something changed at this path" notices into typed events by
/// comparing the filesystem against the files seen so far.
#[derive(Debug)]
struct Classifier {
    root: PathBuf,
    excluded_dirs: HashSet<String>,
    filter: Option<Arc<PatternFilter>>,
    known: HashSet<PathBuf>,
}

impl Classifier {
    fn new(root: &Path, excluded_dirs: &[String], filter: Option<Arc<PatternFilter>>) -> Self {
        let mut classifier = Self {
            root: root.to_path_buf(),
            excluded_dirs: excluded_dirs.iter().cloned().collect(),
            filter,
            known: HashSet::new(),
        };
        classifier.seed();
        classifier
    }

    fn seed(&mut self) {
        let excluded = self.excluded_dirs.clone();
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_some_and(|t| t.is_dir())
                    || !excluded.contains(entry.file_name().to_string_lossy().as_ref())
            })
            .build();
        for entry in walker.flatten() {
            if entry.file_type().is_some_and(|t| t.is_file()) && self.accepts(entry.path()) {
                self.known.insert(entry.into_path());
            }
        }
        tracing::debug!(root = %self.root.display(), files = self.known.len(), "watcher seeded");
    }

    fn in_excluded_dir(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let mut components: Vec<_> = rel.components().collect();
        components.pop();
        components
            .iter()
            .any(|c| self.excluded_dirs.contains(c.as_os_str().to_string_lossy().as_ref()))
    }

    fn accepts(&self, path: &Path) -> bool {
        !self.in_excluded_dir(path) && self.filter.as_ref().is_none_or(|f| f.allows(path))
    }

    fn classify(&mut self, path: &Path) -> Vec<FileEvent> {
        if path.is_file() {
            if !self.accepts(path) {
                return Vec::new();
            }
            let kind = if self.known.insert(path.to_path_buf()) {
                FileEventKind::Create
            } else {
                FileEventKind::Update
            };
            return vec![FileEvent {
                kind,
                path: path.to_path_buf(),
            }];
        }
        if path.exists() {
            return Vec::new();
        }
        if self.known.remove(path) {
            return vec![FileEvent {
                kind: FileEventKind::Delete,
                path: path.to_path_buf(),
            }];
        }
        // A removed directory takes every known file beneath it along.
        let gone: Vec<PathBuf> = self
            .known
            .iter()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        gone.into_iter()
            .map(|p| {
                self.known.remove(&p);
                FileEvent {
                    kind: FileEventKind::Delete,
                    path: p,
                }
            })
            .collect()
    }
}

/// Recursive watch over a directory tree. Dropping it stops the watch and
/// closes the event channel.
pub struct FileWatcher {
    root: PathBuf,
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl FileWatcher {
    /// Watch `root`, publishing classified events on the returned channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start(
        root: &Path,
        filter: Option<Arc<PatternFilter>>,
        excluded_dirs: &[String],
        config: &WatcherConfig,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>)> {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let mut classifier = Classifier::new(root, excluded_dirs, filter);

        let mut debouncer = new_debouncer(
            Duration::from_millis(config.debounce_ms),
            move |events: std::result::Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("file watcher error: {e}");
                        return;
                    }
                };

                let paths: HashSet<PathBuf> = events
                    .into_iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any)
                    .map(|e| e.path)
                    .collect();

                for path in paths {
                    for event in classifier.classify(&path) {
                        match tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(dropped)) => {
                                tracing::warn!(
                                    path = %dropped.path.display(),
                                    kind = ?dropped.kind,
                                    "watcher channel full, dropping event"
                                );
                            }
                            Err(TrySendError::Closed(_)) => return,
                        }
                    }
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "file watcher started");

        Ok((
            Self {
                root: root.to_path_buf(),
                _debouncer: debouncer,
            },
            rx,
        ))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        tracing::info!(root = %self.root.display(), "file watcher stopped");
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excluded() -> Vec<String> {
        vec!["node_modules".into()]
    }

    #[test]
    fn classifier_tracks_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("old.txt"), "x").unwrap();
        let mut c = Classifier::new(root, &excluded(), None);

        let old = root.join("old.txt");
        assert_eq!(c.classify(&old)[0].kind, FileEventKind::Update);

        let new = root.join("new.txt");
        std::fs::write(&new, "y").unwrap();
        assert_eq!(c.classify(&new)[0].kind, FileEventKind::Create);
        assert_eq!(c.classify(&new)[0].kind, FileEventKind::Update);

        std::fs::remove_file(&new).unwrap();
        assert_eq!(c.classify(&new)[0].kind, FileEventKind::Delete);
        assert!(c.classify(&new).is_empty());
    }

    #[test]
    fn classifier_ignores_excluded_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("node_modules/pkg/a.js"), "x").unwrap();
        std::fs::write(root.join("b.log"), "x").unwrap();
        let filter = PatternFilter::new(root, &[], &["*.log".into()]).unwrap();
        let mut c = Classifier::new(root, &excluded(), Some(Arc::new(filter)));

        assert!(c.known.is_empty());
        assert!(c.classify(&root.join("node_modules/pkg/a.js")).is_empty());
        assert!(c.classify(&root.join("b.log")).is_empty());
        assert!(c.classify(root).is_empty());
    }

    #[test]
    fn removed_directory_deletes_known_children() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/a.txt"), "a").unwrap();
        std::fs::write(root.join("sub/b.txt"), "b").unwrap();
        let mut c = Classifier::new(root, &excluded(), None);

        std::fs::remove_dir_all(root.join("sub")).unwrap();
        let events = c.classify(&root.join("sub"));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == FileEventKind::Delete));
    }

    #[tokio::test]
    async fn start_with_nonexistent_directory_fails() {
        let result = FileWatcher::start(
            Path::new("/nonexistent/path/xyz"),
            None,
            &[],
            &WatcherConfig::default(),
        );
        assert!(result.is_err());
    }

    async fn wait_for(rx: &mut mpsc::Receiver<FileEvent>, kind: FileEventKind, path: &Path) {
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = rx.recv().await {
                if event.kind == kind && event.path == path {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(found, Ok(true), "no {kind:?} event for {}", path.display());
    }

    #[tokio::test]
    async fn emits_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let config = WatcherConfig {
            debounce_ms: 50,
            ..WatcherConfig::default()
        };
        let (_watcher, mut rx) = FileWatcher::start(&root, None, &[], &config).unwrap();

        let file = root.join("note.md");
        std::fs::write(&file, "hello").unwrap();
        wait_for(&mut rx, FileEventKind::Create, &file).await;

        std::fs::remove_file(&file).unwrap();
        wait_for(&mut rx, FileEventKind::Delete, &file).await;
    }
}
