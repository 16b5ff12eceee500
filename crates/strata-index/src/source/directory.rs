use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_llm::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::{DataSource, Discovery, DiscoverySender, PatternFilter};
use crate::document::{Document, detect_mime_type, keys};
use crate::error::{RagError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Directory names pruned from the walk wherever they appear.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_exclude_dirs() -> Vec<String> {
    [".git", "node_modules", "target", "vendor", "__pycache__", ".venv"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_dirs: default_exclude_dirs(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Files under a root directory. Document ids are absolute paths and
/// content is left for the extractors to read.
#[derive(Debug)]
pub struct DirectorySource {
    root: PathBuf,
    config: DirectoryConfig,
    filter: Arc<PatternFilter>,
}

impl DirectorySource {
    /// # Errors
    ///
    /// Returns a configuration error if the root is not an existing directory
    /// or a pattern is invalid.
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let root = std::fs::canonicalize(&config.path).map_err(|e| {
            RagError::Config(format!("directory source {}: {e}", config.path.display()))
        })?;
        if !root.is_dir() {
            return Err(RagError::Config(format!(
                "directory source {} is not a directory",
                root.display()
            )));
        }
        let filter = Arc::new(PatternFilter::new(&root, &config.include, &config.exclude)?);
        Ok(Self {
            root,
            config,
            filter,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path of a document id. Ids that escape the root, sit in an
    /// excluded directory or name no file are not found.
    async fn locate(&self, id: &str) -> Result<PathBuf> {
        let joined = self.root.join(id);
        let path = match tokio::fs::canonicalize(&joined).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::NotFound(id.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        if !path.starts_with(&self.root) || self.in_excluded_dir(&path) {
            tracing::debug!(root = %self.root.display(), document_id = id, "id is outside the indexed tree");
            return Err(RagError::NotFound(id.to_owned()));
        }
        Ok(path)
    }

    fn in_excluded_dir(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .ok()
            .and_then(Path::parent)
            .is_some_and(|dir| {
                dir.components()
                    .any(|c| self.config.exclude_dirs.iter().any(|d| c.as_os_str() == d.as_str()))
            })
    }

    fn within_size_limit(&self, size: u64) -> bool {
        size > 0 && size <= self.config.max_file_size
    }
}

fn unix_mtime(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .map(|t| DateTime::<Utc>::from(t).timestamp())
        .unwrap_or(0)
}

fn file_document(root: &Path, filter: &PatternFilter, path: &Path, meta: &std::fs::Metadata) -> Document {
    let rel = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    let absolute = path.to_string_lossy().into_owned();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut doc = Document::new(absolute.clone())
        .with_source_path(rel.clone())
        .with_metadata("path", rel.clone())
        .with_metadata("rel_path", rel)
        .with_metadata("name", name.clone())
        .with_metadata(keys::ABSOLUTE_PATH, absolute)
        .with_metadata(keys::LAST_MODIFIED, unix_mtime(meta))
        .with_metadata(keys::SIZE, meta.len())
        .with_metadata(keys::SHOULD_INDEX, json!(filter.allows(path)));
    doc.mime_type = detect_mime_type(path).to_owned();
    doc.size = meta.len();
    doc.title = name;
    doc
}

fn walk(
    root: &Path,
    config: &DirectoryConfig,
    filter: &Arc<PatternFilter>,
    tx: &DiscoverySender,
    token: &CancellationToken,
) {
    let excluded: HashSet<String> = config.exclude_dirs.iter().cloned().collect();
    let prune = Arc::clone(filter);
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_dir()) {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !excluded.contains(name.as_ref()) && !prune.should_exclude(entry.path())
        })
        .build();

    for result in walker {
        if token.is_cancelled() {
            tracing::debug!(root = %root.display(), "directory discovery cancelled");
            return;
        }
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                let err = RagError::Other(format!("walk {}: {e}", root.display()));
                if tx.errors.blocking_send(err).is_err() {
                    return;
                }
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                let err = RagError::Other(format!("stat {}: {e}", entry.path().display()));
                if tx.errors.blocking_send(err).is_err() {
                    return;
                }
                continue;
            }
        };
        if meta.len() == 0 || meta.len() > config.max_file_size {
            tracing::trace!(path = %entry.path().display(), size = meta.len(), "skipping by size");
            continue;
        }
        let doc = file_document(root, filter, entry.path(), &meta);
        if tx.documents.blocking_send(doc).is_err() {
            return;
        }
    }
}

impl DataSource for DirectorySource {
    #[allow(clippy::unnecessary_literal_bound)]
    fn source_type(&self) -> &str {
        "directory"
    }

    fn discover(&self, token: CancellationToken) -> Result<Discovery> {
        let (tx, discovery) = Discovery::channel();
        let root = self.root.clone();
        let config = self.config.clone();
        let filter = Arc::clone(&self.filter);
        tokio::task::spawn_blocking(move || walk(&root, &config, &filter, &tx, &token));
        Ok(discovery)
    }

    fn read_document<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document>> {
        Box::pin(async move {
            let path = self.locate(id).await?;
            let meta = tokio::fs::metadata(&path).await?;
            if !meta.is_file() {
                return Err(RagError::NotFound(id.to_owned()));
            }
            let mut doc = file_document(&self.root, &self.filter, &path, &meta);
            if !self.within_size_limit(meta.len()) {
                tracing::debug!(path = %path.display(), size = meta.len(), "outside size limits, not indexable");
                doc.metadata.insert(keys::SHOULD_INDEX.into(), json!(false));
            }
            Ok(doc)
        })
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn last_modified<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<i64>>> {
        Box::pin(async move {
            match tokio::fs::metadata(self.locate(id).await?).await {
                Ok(meta) => Ok(Some(unix_mtime(&meta))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(RagError::NotFound(id.to_owned()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn base_path(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn filter(&self) -> Option<Arc<PatternFilter>> {
        Some(Arc::clone(&self.filter))
    }

    fn excluded_dirs(&self) -> &[String] {
        &self.config.exclude_dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    async fn collect(source: &DirectorySource) -> Vec<Document> {
        let mut discovery = source.discover(CancellationToken::new()).unwrap();
        let mut docs = Vec::new();
        while let Some(doc) = discovery.documents.recv().await {
            docs.push(doc);
        }
        docs.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        docs
    }

    fn source(root: &Path, include: &[&str], max_file_size: u64) -> DirectorySource {
        DirectorySource::new(DirectoryConfig {
            path: root.to_path_buf(),
            include: include.iter().map(|s| (*s).to_owned()).collect(),
            max_file_size,
            ..DirectoryConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn missing_root_is_config_error() {
        let err = DirectorySource::new(DirectoryConfig {
            path: PathBuf::from("/definitely/not/here"),
            ..DirectoryConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[tokio::test]
    async fn walks_files_and_prunes_excluded_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.md", "# a");
        write(dir.path(), "sub/b.txt", "b");
        write(dir.path(), ".hidden.txt", "h");
        write(dir.path(), "node_modules/pkg/index.js", "x");
        write(dir.path(), ".git/HEAD", "ref");
        write(dir.path(), "empty.txt", "");
        write(dir.path(), "big.txt", &"z".repeat(64));

        let src = source(dir.path(), &[], 32);
        let docs = collect(&src).await;
        let paths: Vec<_> = docs.iter().map(|d| d.source_path.as_str()).collect();
        assert_eq!(paths, vec![".hidden.txt", "a.md", "sub/b.txt"]);

        let b = &docs[2];
        assert!(Path::new(&b.id).is_absolute());
        assert_eq!(b.file_path(), PathBuf::from(&b.id));
        assert_eq!(b.metadata["name"], json!("b.txt"));
        assert_eq!(b.metadata["rel_path"], json!("sub/b.txt"));
        assert_eq!(b.mime_type, "text/plain");
        assert_eq!(b.size, 1);
        assert!(b.last_modified().unwrap() > 0);
        assert!(b.should_index());
    }

    #[tokio::test]
    async fn include_rules_mark_documents_not_indexable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.md", "k");
        write(dir.path(), "skip.rs", "s");
        let docs = collect(&source(dir.path(), &["*.md"], 1024)).await;
        assert_eq!(docs.len(), 2);
        assert!(docs[0].should_index());
        assert!(!docs[1].should_index());
    }

    #[tokio::test]
    async fn read_and_last_modified() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "hello");
        let src = source(dir.path(), &[], 1024);
        let id = src.root().join("a.txt").to_string_lossy().into_owned();

        let doc = src.read_document(&id).await.unwrap();
        assert_eq!(doc.source_path, "a.txt");
        assert!(src.last_modified(&id).await.unwrap().is_some());
        assert!(src.read_document("a.txt").await.is_ok());

        let missing = src.read_document("nope.txt").await.unwrap_err();
        assert!(matches!(missing, RagError::NotFound(_)));
        assert!(src.supports_incremental());
        assert_eq!(src.base_path(), Some(src.root()));
    }

    #[tokio::test]
    async fn read_refuses_ids_outside_indexed_tree() {
        let outer = tempfile::tempdir().unwrap();
        write(outer.path(), "secret.txt", "keep out");
        write(outer.path(), "docs/ok.txt", "fine");
        write(outer.path(), "docs/node_modules/dep.txt", "vendored");
        write(outer.path(), "docs/big.txt", &"z".repeat(64));
        write(outer.path(), "docs/empty.txt", "");
        let src = source(&outer.path().join("docs"), &[], 32);

        let secret = std::fs::canonicalize(outer.path().join("secret.txt")).unwrap();
        let secret_id = secret.to_string_lossy().into_owned();
        assert!(matches!(src.read_document(&secret_id).await, Err(RagError::NotFound(_))));
        assert!(matches!(src.read_document("../secret.txt").await, Err(RagError::NotFound(_))));
        assert!(matches!(src.last_modified("../secret.txt").await, Err(RagError::NotFound(_))));
        assert!(matches!(
            src.read_document("node_modules/dep.txt").await,
            Err(RagError::NotFound(_))
        ));

        assert!(src.read_document("ok.txt").await.unwrap().should_index());
        assert!(!src.read_document("big.txt").await.unwrap().should_index());
        assert!(!src.read_document("empty.txt").await.unwrap().should_index());
    }

    #[tokio::test]
    async fn cancelled_discovery_closes_channels() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            write(dir.path(), &format!("f{i}.txt"), "x");
        }
        let src = source(dir.path(), &[], 1024);
        let token = CancellationToken::new();
        token.cancel();
        let mut discovery = src.discover(token).unwrap();
        let mut seen = 0;
        while discovery.documents.recv().await.is_some() {
            seen += 1;
        }
        assert!(seen < 20);
        assert!(discovery.errors.recv().await.is_none());
    }
}
