//! Documents, chunks and search results.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Well-known metadata keys shared by sources, the store and the search engine.
pub mod keys {
    pub const SHOULD_INDEX: &str = "should_index";
    pub const LAST_MODIFIED: &str = "last_modified";
    pub const SIZE: &str = "size";
    pub const ABSOLUTE_PATH: &str = "absolute_path";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const CHUNK_TOTAL: &str = "chunk_total";
    pub const START_LINE: &str = "start_line";
    pub const END_LINE: &str = "end_line";
    pub const START_BYTE: &str = "start_byte";
    pub const END_BYTE: &str = "end_byte";
    pub const CONTENT: &str = "content";
    pub const TITLE: &str = "title";
    pub const SOURCE_PATH: &str = "source_path";
    pub const COLLECTION: &str = "collection";
    pub const EXTRACTOR: &str = "extractor";
    pub const FUNCTION_NAME: &str = "function_name";
    pub const TYPE_NAME: &str = "type_name";
}

/// A unit of indexable content produced by a data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub source_path: String,
    pub mime_type: String,
    pub size: u64,
    pub title: String,
    pub author: String,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Name of the extractor that produced `content`, set during extraction.
    pub extractor: Option<String>,
}

impl Document {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = path.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the source wants this document indexed. Missing means yes;
    /// the strings `"false"`/`"0"` count as no.
    #[must_use]
    pub fn should_index(&self) -> bool {
        match self.metadata.get(keys::SHOULD_INDEX) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => !matches!(s.as_str(), "false" | "0"),
            Some(serde_json::Value::Number(n)) => n.as_i64() != Some(0),
            _ => true,
        }
    }

    /// Modification time in unix seconds, if the source reported one.
    #[must_use]
    pub fn last_modified(&self) -> Option<i64> {
        match self.metadata.get(keys::LAST_MODIFIED)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s
                .parse::<i64>()
                .ok()
                .or_else(|| chrono::DateTime::parse_from_rfc3339(s).ok().map(|d| d.timestamp())),
            _ => None,
        }
    }

    /// Path extractors should read: the absolute path when the source
    /// recorded one, otherwise `source_path`.
    #[must_use]
    pub fn file_path(&self) -> PathBuf {
        self.metadata
            .get(keys::ABSOLUTE_PATH)
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| PathBuf::from(&self.source_path), PathBuf::from)
    }
}

/// Whether `path` looks like a filesystem path rather than an opaque key.
#[must_use]
pub fn is_file_like(path: &str) -> bool {
    !path.is_empty()
        && (path.contains('/') || path.contains('\\') || Path::new(path).extension().is_some())
}

/// Structural context attached to chunks split on code boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkContext {
    pub function_name: Option<String>,
    pub type_name: Option<String>,
}

/// A contiguous slice of a document's content.
///
/// Lines are 1-based inclusive, bytes are a half-open range into the content
/// the chunk was cut from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
    pub total: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub context: Option<ChunkContext>,
}

/// Vector identity for chunk `index` of `document_id`.
#[must_use]
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}:chunk:{index}")
}

/// A ranked hit returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SearchResult {
    /// Parent document of this hit, falling back to the chunk id.
    #[must_use]
    pub fn document_id(&self) -> &str {
        self.metadata
            .get(keys::DOCUMENT_ID)
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&self.id)
    }
}

/// Guess a MIME type from a file extension.
#[must_use]
pub fn detect_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" | "log" | "rst" | "cfg" | "conf" | "ini" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "js" | "mjs" | "cjs" | "jsx" => "text/javascript",
        "ts" | "tsx" => "text/x-typescript",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "go" => "text/x-go",
        "sh" | "bash" => "text/x-shellscript",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_index_defaults_true() {
        assert!(Document::new("a").should_index());
        assert!(!Document::new("a").with_metadata(keys::SHOULD_INDEX, false).should_index());
        assert!(!Document::new("a").with_metadata(keys::SHOULD_INDEX, "false").should_index());
        assert!(Document::new("a").with_metadata(keys::SHOULD_INDEX, "yes").should_index());
    }

    #[test]
    fn last_modified_accepts_numbers_and_rfc3339() {
        let doc = Document::new("a").with_metadata(keys::LAST_MODIFIED, 1_700_000_000);
        assert_eq!(doc.last_modified(), Some(1_700_000_000));
        let doc = Document::new("a").with_metadata(keys::LAST_MODIFIED, "2024-01-01T00:00:00Z");
        assert_eq!(doc.last_modified(), Some(1_704_067_200));
        assert_eq!(Document::new("a").last_modified(), None);
    }

    #[test]
    fn file_path_prefers_absolute() {
        let doc = Document::new("a")
            .with_source_path("notes/a.md")
            .with_metadata(keys::ABSOLUTE_PATH, "/data/notes/a.md");
        assert_eq!(doc.file_path(), PathBuf::from("/data/notes/a.md"));
        let doc = Document::new("a").with_source_path("notes/a.md");
        assert_eq!(doc.file_path(), PathBuf::from("notes/a.md"));
    }

    #[test]
    fn file_like_detection() {
        assert!(is_file_like("a/b"));
        assert!(is_file_like("report.pdf"));
        assert!(!is_file_like("row-42"));
        assert!(!is_file_like(""));
    }

    #[test]
    fn chunk_id_format() {
        assert_eq!(chunk_id("doc", 3), "doc:chunk:3");
    }

    #[test]
    fn search_result_document_id_fallback() {
        let mut r = SearchResult {
            id: "d:chunk:0".into(),
            content: String::new(),
            score: 1.0,
            vector: None,
            metadata: HashMap::new(),
        };
        assert_eq!(r.document_id(), "d:chunk:0");
        r.metadata.insert(keys::DOCUMENT_ID.into(), json!("d"));
        assert_eq!(r.document_id(), "d");
    }

    #[test]
    fn mime_detection() {
        assert_eq!(detect_mime_type(Path::new("a.PDF")), "application/pdf");
        assert_eq!(detect_mime_type(Path::new("a.md")), "text/markdown");
        assert_eq!(detect_mime_type(Path::new("noext")), "application/octet-stream");
    }
}
