//! Content extraction with a priority-ordered fallback chain.
//!
//! Extractors are tried from highest to lowest priority. One that errors or
//! produces nothing is skipped; the first non-empty result wins.

mod native;
mod text;
mod tool;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use strata_llm::BoxFuture;

use crate::document::{Document, is_file_like};
use crate::error::ExtractionError;

pub use native::NativeExtractor;
pub use text::TextExtractor;
pub use tool::{ToolExtractor, ToolExtractorConfig};

/// Name reported when a document's existing content is used as-is.
pub const DIRECT_EXTRACTOR: &str = "direct";

/// Normalized text plus whatever descriptive fields the format carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub content: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Extraction {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32;

    fn can_extract(&self, path: &Path, mime_type: &str) -> bool;

    /// Extract text from `doc`. `Ok(None)` means this extractor declines.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or parsing fails.
    fn extract<'a>(
        &'a self,
        doc: &'a Document,
    ) -> BoxFuture<'a, Result<Option<Extraction>, ExtractionError>>;
}

#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Text and native-binary extractors.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextExtractor::new()));
        registry.register(Arc::new(NativeExtractor::new()));
        registry
    }

    /// Add an extractor, keeping descending priority order. Equal priorities
    /// keep registration order.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        let pos = self
            .extractors
            .iter()
            .position(|e| e.priority() < extractor.priority())
            .unwrap_or(self.extractors.len());
        tracing::debug!(
            extractor = extractor.name(),
            priority = extractor.priority(),
            "registered extractor"
        );
        self.extractors.insert(pos, extractor);
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.extractors.iter().map(|e| e.name().to_owned()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Fill `doc.content`, title, author and metadata from the first extractor
    /// that succeeds, and return its name.
    ///
    /// A document that already carries content and has no readable file
    /// behind it is returned unchanged as [`DIRECT_EXTRACTOR`].
    ///
    /// # Errors
    ///
    /// Returns an error when no extractor produced content.
    pub async fn extract(&self, doc: &mut Document) -> Result<String, ExtractionError> {
        let path = doc.file_path();
        let path_str = path.to_string_lossy().into_owned();
        if !doc.content.is_empty()
            && (!is_file_like(&path_str)
                || !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()))
        {
            doc.extractor = Some(DIRECT_EXTRACTOR.to_owned());
            return Ok(DIRECT_EXTRACTOR.to_owned());
        }

        for extractor in &self.extractors {
            if !extractor.can_extract(&path, &doc.mime_type) {
                continue;
            }
            match extractor.extract(doc).await {
                Ok(Some(extraction)) if !extraction.content.trim().is_empty() => {
                    let name = extractor.name().to_owned();
                    apply(doc, extraction, &name);
                    return Ok(name);
                }
                Ok(_) => {
                    tracing::debug!(extractor = extractor.name(), path = %path_str, "extractor produced no content");
                }
                Err(e) => {
                    tracing::debug!(extractor = extractor.name(), path = %path_str, "extractor failed: {e}");
                }
            }
        }

        Err(ExtractionError::new(
            "registry",
            path_str.clone(),
            format!(
                "no suitable extractor found for file: {path_str} (mime: {})",
                doc.mime_type
            ),
        ))
    }
}

fn apply(doc: &mut Document, extraction: Extraction, name: &str) {
    doc.content = extraction.content;
    if let Some(title) = extraction.title.filter(|t| !t.is_empty()) {
        doc.title = title;
    }
    if let Some(author) = extraction.author.filter(|a| !a.is_empty()) {
        doc.author = author;
    }
    doc.metadata.extend(extraction.metadata);
    doc.extractor = Some(name.to_owned());
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        name: &'static str,
        priority: i32,
        outcome: Result<Option<&'static str>, &'static str>,
    }

    impl Extractor for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn can_extract(&self, _path: &Path, _mime: &str) -> bool {
            true
        }

        fn extract<'a>(
            &'a self,
            doc: &'a Document,
        ) -> BoxFuture<'a, Result<Option<Extraction>, ExtractionError>> {
            Box::pin(async move {
                match self.outcome {
                    Ok(content) => Ok(content.map(|c| Extraction {
                        title: Some(format!("{} title", self.name)),
                        ..Extraction::new(c)
                    })),
                    Err(msg) => Err(ExtractionError::new(self.name, doc.source_path.clone(), msg)),
                }
            })
        }
    }

    fn file_doc() -> Document {
        Document::new("d").with_source_path("/nonexistent/report.bin")
    }

    #[tokio::test]
    async fn falls_back_when_higher_priority_fails() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(Scripted {
            name: "low",
            priority: 1,
            outcome: Ok(Some("from low")),
        }));
        registry.register(Arc::new(Scripted {
            name: "high",
            priority: 9,
            outcome: Err("parser crashed"),
        }));

        let mut doc = file_doc();
        let used = registry.extract(&mut doc).await.unwrap();
        assert_eq!(used, "low");
        assert_eq!(doc.content, "from low");
        assert_eq!(doc.title, "low title");
        assert_eq!(doc.extractor.as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn empty_result_is_skipped() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(Scripted {
            name: "blank",
            priority: 5,
            outcome: Ok(Some("   ")),
        }));
        registry.register(Arc::new(Scripted {
            name: "none",
            priority: 4,
            outcome: Ok(None),
        }));
        registry.register(Arc::new(Scripted {
            name: "good",
            priority: 3,
            outcome: Ok(Some("text")),
        }));
        let mut doc = file_doc();
        assert_eq!(registry.extract(&mut doc).await.unwrap(), "good");
    }

    #[tokio::test]
    async fn all_failing_reports_path_and_mime() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(Scripted {
            name: "bad",
            priority: 1,
            outcome: Err("nope"),
        }));
        let mut doc = file_doc();
        doc.mime_type = "application/x-custom".into();
        let err = registry.extract(&mut doc).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("no suitable extractor found for file: /nonexistent/report.bin"));
        assert!(msg.contains("(mime: application/x-custom)"));
    }

    #[tokio::test]
    async fn binary_file_without_native_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        std::fs::write(&path, [0u8, 159, 146, 150, 0, 1]).unwrap();
        let mut doc = Document::new("image").with_source_path(path.to_string_lossy().into_owned());
        doc.mime_type = "application/octet-stream".into();

        let err = ExtractorRegistry::with_defaults()
            .extract(&mut doc)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no suitable extractor found"));
        assert!(doc.content.is_empty());
    }

    #[tokio::test]
    async fn existing_content_without_file_is_direct() {
        let registry = ExtractorRegistry::with_defaults();
        let mut doc = Document::new("sqlite:notes:1")
            .with_source_path("notes/1")
            .with_content("row body");
        assert_eq!(registry.extract(&mut doc).await.unwrap(), DIRECT_EXTRACTOR);
        assert_eq!(doc.content, "row body");
    }

    #[test]
    fn register_orders_by_priority() {
        let mut registry = ExtractorRegistry::new();
        for (name, priority) in [("a", 1), ("b", 8), ("c", 5), ("d", 8)] {
            registry.register(Arc::new(Scripted {
                name,
                priority,
                outcome: Ok(None),
            }));
        }
        assert_eq!(registry.names(), vec!["b", "d", "c", "a"]);
    }
}
