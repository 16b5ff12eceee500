use std::path::Path;

use strata_llm::BoxFuture;

use super::{Extraction, Extractor};
use crate::document::Document;
use crate::error::ExtractionError;

const NAME: &str = "TextExtractor";
const SNIFF_BYTES: usize = 8 * 1024;

/// Plain-text reader for anything text-like: the lowest-priority fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl TextExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime == "application/json"
        || mime == "application/xml"
        || mime.contains("javascript")
}

/// MIME types that are known not to be text even though they may be
/// detected generically.
fn is_binary_mime(mime: &str) -> bool {
    mime.starts_with("image/")
        || mime.starts_with("audio/")
        || mime.starts_with("video/")
        || mime == "application/pdf"
        || mime == "application/zip"
        || mime.starts_with("application/vnd.openxmlformats")
}

/// Heuristic: a NUL byte or a high share of control characters in the first
/// block means binary.
fn looks_binary(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t' | 0x0c))
        .count();
    control * 10 > sample.len()
}

/// Decode as UTF-8, dropping invalid sequences. Returns `None` when more than
/// half of the input was invalid.
pub(crate) fn clean_utf8(bytes: &[u8]) -> Option<String> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Some(s.to_owned());
    }
    let cleaned: String = String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect();
    let invalid = bytes.len().saturating_sub(cleaned.len());
    if invalid * 2 > bytes.len() {
        None
    } else {
        Some(cleaned)
    }
}

impl Extractor for TextExtractor {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        1
    }

    /// Unknown MIME types are accepted here and sniffed once the file has
    /// been read.
    fn can_extract(&self, _path: &Path, mime_type: &str) -> bool {
        !is_binary_mime(mime_type)
    }

    fn extract<'a>(
        &'a self,
        doc: &'a Document,
    ) -> BoxFuture<'a, Result<Option<Extraction>, ExtractionError>> {
        Box::pin(async move {
            let path = doc.file_path();
            let path_display = path.display().to_string();
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| ExtractionError::new(NAME, path_display.clone(), "read failed").with_source(e))?;

            if !is_text_mime(&doc.mime_type) && looks_binary(&bytes[..bytes.len().min(SNIFF_BYTES)]) {
                tracing::debug!(path = %path_display, mime = %doc.mime_type, "binary content, declining");
                return Ok(None);
            }
            let Some(content) = clean_utf8(&bytes) else {
                tracing::debug!(path = %path_display, "mostly invalid UTF-8, declining");
                return Ok(None);
            };
            if content.is_empty() {
                return Ok(None);
            }

            let title = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            Ok(Some(Extraction {
                content,
                title,
                ..Extraction::default()
            }))
        })
    }
}
