//! Line-oriented chunking strategies.
//!
//! Every strategy cuts on line boundaries and reports exact byte ranges into
//! the input, so chunks can be mapped back to their source. Lines keep their
//! trailing `\n`; a final line without one stays without one.

mod overlapping;
mod semantic;
mod simple;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::Chunk;
use crate::error::ChunkingError;
use crate::languages::CodeStructure;

pub use overlapping::OverlappingChunker;
pub use semantic::{FORCE_SPLIT_FACTOR, SemanticChunker};
pub use simple::SimpleChunker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkerKind {
    Simple,
    #[default]
    Overlapping,
    Semantic,
}

impl std::str::FromStr for ChunkerKind {
    type Err = ChunkingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "overlapping" => Ok(Self::Overlapping),
            "semantic" => Ok(Self::Semantic),
            other => Err(ChunkingError::new(other, "unknown chunking strategy")),
        }
    }
}

/// Sizes are in bytes of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    #[serde(default)]
    pub strategy: ChunkerKind,
    #[serde(default = "default_size")]
    pub size: usize,
    /// Bytes of trailing context carried into the next chunk. Zero selects
    /// one fifth of `size`.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_size() -> usize {
    1000
}

fn default_overlap() -> usize {
    200
}

fn default_min_size() -> usize {
    100
}

fn default_max_size() -> usize {
    2000
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkerKind::default(),
            size: default_size(),
            overlap: default_overlap(),
            min_size: default_min_size(),
            max_size: default_max_size(),
        }
    }
}

impl ChunkerConfig {
    #[must_use]
    pub fn with_size(strategy: ChunkerKind, size: usize) -> Self {
        Self {
            strategy,
            size,
            overlap: size / 5,
            min_size: default_min_size().min(size),
            max_size: default_max_size().max(size),
        }
    }

    /// # Errors
    ///
    /// Returns an error if sizes are zero or inconsistent with each other.
    pub fn validate(&self) -> Result<(), ChunkingError> {
        let strategy = self.strategy.name();
        if self.size == 0 {
            return Err(ChunkingError::new(strategy, "chunk size must be positive"));
        }
        if self.overlap >= self.size {
            return Err(ChunkingError::new(
                strategy,
                format!("overlap {} must be smaller than size {}", self.overlap, self.size),
            ));
        }
        if self.min_size > self.size {
            return Err(ChunkingError::new(
                strategy,
                format!("min size {} exceeds size {}", self.min_size, self.size),
            ));
        }
        if self.max_size < self.size {
            return Err(ChunkingError::new(
                strategy,
                format!("max size {} is below size {}", self.max_size, self.size),
            ));
        }
        Ok(())
    }

    pub(crate) fn effective_overlap(&self) -> usize {
        if self.overlap == 0 {
            self.size / 5
        } else {
            self.overlap
        }
    }
}

impl ChunkerKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Overlapping => "overlapping",
            Self::Semantic => "semantic",
        }
    }
}

pub trait Chunker: Send + Sync {
    /// Split `content` into ordered chunks. `structure` is only consulted by
    /// strategies that cut on declarations.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot split the content.
    fn chunk(
        &self,
        content: &str,
        structure: Option<&CodeStructure>,
    ) -> Result<Vec<Chunk>, ChunkingError>;

    fn name(&self) -> &'static str;

    /// Whether this strategy uses [`CodeStructure`] when available.
    fn wants_structure(&self) -> bool {
        false
    }
}

/// Build the chunker selected by `config.strategy`.
///
/// # Errors
///
/// Returns an error if `config` fails validation.
pub fn build_chunker(config: &ChunkerConfig) -> Result<Arc<dyn Chunker>, ChunkingError> {
    config.validate()?;
    Ok(match config.strategy {
        ChunkerKind::Simple => Arc::new(SimpleChunker::new(config.clone())),
        ChunkerKind::Overlapping => Arc::new(OverlappingChunker::new(config.clone())),
        ChunkerKind::Semantic => Arc::new(SemanticChunker::new(config.clone())),
    })
}

/// One line of the input with its byte offset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Line<'a> {
    pub text: &'a str,
    pub start: usize,
}

impl Line<'_> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

pub(crate) fn split_lines(content: &str) -> Vec<Line<'_>> {
    let mut start = 0;
    content
        .split_inclusive('\n')
        .map(|text| {
            let line = Line { text, start };
            start += text.len();
            line
        })
        .collect()
}

/// Chunk covering `lines[from..to]` (0-based, exclusive end).
pub(crate) fn span_chunk(content: &str, lines: &[Line<'_>], from: usize, to: usize) -> Chunk {
    let start_byte = lines[from].start;
    let end_byte = lines[to - 1].end();
    Chunk {
        content: content[start_byte..end_byte].to_owned(),
        index: 0,
        total: 0,
        start_line: from + 1,
        end_line: to,
        start_byte,
        end_byte,
        context: None,
    }
}

pub(crate) fn single_chunk(content: &str) -> Vec<Chunk> {
    if content.is_empty() {
        return Vec::new();
    }
    let lines = split_lines(content);
    vec![Chunk {
        content: content.to_owned(),
        index: 0,
        total: 1,
        start_line: 1,
        end_line: lines.len().max(1),
        start_byte: 0,
        end_byte: content.len(),
        context: None,
    }]
}

/// Number chunks and back-fill `total` once the full list is known.
pub(crate) fn finalize(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    let total = chunks.len();
    for (i, c) in chunks.iter_mut().enumerate() {
        c.index = i;
        c.total = total;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lines_keeps_offsets() {
        let lines = split_lines("ab\ncd\ne");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].text, "cd\n");
        assert_eq!(lines[1].start, 3);
        assert_eq!(lines[2].end(), 7);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ChunkerConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let cfg = ChunkerConfig {
            overlap: 1000,
            ..ChunkerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn min_and_max_bounds_checked() {
        let cfg = ChunkerConfig {
            min_size: 5000,
            ..ChunkerConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = ChunkerConfig {
            max_size: 10,
            ..ChunkerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_size_rejected() {
        let cfg = ChunkerConfig {
            size: 0,
            overlap: 0,
            min_size: 0,
            ..ChunkerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn with_size_is_valid_for_small_sizes() {
        let cfg = ChunkerConfig::with_size(ChunkerKind::Simple, 20);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.overlap, 4);
    }

    #[test]
    fn kind_from_str() {
        assert_eq!("Semantic".parse::<ChunkerKind>().unwrap(), ChunkerKind::Semantic);
        assert!("fancy".parse::<ChunkerKind>().is_err());
    }

    #[test]
    fn build_chunker_selects_strategy() {
        let cfg = ChunkerConfig::with_size(ChunkerKind::Semantic, 100);
        assert_eq!(build_chunker(&cfg).unwrap().name(), "semantic");
        let cfg = ChunkerConfig::with_size(ChunkerKind::Simple, 100);
        assert_eq!(build_chunker(&cfg).unwrap().name(), "simple");
    }

    #[test]
    fn effective_overlap_defaults_to_fifth() {
        let cfg = ChunkerConfig {
            overlap: 0,
            ..ChunkerConfig::default()
        };
        assert_eq!(cfg.effective_overlap(), 200);
    }
}
