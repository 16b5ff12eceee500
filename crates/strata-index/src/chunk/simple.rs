use super::{Chunker, ChunkerConfig, finalize, single_chunk, span_chunk, split_lines};
use crate::document::Chunk;
use crate::error::ChunkingError;
use crate::languages::CodeStructure;

/// Greedy line packing with no shared content between chunks.
#[derive(Debug, Clone)]
pub struct SimpleChunker {
    config: ChunkerConfig,
}

impl SimpleChunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }
}

impl Chunker for SimpleChunker {
    fn chunk(
        &self,
        content: &str,
        _structure: Option<&CodeStructure>,
    ) -> Result<Vec<Chunk>, ChunkingError> {
        if content.len() <= self.config.size {
            return Ok(single_chunk(content));
        }

        let lines = split_lines(content);
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut len = 0;
        for (i, line) in lines.iter().enumerate() {
            if len > 0 && len + line.text.len() > self.config.size {
                chunks.push(span_chunk(content, &lines, start, i));
                start = i;
                len = 0;
            }
            len += line.text.len();
        }
        if start < lines.len() {
            chunks.push(span_chunk(content, &lines, start, lines.len()));
        }
        Ok(finalize(chunks))
    }

    fn name(&self) -> &'static str {
        "simple"
    }
}
