use super::{Chunker, ChunkerConfig, finalize, single_chunk, span_chunk, split_lines};
use crate::document::Chunk;
use crate::error::ChunkingError;
use crate::languages::CodeStructure;

/// Greedy line packing where each chunk starts with whole trailing lines of
/// the previous one, up to the configured overlap.
#[derive(Debug, Clone)]
pub struct OverlappingChunker {
    config: ChunkerConfig,
}

impl OverlappingChunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }
}

impl Chunker for OverlappingChunker {
    fn chunk(
        &self,
        content: &str,
        _structure: Option<&CodeStructure>,
    ) -> Result<Vec<Chunk>, ChunkingError> {
        if content.len() <= self.config.size {
            return Ok(single_chunk(content));
        }

        let overlap = self.config.effective_overlap();
        let lines = split_lines(content);
        let mut chunks = Vec::new();
        // `start` is the first line of the open chunk, `fresh` the first line
        // not carried over from the previous chunk.
        let mut start = 0;
        let mut fresh = 0;
        let mut len = 0;
        for (i, line) in lines.iter().enumerate() {
            if i > fresh && len + line.text.len() > self.config.size {
                chunks.push(span_chunk(content, &lines, start, i));

                let mut carry_from = i;
                let mut carried = 0;
                while carry_from > start + 1
                    && carried + lines[carry_from - 1].text.len() <= overlap
                {
                    carry_from -= 1;
                    carried += lines[carry_from].text.len();
                }
                start = carry_from;
                fresh = i;
                len = carried;
            }
            len += line.text.len();
        }
        if start < lines.len() {
            chunks.push(span_chunk(content, &lines, start, lines.len()));
        }
        Ok(finalize(chunks))
    }

    fn name(&self) -> &'static str {
        "overlapping"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkerKind;
    use proptest::prelude::*;

    fn chunker(size: usize, overlap: usize) -> OverlappingChunker {
        OverlappingChunker::new(ChunkerConfig {
            overlap,
            ..ChunkerConfig::with_size(ChunkerKind::Overlapping, size)
        })
    }

    #[test]
    fn adjacent_chunks_share_lines() {
        let content = "l1\nl2\nl3\nl4\nl5\nl6\n";
        let chunks = chunker(9, 3).chunk(content, None).unwrap();
        assert_eq!(chunks[0].content, "l1\nl2\nl3\n");
        assert_eq!(chunks[1].content, "l3\nl4\nl5\n");
        assert_eq!(chunks[1].start_line, 3);
        assert_eq!(chunks[1].start_byte, 6);
        assert_eq!(chunks.last().unwrap().end_byte, content.len());
    }

    #[test]
    fn carry_never_covers_whole_previous_chunk() {
        // every line is larger than the overlap, nothing is carried
        let content = "aaaaaa\nbbbbbb\ncccccc\n";
        let chunks = chunker(8, 3).chunk(content, None).unwrap();
        assert_eq!(chunks.len(), 3);
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, content);
    }

    #[test]
    fn small_content_single_chunk() {
        let chunks = chunker(100, 20).chunk("one line", None).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn next_chunk_starts_with_bounded_suffix(
            lines in proptest::collection::vec("[a-z]{0,12}", 1..40),
            size in 8usize..80,
            overlap_pct in 1usize..60,
        ) {
            let content = lines.join("\n");
            let overlap = (size * overlap_pct / 100).max(1);
            let chunks = chunker(size, overlap).chunk(&content, None).unwrap();
            for pair in chunks.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(b.start_byte <= a.end_byte);
                prop_assert!(b.start_byte > a.start_byte);
                let shared = a.end_byte - b.start_byte;
                prop_assert!(shared <= overlap);
                prop_assert!(b.content.starts_with(&a.content[a.content.len() - shared..]));
            }
            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(c.index, i);
                prop_assert_eq!(c.total, chunks.len());
                prop_assert_eq!(&content[c.start_byte..c.end_byte], c.content.as_str());
            }
            if let (Some(first), Some(last)) = (chunks.first(), chunks.last()) {
                prop_assert_eq!(first.start_byte, 0);
                prop_assert_eq!(last.end_byte, content.len());
            }
        }
    }
}
