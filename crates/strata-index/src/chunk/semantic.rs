use super::{
    Chunker, ChunkerConfig, Line, OverlappingChunker, finalize, single_chunk, span_chunk,
    split_lines,
};
use crate::document::{Chunk, ChunkContext};
use crate::error::ChunkingError;
use crate::languages::{CodeStructure, UnitKind};

/// A chunk with no acceptable breakpoint is cut once it grows past this
/// multiple of the target size. Tunable; not derived from measurements.
pub const FORCE_SPLIT_FACTOR: usize = 2;

const DECLARATION_PREFIXES: &[&str] = &[
    "fn ", "pub fn ", "async fn ", "func ", "def ", "class ", "type ", "struct ", "impl ",
    "function ", "interface ",
];

const CLOSERS: &[&str] = &["}", "},", "};", ")", "end"];

/// Cuts on declaration boundaries when code structure is known, otherwise
/// behaves like [`OverlappingChunker`].
#[derive(Debug, Clone)]
pub struct SemanticChunker {
    config: ChunkerConfig,
    fallback: OverlappingChunker,
}

impl SemanticChunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            fallback: OverlappingChunker::new(config.clone()),
            config,
        }
    }
}

/// Whether a chunk may end right before `lines[i]`.
fn is_breakpoint(structure: &CodeStructure, lines: &[Line<'_>], i: usize) -> bool {
    let line_no = i + 1;
    if structure.starts_unit(line_no) || structure.unit_at(line_no).is_none() {
        return true;
    }
    let current = lines[i].text.trim();
    if DECLARATION_PREFIXES.iter().any(|p| current.starts_with(p)) {
        return true;
    }
    let previous = lines[i - 1].text.trim();
    previous.is_empty() || CLOSERS.contains(&previous)
}

fn context_for(structure: &CodeStructure, from_line: usize, to_line: usize) -> Option<ChunkContext> {
    let unit = (from_line..=to_line).find_map(|l| structure.unit_at(l))?;
    let mut ctx = ChunkContext::default();
    match unit.kind {
        UnitKind::Function => ctx.function_name = Some(unit.name.clone()),
        UnitKind::Type => ctx.type_name = Some(unit.name.clone()),
    }
    Some(ctx)
}

impl Chunker for SemanticChunker {
    fn chunk(
        &self,
        content: &str,
        structure: Option<&CodeStructure>,
    ) -> Result<Vec<Chunk>, ChunkingError> {
        if content.len() <= self.config.size {
            return Ok(single_chunk(content));
        }
        let Some(structure) = structure.filter(|s| !s.is_empty()) else {
            return self.fallback.chunk(content, None);
        };

        let lines = split_lines(content);
        let force_limit = self.config.size * FORCE_SPLIT_FACTOR;
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut len = 0;
        for (i, line) in lines.iter().enumerate() {
            let over_target = len > 0 && len + line.text.len() > self.config.size;
            let must_split = len > force_limit;
            if (over_target && is_breakpoint(structure, &lines, i)) || must_split {
                chunks.push(span_chunk(content, &lines, start, i));
                start = i;
                len = 0;
            }
            len += line.text.len();
        }
        if start < lines.len() {
            chunks.push(span_chunk(content, &lines, start, lines.len()));
        }

        for c in &mut chunks {
            c.context = context_for(structure, c.start_line, c.end_line);
        }
        Ok(finalize(chunks))
    }

    fn name(&self) -> &'static str {
        "semantic"
    }

    fn wants_structure(&self) -> bool {
        true
    }
}
