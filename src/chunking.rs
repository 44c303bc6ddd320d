/// Default chunk size in bytes of extracted text.
pub const TARGET_CHARS: usize = 3200;
/// Default overlap carried from the end of one chunk into the next.
pub const OVERLAP_CHARS: usize = 800;

/// Byte range a chunk was cut from, before whitespace trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A contiguous slice of a document's text, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The trimmed text content of this chunk
    pub text: String,
    /// 0-based insertion order within the document
    pub position: usize,
    /// Untrimmed offsets into the original text
    pub span: Span,
}

/// Split text into overlapping chunks using the default sizes.
pub fn chunk_text(text: &str) -> Vec<Chunk> {
    chunk_text_with(text, TARGET_CHARS, OVERLAP_CHARS)
}

/// Split `text` into chunks of up to `target_chars` bytes, each starting
/// `overlap_chars` before the previous chunk ended.
///
/// A cut prefers to land just after a `". "` sentence terminator, as long as
/// that keeps the chunk above 60% of the target size; otherwise the raw cut
/// is used so the loop always makes progress. Spans record the untrimmed
/// offsets, so consecutive spans overlap even though the trimmed `text`
/// drops surrounding whitespace.
///
/// Requires `target_chars > overlap_chars`. Pure function: identical inputs
/// produce identical output.
pub fn chunk_text_with(text: &str, target_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    debug_assert!(
        target_chars > overlap_chars,
        "target_chars must exceed overlap_chars"
    );

    let len = text.len();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = usize::min(start + target_chars, len);
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        // Snap to the last sentence terminator whose period sits at or before
        // the candidate cut. The terminator may straddle the cut itself.
        let window = usize::min(end + 2, len);
        if let Some(dot) = text[..window].rfind(". ") {
            if dot as f64 > start as f64 + target_chars as f64 * 0.6 {
                end = dot + 1;
            }
        }

        let slice = text[start..end].trim();
        if !slice.is_empty() {
            chunks.push(Chunk {
                text: slice.to_string(),
                position: chunks.len(),
                span: Span { start, end },
            });
        }

        if end >= len {
            break;
        }

        start = end.saturating_sub(overlap_chars);
        while !text.is_char_boundary(start) {
            start -= 1;
        }
    }

    chunks
}
