//! Sliding-window text chunker with overlap.
//!
//! Splits long text into chunks of at most `max_chars` characters where
//! consecutive chunks share the trailing `overlap` characters of the
//! previous chunk, so no sentence is cut without context on either side.
//! Dropping each later chunk's leading overlap and concatenating
//! reconstructs the original text exactly.
//!
//! Offsets are character offsets, not bytes, so multi-byte input never
//! splits inside a code point.

/// Split `text` into overlapping chunks.
///
/// Empty input produces no chunks — callers must skip vectorization
/// entirely rather than embed an empty string. Text of `max_chars` or
/// fewer characters comes back as a single chunk equal to the input.
///
/// Requires `overlap < max_chars`; enforced at config load.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total = offsets.len();

    if total <= max_chars {
        return vec![text.to_string()];
    }

    let byte_at = |char_pos: usize| -> usize {
        if char_pos >= total {
            text.len()
        } else {
            offsets[char_pos]
        }
    };

    let step = max_chars - overlap;
    let mut chunks = Vec::with_capacity(total / step + 1);
    let mut start = 0usize;

    loop {
        let end = (start + max_chars).min(total);
        chunks.push(text[byte_at(start)..byte_at(end)].to_string());
        if end == total {
            break;
        }
        start += step;
    }

    chunks
}
