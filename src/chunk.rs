//! Fixed-size overlapping text chunker.
//!
//! The vector index stores one vector per document chunk, keyed by a
//! `chunk_index` recorded at indexing time. At retrieval time the gateway
//! re-derives the same chunk from the full document text, so the split must
//! be deterministic: identical text and parameters always yield identical
//! chunk boundaries.
//!
//! Chunks are `chunk_chars` characters long and consecutive chunks share
//! `overlap_chars` characters, so context straddling a boundary is not lost.

/// Split `text` into overlapping chunks.
///
/// Each chunk holds at most `chunk_chars` characters and starts
/// `chunk_chars - overlap_chars` characters after the previous one.
/// Boundaries are counted in characters, never splitting a UTF-8 scalar.
/// Always returns at least one chunk, even for empty text.
pub fn split_chunks(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    // Guarded by config validation; fall back to a sane step anyway.
    let step = chunk_chars.saturating_sub(overlap_chars).max(1);

    // Byte offsets of every character boundary, including the end of text.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());
    let total_chars = boundaries.len() - 1;

    if total_chars == 0 {
        return vec![String::new()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk_chars).min(total_chars);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == total_chars {
            break;
        }
        start += step;
    }
    chunks
}

/// Return the chunk at `index`, clamped to the last chunk when out of range.
pub fn chunk_at(text: &str, index: usize, chunk_chars: usize, overlap_chars: usize) -> String {
    let mut chunks = split_chunks(text, chunk_chars, overlap_chars);
    let clamped = index.min(chunks.len() - 1);
    chunks.swap_remove(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_chunks("Hello, world!", 1000, 200);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_one_chunk() {
        let chunks = split_chunks("", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_chunks_overlap() {
        let text: String = ('a'..='z').cycle().take(25).collect();
        let chunks = split_chunks(&text, 10, 4);
        // Step is 6: chunks start at 0, 6, 12, 18, 24.
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].len(), 10);
        // The tail of one chunk is the head of the next.
        assert_eq!(&chunks[0][6..], &chunks[1][..4]);
        assert_eq!(&chunks[1][6..], &chunks[2][..4]);
    }

    #[test]
    fn test_deterministic_boundaries() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let first = split_chunks(&text, 100, 20);
        let second = split_chunks(&text, 100, 20);
        assert_eq!(first, second);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "héllo wörld ünïcode ".repeat(10);
        let chunks = split_chunks(&text, 7, 2);
        // No chunk may split a scalar, and every chunk is a slice of the text.
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 7);
            assert!(text.contains(chunk.as_str()));
        }
    }

    #[test]
    fn test_chunk_at_clamps_out_of_range() {
        let text = "abcdefghij".repeat(5); // 50 chars
        let chunks = split_chunks(&text, 10, 0);
        let last = chunks.last().unwrap().clone();
        assert_eq!(chunk_at(&text, 999, 10, 0), last);
        assert_eq!(chunk_at(&text, chunks.len() - 1, 10, 0), last);
    }

    #[test]
    fn test_chunk_at_in_range() {
        let text = "abcdefghij".repeat(3);
        assert_eq!(chunk_at(&text, 0, 10, 0), "abcdefghij");
        assert_eq!(chunk_at(&text, 1, 10, 0), "abcdefghij");
    }
}
