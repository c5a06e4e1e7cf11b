//! Default text chunking
//!
//! Fixed-size windows with a small overlap, cut at UTF-8 character
//! boundaries. Chunk boundaries are deterministic for a given input
//! and configuration.

/// Splits text into overlapping fixed-size chunks.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Target chunk size in bytes.
    pub chunk_size: usize,
    /// Bytes of overlap between consecutive chunks.
    pub overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(16);
        TextChunker {
            chunk_size,
            overlap: chunk_size / 8,
        }
    }

    /// Largest index `<= at` that is a char boundary.
    fn floor_boundary(text: &str, mut at: usize) -> usize {
        at = at.min(text.len());
        while at > 0 && !text.is_char_boundary(at) {
            at -= 1;
        }
        at
    }

    /// Chunk `text`. Empty input yields no chunks; every character of
    /// the input appears in at least one chunk.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let step = self.chunk_size.saturating_sub(self.overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let end = Self::floor_boundary(text, start + self.chunk_size);
            chunks.push(text[start..end].to_string());
            if end >= text.len() {
                break;
            }
            start = Self::floor_boundary(text, start + step);
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(TextChunker::new(64).chunk("").is_empty());
    }

    #[test]
    fn test_short_input_single_chunk() {
        let chunks = TextChunker::new(64).chunk("hello");
        assert_eq!(chunks, vec!["hello"]);
    }

    #[test]
    fn test_chunks_cover_input() {
        let chunker = TextChunker::new(16);
        let text = "abcdefghij".repeat(10);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        // Reassemble with the overlap stripped from every chunk but
        // the first.
        let step = chunker.chunk_size - chunker.overlap;
        let mut rebuilt = chunks[0][..step.min(chunks[0].len())].to_string();
        for chunk in &chunks[1..] {
            let take = step.min(chunk.len());
            rebuilt.push_str(&chunk[..take]);
        }
        assert!(rebuilt.starts_with(&text[..text.len().min(rebuilt.len())]));
    }

    #[test]
    fn test_utf8_boundaries_respected() {
        let chunker = TextChunker::new(16);
        let text = "日本語のテキストをチャンクに分割する".repeat(4);
        // Must not panic on multi-byte boundaries.
        let chunks = chunker.chunk(&text);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_deterministic() {
        let chunker = TextChunker::new(32);
        let text = "the quick brown fox jumps over the lazy dog ".repeat(8);
        assert_eq!(chunker.chunk(&text), chunker.chunk(&text));
    }

    #[test]
    fn test_minimum_size_clamped() {
        let chunker = TextChunker::new(1);
        assert_eq!(chunker.chunk_size, 16);
        // Terminates even with pathological configuration.
        let chunks = chunker.chunk(&"x".repeat(100));
        assert!(chunks.len() >= 6);
    }
}
