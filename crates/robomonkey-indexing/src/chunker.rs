//! Deterministic sliding-window chunker
//!
//! Content at or under the window fits in one chunk equal to the input.
//! Longer content is split into overlapping windows: chunk k spans
//! `[max(0, k*W - O), min(L, k*W + W + O))`, emitted while `k*W < L`.
//! Re-running on byte-identical input produces byte-identical chunks with
//! identical content hashes, which is what makes indexing idempotent.

use robomonkey_common::content_hash;

/// One window of content with its position and stable hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWindow {
    pub content: String,
    /// Byte offset of the window start within the input
    pub byte_start: usize,
    /// Byte offset one past the window end
    pub byte_end: usize,
    /// 1-based line of the window start, relative to the input
    pub start_line: usize,
    /// 1-based line of the window end, relative to the input
    pub end_line: usize,
    pub content_hash: String,
}

/// Sliding-window splitter with a character budget and overlap
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    window: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(window: usize, overlap: usize) -> Self {
        debug_assert!(overlap < window, "overlap must be smaller than the window");
        Self { window, overlap }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Split `content` into overlapping windows.
    ///
    /// Positions are byte offsets; window boundaries are nudged forward to
    /// the nearest char boundary so multi-byte text never splits inside a
    /// code point. ASCII input gets the exact arithmetic spans.
    pub fn split(&self, content: &str) -> Vec<ChunkWindow> {
        let total = content.len();
        if total == 0 {
            return Vec::new();
        }
        if total <= self.window {
            return vec![self.window_at(content, 0, total)];
        }

        let mut chunks = Vec::new();
        let mut k = 0usize;
        while k * self.window < total {
            let start = (k * self.window).saturating_sub(self.overlap);
            let end = (k * self.window + self.window + self.overlap).min(total);
            chunks.push(self.window_at(content, start, end));
            k += 1;
        }
        chunks
    }

    fn window_at(&self, content: &str, start: usize, end: usize) -> ChunkWindow {
        let start = ceil_char_boundary(content, start);
        let end = ceil_char_boundary(content, end);
        let text = &content[start..end];

        // Line numbers come from counting newlines in the prefix
        let start_line = 1 + content[..start].matches('\n').count();
        let end_line = 1 + content[..end].matches('\n').count();

        ChunkWindow {
            content: text.to_string(),
            byte_start: start,
            byte_end: end,
            start_line,
            end_line,
            content_hash: content_hash(text),
        }
    }
}

fn ceil_char_boundary(content: &str, index: usize) -> usize {
    let mut i = index.min(content.len());
    while i < content.len() && !content.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 7000;
    const O: usize = 500;

    #[test]
    fn test_small_content_single_chunk_equals_input() {
        let chunker = Chunker::new(W, O);
        let content = "fn main() {}\n";
        let chunks = chunker.split(content);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, content);
        assert_eq!(chunks[0].byte_start, 0);
        assert_eq!(chunks[0].byte_end, content.len());
    }

    #[test]
    fn test_exact_window_size_single_chunk() {
        let chunker = Chunker::new(W, O);
        let content = "x".repeat(W);
        let chunks = chunker.split(&content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.len(), W);
    }

    #[test]
    fn test_boundary_7001_chars_yields_two_overlapping_chunks() {
        let chunker = Chunker::new(W, O);
        let content = "a".repeat(7001);
        let chunks = chunker.split(&content);

        assert_eq!(chunks.len(), 2);
        // k=0: [0, min(7001, 7500)) ; k=1: [6500, 7001)
        assert_eq!((chunks[0].byte_start, chunks[0].byte_end), (0, 7001));
        assert_eq!((chunks[1].byte_start, chunks[1].byte_end), (6500, 7001));
        assert_ne!(chunks[0].content_hash, chunks[1].content_hash);
    }

    #[test]
    fn test_no_chunk_exceeds_window_plus_two_overlaps() {
        let chunker = Chunker::new(W, O);
        for total in [1, W, W + 1, 2 * W, 3 * W + 17, 10 * W] {
            let content = "y".repeat(total);
            for chunk in chunker.split(&content) {
                assert!(
                    chunk.content.len() <= W + 2 * O,
                    "chunk of {} chars for input of {total}",
                    chunk.content.len()
                );
            }
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunker = Chunker::new(W, O);
        let content = "z".repeat(3 * W);
        let chunks = chunker.split(&content);

        for pair in chunks.windows(2) {
            let overlap = pair[0].byte_end.saturating_sub(pair[1].byte_start);
            let remaining = content.len() - pair[1].byte_start;
            assert!(
                overlap >= O.min(remaining),
                "overlap {overlap} below minimum"
            );
        }
    }

    #[test]
    fn test_chunks_cover_entire_input() {
        let chunker = Chunker::new(W, O);
        let content = "c".repeat(2 * W + 123);
        let chunks = chunker.split(&content);

        assert_eq!(chunks[0].byte_start, 0);
        assert_eq!(chunks.last().unwrap().byte_end, content.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].byte_start <= pair[0].byte_end, "gap between chunks");
        }
    }

    #[test]
    fn test_deterministic_output() {
        let chunker = Chunker::new(W, O);
        let content: String = (0..(2 * W))
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();

        let first = chunker.split(&content);
        let second = chunker.split(&content);
        assert_eq!(first, second);
    }

    #[test]
    fn test_line_numbers_count_newlines() {
        let chunker = Chunker::new(20, 5);
        let content = "one\ntwo\nthree\nfour\nfive\nsix\nseven\n";
        let chunks = chunker.split(content);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 1);
        for chunk in &chunks {
            assert!(chunk.end_line >= chunk.start_line);
            let newlines_inside = chunk.content.matches('\n').count();
            assert_eq!(chunk.end_line - chunk.start_line, newlines_inside);
        }
    }

    #[test]
    fn test_multibyte_content_never_splits_codepoints() {
        let chunker = Chunker::new(10, 3);
        let content = "é".repeat(40); // 2 bytes per char
        let chunks = chunker.split(&content);

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            // Would panic at construction if a boundary split a code point;
            // also verify the text round-trips as valid chars
            assert!(chunk.content.chars().all(|c| c == 'é'));
        }
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let chunker = Chunker::new(W, O);
        assert!(chunker.split("").is_empty());
    }
}
