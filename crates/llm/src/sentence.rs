//! Sentence chunking of streamed tokens
//!
//! Uses Unicode sentence boundaries (UAX #29). The trailing segment of the buffer is
//! always held back since the next token may still extend it.

use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Default)]
pub struct SentenceChunker {
    buffer: String,
}

impl SentenceChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token, returning every sentence it completed
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);

        let segments: Vec<&str> = self.buffer.split_sentence_bounds().collect();
        if segments.len() < 2 {
            return Vec::new();
        }

        let held = segments[segments.len() - 1];
        let complete_len = self.buffer.len() - held.len();
        let sentences = segments[..segments.len() - 1]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        self.buffer.drain(..complete_len);
        sentences
    }

    /// Whatever is left once the token stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}
