//! Splits streamed text into speakable chunks.
//!
//! Tokens are appended to a single buffer. The buffer is handed back as a
//! chunk as soon as it ends in sentence punctuation or grows past
//! [`MAX_CHUNK_CHARS`], so the first sentence can be spoken while the model is
//! still generating the rest. Chunks are returned exactly as received (no
//! trimming); every token ends up in exactly one chunk.

/// Buffer length, in characters, beyond which a chunk is flushed even
/// without sentence punctuation.
pub const MAX_CHUNK_CHARS: usize = 122;

const SENTENCE_ENDINGS: [char; 3] = ['.', '!', '?'];

#[derive(Debug)]
pub struct Chunker {
    buffer: String,
    chars: usize,
    max_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker {
    pub fn new() -> Self {
        Self::with_max_chars(MAX_CHUNK_CHARS)
    }

    pub fn with_max_chars(max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            chars: 0,
            max_chars,
        }
    }

    /// Append a token and return the buffered chunk if the flush
    /// condition now holds.
    pub fn push(&mut self, token: &str) -> Option<String> {
        self.buffer.push_str(token);
        self.chars += token.chars().count();
        if self.should_flush() {
            Some(self.take())
        } else {
            None
        }
    }

    /// Return whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn should_flush(&self) -> bool {
        let ends_sentence = self
            .buffer
            .chars()
            .next_back()
            .is_some_and(|c| SENTENCE_ENDINGS.contains(&c));
        ends_sentence || self.chars > self.max_chars
    }

    fn take(&mut self) -> String {
        self.chars = 0;
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tokens: &[&str]) -> Vec<String> {
        let mut chunker = Chunker::new();
        let mut chunks: Vec<String> = tokens.iter().filter_map(|t| chunker.push(t)).collect();
        chunks.extend(chunker.finish());
        chunks
    }

    #[test]
    fn flushes_on_sentence_punctuation() {
        let chunks = run(&["Hi", " there", ".", " How", " are", " you", "?"]);
        assert_eq!(chunks, vec!["Hi there.", " How are you?"]);
        let spoken: Vec<&str> = chunks.iter().map(|c| c.trim()).collect();
        assert_eq!(spoken, vec!["Hi there.", "How are you?"]);
    }

    #[test]
    fn punctuation_inside_a_token_does_not_flush() {
        let mut chunker = Chunker::new();
        assert_eq!(chunker.push("3.5 is"), None);
        assert_eq!(chunker.push(" bigger!"), Some("3.5 is bigger!".to_string()));
        assert!(chunker.is_empty());
    }

    #[test]
    fn flushes_once_length_exceeds_limit() {
        let mut chunker = Chunker::new();
        let word = "a".repeat(MAX_CHUNK_CHARS);
        assert_eq!(chunker.push(&word), None, "exactly at the limit must not flush");
        assert_eq!(chunker.push("b"), Some(format!("{word}b")));
    }

    #[test]
    fn length_is_counted_in_characters() {
        let mut chunker = Chunker::with_max_chars(4);
        assert_eq!(chunker.push("℃℃℃℃"), None);
        assert_eq!(chunker.push("é"), Some("℃℃℃℃é".to_string()));
    }

    #[test]
    fn remainder_is_flushed_at_end() {
        let chunks = run(&["Done", ".", " And then", " some"]);
        assert_eq!(chunks, vec!["Done.", " And then some"]);
    }

    #[test]
    fn empty_stream_produces_no_chunks() {
        assert!(run(&[]).is_empty());
    }

    #[test]
    fn concatenated_chunks_equal_concatenated_tokens() {
        let long = "word ".repeat(40);
        let cases: Vec<Vec<&str>> = vec![
            vec!["Hello", " world", "!", " ", "Is", " it", " me", "?", "  "],
            vec![long.as_str(), "end", "."],
            vec!["...", "!?", "no end"],
            vec!["   "],
            vec!["Ünïcødé ", "ströng", ".", "\n"],
        ];
        for tokens in cases {
            let chunks = run(&tokens);
            assert_eq!(chunks.concat(), tokens.concat());
            assert!(chunks.iter().all(|c| !c.is_empty()));
        }
    }

    #[test]
    fn every_flush_satisfies_the_condition() {
        let text = "One two three. Four five six seven eight nine ten eleven twelve! \
                    thirteen fourteen fifteen sixteen seventeen eighteen nineteen twenty \
                    twenty-one twenty-two twenty-three twenty-four twenty-five twenty-six";
        let mut chunker = Chunker::new();
        for token in text.split_inclusive(' ') {
            if let Some(chunk) = chunker.push(token) {
                let ends = chunk.ends_with(&['.', '!', '?'][..]);
                assert!(ends || chunk.chars().count() > MAX_CHUNK_CHARS, "{chunk:?}");
            }
        }
    }
}
