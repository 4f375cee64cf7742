//! Incremental sentence splitting for streamed text.

const TERMINATORS: [char; 4] = ['.', '!', '?', '…'];

/// Collects text deltas and releases complete sentences.
///
/// A sentence ends at a terminator (`.`, `!`, `?`, `…`) followed by
/// whitespace. Runs of terminators such as `?!` or `...` stay together.
#[derive(Debug, Default, Clone)]
pub struct SentenceSplitter {
    pending: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delta and returns the sentences it completed.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.pending.push_str(delta);
        let mut sentences = Vec::new();
        while let Some(end) = self.boundary() {
            let rest = self.pending.split_off(end);
            let sentence = std::mem::replace(&mut self.pending, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Returns the trailing fragment, if it holds any text.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Byte offset just past the first terminator that is followed by whitespace.
    fn boundary(&self) -> Option<usize> {
        let mut chars = self.pending.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if TERMINATORS.contains(&c)
                && let Some(&(_, next)) = chars.peek()
                && next.is_whitespace()
            {
                return Some(i + c.len_utf8());
            }
        }
        None
    }
}
