use lazy_static::lazy_static;
use tiktoken_rs::{cl100k_base, CoreBPE};

lazy_static! {
    // Process-wide encoding table, loaded once and shared by every call.
    static ref BPE: CoreBPE = cl100k_base().expect("embedded BPE table");
}

pub struct TokenCounter;

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        TokenCounter
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        BPE.encode_ordinary(text).len()
    }

    pub fn encode(&self, text: &str) -> Vec<usize> {
        BPE.encode_ordinary(text)
    }

    /// Decode a token slice back into text. Returns `None` when the slice
    /// ends in the middle of a multi-byte character; callers shrink the
    /// slice until it decodes.
    pub fn decode(&self, tokens: &[usize]) -> Option<String> {
        BPE.decode(tokens.to_vec()).ok()
    }
}
