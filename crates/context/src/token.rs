//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 bytes per token, rounded up. This
//! is accurate within ~10% for BPE tokenizers on English text and, more
//! importantly here, it is total: any input yields a count, never an error.

use tether_core::message::Message;

/// Fixed per-message cost for role name, delimiters, and formatting markers
/// in the chat wire format.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Text to token count under one fixed tokenization scheme.
///
/// Implementations must be total: empty input counts as zero and no input
/// may cause a failure.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// The default counter: 1 token ≈ 4 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Token cost of one stored message, overhead included.
pub fn message_tokens(counter: &dyn TokenCounter, message: &Message) -> usize {
    MESSAGE_OVERHEAD + counter.count(&message.text)
}

/// Token cost of a slice of messages.
pub fn messages_tokens(counter: &dyn TokenCounter, messages: &[Message]) -> usize {
    messages.iter().map(|m| message_tokens(counter, m)).sum()
}
