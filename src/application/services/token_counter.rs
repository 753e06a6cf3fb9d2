use std::borrow::Cow;
use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

static TOKENIZER: LazyLock<CoreBPE> = LazyLock::new(|| {
    tiktoken_rs::cl100k_base().expect("Failed to initialize cl100k_base tokenizer")
});

pub fn count_tokens(text: &str) -> usize {
    TOKENIZER.encode_with_special_tokens(text).len()
}

/// Keeps the leading `max_tokens` tokens of `text`. A cut inside a
/// multi-byte sequence backs off until the prefix decodes.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> Cow<'_, str> {
    let tokens = TOKENIZER.encode_with_special_tokens(text);
    if tokens.len() <= max_tokens {
        return Cow::Borrowed(text);
    }
    let mut end = max_tokens;
    while end > 0 {
        if let Ok(prefix) = TOKENIZER.decode(tokens[..end].to_vec()) {
            return Cow::Owned(prefix);
        }
        end -= 1;
    }
    Cow::Owned(String::new())
}
