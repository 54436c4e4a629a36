use crate::errors::{Error, Result};
use crate::token_counter::TokenCounter;

/// Coarse cap on raw body length, applied before any token counting to
/// bound worst-case encoder cost.
pub const MAX_TEXT_LENGTH: usize = 32 * 1024;

/// Default token budget for a rendered prompt.
pub const MAX_PROMPT_TOKENS: usize = 4000;

#[derive(Debug, Clone)]
pub struct FittedPrompt {
    /// The fully rendered prompt, guaranteed to fit the budget.
    pub prompt: String,
    /// The surviving body text embedded in the prompt.
    pub text: String,
    pub characters_removed: usize,
}

/// Trim `text` from the end until `render(text)` fits `max_tokens`.
///
/// The budget is checked against the whole rendered prompt, never the
/// payload alone; a template whose fixed overhead already exceeds the
/// budget fails with [`Error::PromptTooLong`] even for an empty payload.
/// Removal chunk sizes shrink geometrically so the loop converges fast on
/// huge inputs and lands precisely near the boundary on small ones.
pub fn fit_to_budget<F>(render: F, text: &str, max_tokens: usize) -> Result<FittedPrompt>
where
    F: Fn(&str) -> String,
{
    let counter = TokenCounter::new();
    let original_length = text.len();
    let mut text = text.to_string();
    let mut characters_removed = 0usize;

    if text.len() > MAX_TEXT_LENGTH {
        let excess = text.len() - MAX_TEXT_LENGTH;
        characters_removed += trim_end(&mut text, excess);
    }

    loop {
        let prompt = render(&text);
        if counter.count_tokens(&prompt) <= max_tokens {
            return Ok(FittedPrompt {
                prompt,
                text,
                characters_removed,
            });
        }

        let step = match text.len() {
            len if len > 2 * 1024 * 1024 => 1024 * 1024,
            len if len > 2 * 1024 => 1024,
            len if len > 2 * 256 => 256,
            len if len > 2 * 100 => 100,
            len if len > 2 * 10 => 10,
            len if len > 0 => 1,
            _ => {
                return Err(Error::PromptTooLong {
                    characters_removed,
                    original_length,
                    max_tokens,
                });
            }
        };
        characters_removed += trim_end(&mut text, step);
    }
}

/// Remove roughly `count` bytes from the end, backing up to the nearest
/// character boundary. Returns the number of bytes actually removed.
fn trim_end(text: &mut String, count: usize) -> usize {
    let mut target = text.len().saturating_sub(count);
    while !text.is_char_boundary(target) {
        target -= 1;
    }
    let removed = text.len() - target;
    text.truncate(target);
    removed
}
