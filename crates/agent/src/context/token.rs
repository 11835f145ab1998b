//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 bytes per token. Working-memory
//! budgets are compared against this estimate, never against a real
//! tokenizer, so the numbers stay stable across providers.

use stepwise_core::message::Message;

/// Appended to text cut down by [`truncate_to_tokens`].
pub const TRUNCATION_MARKER: &str = "\n[...truncated]";

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Cut `text` so that `estimate_tokens(result) <= max_tokens`.
///
/// Keeps the head of the text and marks the cut when there is room for the
/// marker. Never splits a UTF-8 character.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let max_bytes = max_tokens.saturating_mul(4);
    let (budget, marker) = if max_bytes > TRUNCATION_MARKER.len() * 2 {
        (max_bytes - TRUNCATION_MARKER.len(), TRUNCATION_MARKER)
    } else {
        (max_bytes, "")
    };

    let mut cut = budget.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{marker}", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(400)), 100);
    }

    #[test]
    fn message_has_overhead() {
        let msg = Message::user("test");
        assert_eq!(estimate_message_tokens(&msg), 5);
        assert_eq!(estimate_messages_tokens(&[msg.clone(), msg]), 10);
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_to_tokens("short", 10), "short");
    }

    #[test]
    fn truncation_respects_budget() {
        let text = "x".repeat(1_000);
        for budget in [0, 1, 3, 10, 50, 249] {
            let cut = truncate_to_tokens(&text, budget);
            assert!(
                estimate_tokens(&cut) <= budget,
                "budget {budget} produced {} tokens",
                estimate_tokens(&cut)
            );
        }
        assert!(truncate_to_tokens(&text, 50).ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncation_keeps_char_boundaries() {
        let text = "é".repeat(100);
        let cut = truncate_to_tokens(&text, 3);
        assert!(estimate_tokens(&cut) <= 3);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
