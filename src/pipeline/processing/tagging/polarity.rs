//! Occurrence-level negation voting.

use regex::Regex;

use crate::domain::TagPolarity;

/// Slice of `text` covering `radius` characters on each side of the byte
/// span `start..end`, clamped to the text bounds.
pub fn char_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let start_char = text[..start].chars().count();
    let end_char = start_char + text[start..end].chars().count();
    let from_char = start_char.saturating_sub(radius);
    let to_char = end_char.saturating_add(radius);

    let byte_at = |char_idx: usize| {
        text.char_indices()
            .nth(char_idx)
            .map(|(byte, _)| byte)
            .unwrap_or(text.len())
    };
    &text[byte_at(from_char)..byte_at(to_char)]
}

/// True when a negation cue appears inside the window around the mention.
pub fn is_negated(text: &str, span: (usize, usize), radius: usize, negation: &Regex) -> bool {
    negation.is_match(char_window(text, span.0, span.1, radius))
}

/// Resolves a tag's polarity from all of its mentions: negated when every
/// mention is negated, affirmed when none is, mixed otherwise.
pub fn resolve_polarity(
    text: &str,
    spans: &[(usize, usize)],
    radius: usize,
    negation: &Regex,
) -> TagPolarity {
    if spans.is_empty() {
        return TagPolarity::Unknown;
    }
    let negated = spans
        .iter()
        .filter(|span| is_negated(text, **span, radius, negation))
        .count();

    if negated == spans.len() {
        TagPolarity::Negated
    } else if negated == 0 {
        TagPolarity::Affirmed
    } else {
        TagPolarity::Mixed
    }
}
