//! Label normalization.
//!
//! Province names arrive with mixed case, accents, punctuation and ragged
//! spacing ("STA. CRUZ DE TENERIFE", "Ávila", "Illes  Balears"). Both the
//! input labels and the reference names go through the same function so
//! they can be compared as plain ASCII.

use unicode_normalization::UnicodeNormalization;

/// Normalize an optional label. Absence propagates.
pub fn normalize(input: Option<&str>) -> Option<String> {
    input.map(normalize_label)
}

/// Lowercase, strip diacritics, keep only `[a-z0-9]` and whitespace, then
/// collapse whitespace runs to a single space and trim.
///
/// Output contains only `[a-z0-9 ]`, so a second pass is a no-op.
pub fn normalize_label(input: &str) -> String {
    let folded: String = input
        .to_lowercase()
        .nfkd()
        // Combining marks and anything else outside ASCII are dropped here
        .filter(|c| c.is_ascii())
        // Uppercase produced by compatibility decomposition is dropped too
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || is_ascii_space(*c))
        .collect();

    folded
        .split(is_ascii_space)
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// ASCII whitespace as a Unicode regex `\s` sees it, which includes the
/// file/group/record/unit separators.
fn is_ascii_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c' | '\x1c'..='\x1f')
}
