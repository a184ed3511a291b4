//! Canonical word normalization shared by the corpus loader and the live
//! recognizer path.
//!
//! CRITICAL: exact matching only works if both sides go through these
//! functions. Any change here changes which phrases can ever match.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::Token;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Whole-line annotations that are not sung: "[Chorus]", "[Verse 1: Thom]", "(x2)".
/// Parenthesized backing vocals are lyrics and stay.
pub static ANNOTATION_LINE: Lazy<Regex> = Lazy::new(||
    Regex::new(r"(?i)^\s*(?:\[[^\]]*\]|\(\s*x\s*\d+\s*\))\s*$").unwrap()
);

/// Trailing repeat markers: "Karma police (x2)", "la la la [x4]".
pub static REPEAT_MARKER: Lazy<Regex> = Lazy::new(||
    Regex::new(r"(?i)\s*[\(\[]\s*x\s*\d+\s*[\)\]]\s*$").unwrap()
);

/// Characters that join two words rather than belong to one: "young-blood", "and/or".
pub static WORD_JOINERS: Lazy<Regex> = Lazy::new(||
    Regex::new(r"[-‐‑‒–—―/]+").unwrap()
);

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII: strip diacritics via NFKD, then
/// transliterate whatever non-ASCII remains.
/// e.g., "Beyoncé" → "beyonce", "naïve" → "naive"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Normalize one word: fold to lowercase ASCII and drop everything that is not
/// a letter or digit. "Don't" → "dont", "BLOOD!" → "blood".
/// Returns `None` when nothing is left.
pub fn normalize_word(word: &str) -> Option<String> {
    let folded = fold_to_ascii(word.trim());
    let normalized: String = folded.chars().filter(char::is_ascii_alphanumeric).collect();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Split free text into words the same way for lyrics and recognized speech.
/// Dashes and slashes separate words, "&" reads as "and".
pub fn split_words(text: &str) -> Vec<String> {
    let spaced = WORD_JOINERS.replace_all(text, " ").replace('&', " and ");
    spaced.split_whitespace().map(str::to_string).collect()
}

/// Tokenize free text into normalized tokens, dropping words that normalize
/// to nothing.
pub fn tokenize(text: &str) -> Vec<Token> {
    split_words(text).iter().filter_map(|w| Token::new(w)).collect()
}

/// Strip lyric-sheet decorations from a line. Returns `None` for lines that
/// are annotations only.
pub fn strip_annotations(line: &str) -> Option<&str> {
    if ANNOTATION_LINE.is_match(line) {
        return None;
    }
    let end = REPEAT_MARKER.find(line).map_or(line.len(), |m| m.start());
    Some(&line[..end])
}

// ============================================================================
// TESTS
// ============================================================================
