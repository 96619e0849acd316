//! OCR glyph confusion correction

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::text::normalize_text;

/// Digits read in place of letters inside words
const DIGIT_AS_LETTER: [(char, char); 6] = [
    ('0', 'o'),
    ('1', 'l'),
    ('5', 's'),
    ('8', 'b'),
    ('6', 'g'),
    ('2', 'z'),
];

/// Letters read in place of digits inside numbers
const LETTER_AS_DIGIT: [(char, char); 5] = [
    ('o', '0'),
    ('l', '1'),
    ('i', '1'),
    ('s', '5'),
    ('b', '8'),
];

/// Glyph sequences that OCR merges or splits
const GLYPH_PAIRS: [(&str, &str); 3] = [("rn", "m"), ("vv", "w"), ("cl", "d")];

/// A normalized reading of the fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Variant {
    pub text: String,
    /// Produced by a confusion correction rather than read verbatim
    pub corrected: bool,
}

/// Verbatim reading first, then corrected readings, at most `limit` in total
pub(crate) fn confusion_variants(raw: &str, limit: usize) -> Vec<Variant> {
    let folded = fold(raw);
    let mut variants: Vec<Variant> = Vec::new();
    let mut push = |text: String, corrected: bool| {
        let text = normalize_text(&text);
        if !text.is_empty() && !variants.iter().any(|v| v.text == text) {
            variants.push(Variant { text, corrected });
        }
    };

    push(folded.clone(), false);

    let mixed = fix_mixed_tokens(&folded);
    push(mixed.clone(), true);

    for (from, to) in GLYPH_PAIRS {
        if mixed.contains(from) {
            push(mixed.replace(from, to), true);
        }
    }

    let mut all = mixed;
    for (from, to) in GLYPH_PAIRS {
        all = all.replace(from, to);
    }
    push(all, true);

    variants.truncate(limit.max(1));
    variants
}

/// Lowercase and strip diacritics without splitting digits from letters
fn fold(raw: &str) -> String {
    raw.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect()
}

/// Repair tokens mixing digits and letters toward the class they belong to
///
/// Short tokens led by a digit ("5oo") are quantities; anything else is
/// read as a word unless digits dominate.
fn fix_mixed_tokens(text: &str) -> String {
    text.split_whitespace()
        .map(|token| {
            let digits = token.chars().filter(char::is_ascii_digit).count();
            let letters = token.chars().filter(|c| c.is_alphabetic()).count();
            if digits == 0 || letters == 0 {
                return token.to_string();
            }
            let leading_digit = token.starts_with(|c: char| c.is_ascii_digit());
            let numeric = digits > letters || (leading_digit && token.chars().count() <= 4);
            let table: &[(char, char)] = if numeric {
                &LETTER_AS_DIGIT
            } else {
                &DIGIT_AS_LETTER
            };
            token
                .chars()
                .map(|c| {
                    table
                        .iter()
                        .find(|(from, _)| *from == c)
                        .map(|(_, to)| *to)
                        .unwrap_or(c)
                })
                .collect()
        })
        .collect::<Vec<_>>()
        .join(" ")
}
