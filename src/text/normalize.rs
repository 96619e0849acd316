//! Text canonicalization applied before any comparison

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Letter,
    Digit,
    Other,
}

/// Canonicalizes raw OCR or catalog text
///
/// Diacritics are stripped, text is lowercased, punctuation becomes
/// whitespace and runs of digits are split from adjacent letters so that
/// "500mg" and "500 mg" compare equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer;

impl TextNormalizer {
    /// Create a new normalizer
    pub fn new() -> Self {
        Self
    }

    /// Normalize a raw string
    pub fn normalize(&self, raw: &str) -> String {
        normalize_text(raw)
    }

    /// Normalize and split into tokens
    pub fn tokens(&self, raw: &str) -> Vec<String> {
        normalize_text(raw)
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Normalize a raw string (see [`TextNormalizer`])
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev = CharClass::Other;

    for c in raw.nfkd().filter(|c| !is_combining_mark(*c)) {
        let class = if c.is_numeric() {
            CharClass::Digit
        } else if c.is_alphabetic() {
            CharClass::Letter
        } else {
            CharClass::Other
        };

        match class {
            CharClass::Other => {
                if !out.is_empty() && !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            _ => {
                if prev != CharClass::Other && prev != class && !out.ends_with(' ') {
                    out.push(' ');
                }
                out.extend(c.to_lowercase());
            }
        }
        prev = class;
    }

    if out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(normalize_text("  Metformin   HCL "), "metformin hcl");
        assert_eq!(normalize_text("\tA\nB"), "a b");
    }

    #[test]
    fn test_diacritics_removed() {
        assert_eq!(normalize_text("Paracétamol"), "paracetamol");
        assert_eq!(normalize_text("Ibuprofène Forté"), "ibuprofene forte");
    }

    #[test]
    fn test_punctuation_and_dosage_split() {
        assert_eq!(normalize_text("Metformin 500mg"), "metformin 500 mg");
        assert_eq!(normalize_text("XYZ-unknown-9999"), "xyz unknown 9999");
        assert_eq!(normalize_text("Co-Amoxiclav 875/125"), "co amoxiclav 875 125");
    }

    #[test]
    fn test_empty_and_symbols_only() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("--- ///"), "");
    }

    #[test]
    fn test_tokens() {
        let normalizer = TextNormalizer::new();
        assert_eq!(normalizer.tokens("Glucofage 500 mg"), vec!["glucofage", "500", "mg"]);
        assert!(normalizer.tokens("  ").is_empty());
    }
}
