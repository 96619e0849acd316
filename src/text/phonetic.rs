//! Sound-alike matching for transcription errors
//!
//! A Soundex-style fixed-length code over the leading word: the first letter
//! is kept as written, consonants collapse into classes, vowels are elided.
//! OCR and speech slips such as "glucofage" for "glucophage" share a code.
//! Spelling digraphs are only folded after the first letter, so "phenytoin"
//! keeps its P and does not match "fenytoin".

use serde::Serialize;
use std::fmt;

/// Fixed-length phonetic code; empty when the input has no codable word
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct PhoneticCode(String);

impl PhoneticCode {
    /// Code string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no word could be encoded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PhoneticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phonetic encoder with a fixed code length
#[derive(Debug, Clone)]
pub struct PhoneticMatcher {
    code_length: usize,
}

impl Default for PhoneticMatcher {
    fn default() -> Self {
        Self::new(6)
    }
}

impl PhoneticMatcher {
    /// Create a matcher producing codes of `code_length` characters
    pub fn new(code_length: usize) -> Self {
        Self {
            code_length: code_length.max(2),
        }
    }

    /// Encode the leading word (first alphabetic token of 3+ letters)
    pub fn code(&self, text: &str) -> PhoneticCode {
        let word = text
            .split_whitespace()
            .find(|t| t.len() >= 3 && t.chars().all(|c| c.is_ascii_alphabetic()));

        match word {
            Some(word) => PhoneticCode(self.encode_word(&word.to_ascii_lowercase())),
            None => PhoneticCode::default(),
        }
    }

    /// Binary phonetic score: 1.0 when both codes exist and are equal
    pub fn score(&self, a: &str, b: &str) -> f32 {
        if self.matches(a, b) {
            1.0
        } else {
            0.0
        }
    }

    /// Whether two strings sound alike
    pub fn matches(&self, a: &str, b: &str) -> bool {
        let ca = self.code(a);
        !ca.is_empty() && ca == self.code(b)
    }

    fn encode_word(&self, word: &str) -> String {
        let mut chars = word.chars();
        let Some(first) = chars.next() else {
            return String::new();
        };
        let rest = rewrite_digraphs(chars.as_str());

        let mut code = String::with_capacity(self.code_length);
        code.push(first.to_ascii_uppercase());
        let mut prev = consonant_class(first);

        for c in rest.chars() {
            if code.len() >= self.code_length {
                break;
            }
            match c {
                'a' | 'e' | 'i' | 'o' | 'u' | 'y' => prev = None,
                'h' | 'w' => {}
                _ => {
                    let class = consonant_class(c);
                    if let Some(digit) = class.filter(|_| class != prev) {
                        code.push(digit);
                    }
                    prev = class;
                }
            }
        }

        while code.len() < self.code_length {
            code.push('0');
        }
        code
    }
}

/// Spelling variants that sound identical
fn rewrite_digraphs(letters: &str) -> String {
    letters.replace("ph", "f").replace("ck", "k").replace("qu", "kw")
}

fn consonant_class(c: char) -> Option<char> {
    match c {
        'b' | 'f' | 'p' | 'v' => Some('1'),
        'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
        'd' | 't' => Some('3'),
        'l' => Some('4'),
        'm' | 'n' => Some('5'),
        'r' => Some('6'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_fixed_length() {
        let matcher = PhoneticMatcher::default();
        for word in ["glucophage", "ace", "metformin", "amoxicillin"] {
            assert_eq!(matcher.code(word).as_str().len(), 6, "{}", word);
        }
        assert_eq!(matcher.code("metformin").as_str(), "M31655");
    }

    #[test]
    fn test_determinism() {
        let matcher = PhoneticMatcher::default();
        for s in ["glucophage 500 mg", "lisinopril", "", "xyz unknown 9999"] {
            assert_eq!(matcher.code(s), matcher.code(s));
        }
    }

    #[test]
    fn test_sound_alike_matches() {
        let matcher = PhoneticMatcher::default();
        assert!(matcher.matches("glucofage", "glucophage"));
        assert!(matcher.matches("glucofage 500 mg", "glucophage"));
        assert!(matcher.matches("amoxicilin", "amoxicillin"));
        assert!(!matcher.matches("metformin", "lisinopril"));
    }

    #[test]
    fn test_first_letter_is_preserved() {
        let matcher = PhoneticMatcher::default();
        assert!(matcher.code("phenytoin").as_str().starts_with('P'));
        assert!(matcher.code("knife").as_str().starts_with('K'));
        assert!(matcher.code("xanax").as_str().starts_with('X'));
        assert!(!matcher.matches("phenytoin", "fenytoin"));

        // Digraphs past the first letter still fold
        assert_eq!(matcher.code("sulpha"), matcher.code("sulfa"));
    }

    #[test]
    fn test_score_is_binary() {
        let matcher = PhoneticMatcher::default();
        for (a, b) in [("glucofage", "glucophage"), ("aspirin", "ibuprofen"), ("", "")] {
            let score = matcher.score(a, b);
            assert!(score == 0.0 || score == 1.0);
        }
    }

    #[test]
    fn test_no_codable_word() {
        let matcher = PhoneticMatcher::default();
        assert!(matcher.code("500 mg").is_empty());
        assert_eq!(matcher.score("500 mg", "500 mg"), 0.0);
    }
}
