//! Brand name -> generic name resolution

use std::collections::HashMap;
use tracing::warn;

use super::normalize::normalize_text;

/// Outcome of resolving a normalized query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Text with brand names replaced by generic names
    pub text: String,
    /// Whether any replacement happened
    pub changed: bool,
}

/// Static many-to-one lookup from brand tokens to generic tokens
///
/// Whole aliases map to the full canonical name; single-token aliases also
/// map token-wise to the canonical lead token, so a brand name embedded in a
/// longer reading ("glucophage 500 mg") still resolves.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    phrases: HashMap<String, String>,
    tokens: HashMap<String, String>,
}

impl AliasResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(canonical name, aliases)` pairs plus a static brand table
    pub fn from_entries<'a, I>(entries: I, extra: &HashMap<String, String>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut resolver = Self::new();
        for (canonical, aliases) in entries {
            for alias in aliases {
                resolver.insert(alias, canonical);
            }
        }

        // Sorted so conflicts resolve the same way on every load
        let mut extra: Vec<_> = extra.iter().collect();
        extra.sort();
        for (brand, generic) in extra {
            resolver.insert(brand, generic);
        }
        resolver
    }

    /// Register a brand alias for a canonical name
    pub fn insert(&mut self, alias: &str, canonical: &str) {
        let alias = normalize_text(alias);
        let canonical = normalize_text(canonical);
        if alias.is_empty() || canonical.is_empty() || alias == canonical {
            return;
        }

        match self.phrases.get(&alias) {
            Some(existing) if existing != &canonical => {
                warn!(
                    "Alias '{}' already maps to '{}', ignoring '{}'",
                    alias, existing, canonical
                );
            }
            Some(_) => {}
            None => {
                self.phrases.insert(alias.clone(), canonical.clone());
            }
        }

        if !alias.contains(' ') {
            if let Some(lead) = lead_token(&canonical) {
                if lead != alias {
                    self.tokens.entry(alias).or_insert_with(|| lead.to_string());
                }
            }
        }
    }

    /// Look up a single normalized token; unresolved tokens pass through
    pub fn resolve_token<'a>(&'a self, token: &'a str) -> &'a str {
        self.tokens.get(token).map(String::as_str).unwrap_or(token)
    }

    /// Resolve a normalized query
    pub fn resolve(&self, normalized: &str) -> Resolution {
        if let Some(canonical) = self.phrases.get(normalized) {
            return Resolution {
                text: canonical.clone(),
                changed: true,
            };
        }

        let text = normalized
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(|t| self.resolve_token(t))
            .collect::<Vec<_>>()
            .join(" ");

        Resolution {
            changed: text != normalized,
            text,
        }
    }

    /// Number of whole-alias mappings
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    /// Whether no aliases are registered
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// First alphabetic token of a normalized name
fn lead_token(name: &str) -> Option<&str> {
    name.split(' ')
        .find(|t| t.chars().any(|c| c.is_alphabetic()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> AliasResolver {
        let glucophage = vec!["Glucophage".to_string(), "Glucophage XR".to_string()];
        let tylenol = vec!["Tylenol".to_string()];
        let entries: Vec<(&str, &[String])> = vec![
            ("Metformin 500mg", &glucophage),
            ("Paracetamol 500mg", &tylenol),
        ];
        let mut extra = HashMap::new();
        extra.insert("Panadol".to_string(), "Paracetamol".to_string());
        AliasResolver::from_entries(entries, &extra)
    }

    #[test]
    fn test_whole_alias_resolves_to_canonical() {
        let resolver = resolver();
        let resolution = resolver.resolve("glucophage");
        assert_eq!(resolution.text, "metformin 500 mg");
        assert!(resolution.changed);

        assert_eq!(resolver.resolve("glucophage xr").text, "metformin 500 mg");
    }

    #[test]
    fn test_embedded_brand_token_resolves() {
        let resolver = resolver();
        let resolution = resolver.resolve("glucophage 500 mg");
        assert_eq!(resolution.text, "metformin 500 mg");
        assert!(resolution.changed);
        assert_eq!(resolver.resolve("panadol 1 g").text, "paracetamol 1 g");
    }

    #[test]
    fn test_unresolved_passes_through() {
        let resolver = resolver();
        let resolution = resolver.resolve("xyz unknown 9999");
        assert_eq!(resolution.text, "xyz unknown 9999");
        assert!(!resolution.changed);
        assert_eq!(resolver.resolve_token("aspirin"), "aspirin");
    }

    #[test]
    fn test_conflicting_alias_keeps_first() {
        let mut resolver = AliasResolver::new();
        resolver.insert("Brandx", "Alpha 10mg");
        resolver.insert("Brandx", "Beta 20mg");
        assert_eq!(resolver.resolve("brandx").text, "alpha 10 mg");
        assert_eq!(resolver.len(), 1);
    }
}
