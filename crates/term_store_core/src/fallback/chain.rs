//! Language fallback chains.
//!
//! A chain is an ordered list of acceptable languages, most preferred first.
//! An entry may be a variant of another language: it is fetched in its source
//! language and the text is converted by a `VariantConverter`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::TermStoreError;
use crate::ports::Result;

/// One chain entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguageWithConversion {
    language: String,
    source_language: Option<String>,
}

impl LanguageWithConversion {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            source_language: None,
        }
    }

    /// `language` served by converting text stored in `source_language`.
    pub fn variant(language: impl Into<String>, source_language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            source_language: Some(source_language.into()),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn source_language(&self) -> Option<&str> {
        self.source_language.as_deref()
    }

    /// Language whose stored text this entry reads.
    pub fn fetch_language(&self) -> &str {
        self.source_language.as_deref().unwrap_or(&self.language)
    }
}

impl fmt::Display for LanguageWithConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source_language {
            Some(source) => write!(f, "{}<{}", self.language, source),
            None => f.write_str(&self.language),
        }
    }
}

/// Transliterates text between variants of one language.
pub trait VariantConverter: Send + Sync {
    fn convert(&self, text: &str, from_language: &str, to_language: &str) -> String;
}

/// Returns the text unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityConverter;

impl VariantConverter for IdentityConverter {
    fn convert(&self, text: &str, _from_language: &str, _to_language: &str) -> String {
        text.to_string()
    }
}

/// Value picked by `extract_preferred_value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredValue {
    pub value: String,
    /// Language of the matching entry.
    pub language: String,
    /// Set when the entry was a variant.
    pub source_language: Option<String>,
}

#[derive(Clone)]
pub struct LanguageFallbackChain {
    entries: Vec<LanguageWithConversion>,
    converter: Arc<dyn VariantConverter>,
}

impl fmt::Debug for LanguageFallbackChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageFallbackChain")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl LanguageFallbackChain {
    pub fn new(entries: Vec<LanguageWithConversion>) -> Result<Self> {
        if entries.is_empty() {
            return Err(TermStoreError::InvalidInput(
                "language fallback chain needs at least one language".into(),
            ));
        }
        Ok(Self {
            entries,
            converter: Arc::new(IdentityConverter),
        })
    }

    /// Chain of plain languages, in the given order.
    pub fn from_languages<S: AsRef<str>>(languages: &[S]) -> Result<Self> {
        Self::new(
            languages
                .iter()
                .map(|l| LanguageWithConversion::new(l.as_ref()))
                .collect(),
        )
    }

    pub fn with_converter(mut self, converter: Arc<dyn VariantConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn entries(&self) -> &[LanguageWithConversion] {
        &self.entries
    }

    /// The most preferred language.
    pub fn requested_language(&self) -> &str {
        self.entries[0].language()
    }

    /// Languages to fetch, deduplicated, in preference order.
    pub fn fetch_language_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let code = entry.fetch_language();
            if !codes.iter().any(|c| c == code) {
                codes.push(code.to_string());
            }
        }
        codes
    }

    /// Walk the entries in order and return the first one whose fetch language
    /// has a value. An empty string is a value.
    pub fn extract_preferred_value(&self, values: &BTreeMap<String, String>) -> Option<PreferredValue> {
        self.entries.iter().find_map(|entry| {
            let text = values.get(entry.fetch_language())?;
            let value = match entry.source_language() {
                Some(source) => self.converter.convert(text, source, entry.language()),
                None => text.clone(),
            };
            Some(PreferredValue {
                value,
                language: entry.language().to_string(),
                source_language: entry.source_language().map(str::to_string),
            })
        })
    }

    /// Stable textual form, used in cache keys.
    pub fn cache_key(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(l, t)| (l.to_string(), t.to_string())).collect()
    }

    struct UpperCaser;

    impl VariantConverter for UpperCaser {
        fn convert(&self, text: &str, _from: &str, _to: &str) -> String {
            text.to_uppercase()
        }
    }

    #[test]
    fn empty_chain_is_rejected() {
        assert!(LanguageFallbackChain::new(vec![]).is_err());
    }

    #[test]
    fn picks_first_language_with_a_value() {
        let chain = LanguageFallbackChain::from_languages(&["de", "en", "fr"]).unwrap();
        let picked = chain
            .extract_preferred_value(&values(&[("en", "Cat"), ("fr", "Chat")]))
            .unwrap();
        assert_eq!(picked.value, "Cat");
        assert_eq!(picked.language, "en");
        assert_eq!(picked.source_language, None);
        assert_eq!(chain.requested_language(), "de");
    }

    #[test]
    fn empty_string_is_a_value() {
        let chain = LanguageFallbackChain::from_languages(&["en", "fr"]).unwrap();
        let picked = chain
            .extract_preferred_value(&values(&[("en", ""), ("fr", "Chat")]))
            .unwrap();
        assert_eq!(picked.value, "");
        assert_eq!(picked.language, "en");
    }

    #[test]
    fn nothing_in_chain_yields_none() {
        let chain = LanguageFallbackChain::from_languages(&["de"]).unwrap();
        assert_eq!(chain.extract_preferred_value(&values(&[("en", "Cat")])), None);
    }

    #[test]
    fn variant_entries_fetch_their_source_and_convert() {
        let chain = LanguageFallbackChain::new(vec![
            LanguageWithConversion::variant("sr-el", "sr-ec"),
            LanguageWithConversion::new("sr-ec"),
            LanguageWithConversion::new("en"),
        ])
        .unwrap()
        .with_converter(Arc::new(UpperCaser));

        assert_eq!(chain.fetch_language_codes(), vec!["sr-ec", "en"]);
        assert_eq!(chain.requested_language(), "sr-el");

        let picked = chain
            .extract_preferred_value(&values(&[("sr-ec", "mačka"), ("en", "cat")]))
            .unwrap();
        assert_eq!(picked.value, "MAČKA");
        assert_eq!(picked.language, "sr-el");
        assert_eq!(picked.source_language.as_deref(), Some("sr-ec"));
    }

    #[test]
    fn cache_key_encodes_variants() {
        let chain = LanguageFallbackChain::new(vec![
            LanguageWithConversion::variant("sr-el", "sr-ec"),
            LanguageWithConversion::new("en"),
        ])
        .unwrap();
        assert_eq!(chain.cache_key(), "sr-el<sr-ec,en");
    }
}
