//! Term value types: term types, interned ids, fingerprints and fallback results.
//! These are pure value types: no sqlx, no DB dependencies.

// `TermType::from_str` returns None for unknown values rather than an error.
#![allow(clippy::should_implement_trait)]

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::normalize::StringNormalizer;

// ── TermType ──────────────────────────────────────────────────

/// Kind of a term attached to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermType {
    Label,
    Description,
    Alias,
}

impl TermType {
    pub const ALL: [TermType; 3] = [TermType::Label, TermType::Description, TermType::Alias];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Description => "description",
            Self::Alias => "alias",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "label" => Some(Self::Label),
            "description" => Some(Self::Description),
            "alias" => Some(Self::Alias),
            _ => None,
        }
    }

    /// Value persisted in `term_in_lang.type_id`.
    pub fn type_id(&self) -> i16 {
        match self {
            Self::Label => 1,
            Self::Description => 2,
            Self::Alias => 3,
        }
    }

    pub fn from_type_id(type_id: i16) -> Option<Self> {
        match type_id {
            1 => Some(Self::Label),
            2 => Some(Self::Description),
            3 => Some(Self::Alias),
            _ => None,
        }
    }
}

impl fmt::Display for TermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── TermInLangId ──────────────────────────────────────────────

/// Interned identity of one (term type, language, normalized text) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermInLangId(pub i64);

impl fmt::Display for TermInLangId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The triple a `TermInLangId` stands for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TermKey {
    pub term_type: TermType,
    pub language: String,
    pub text: String,
}

impl TermKey {
    pub fn new(term_type: TermType, language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            term_type,
            language: language.into(),
            text: text.into(),
        }
    }
}

// ── TermsByType ───────────────────────────────────────────────

pub type TermsByLanguage = BTreeMap<String, Vec<String>>;

/// Terms keyed by type, then language. Labels and descriptions hold one text per
/// language; aliases hold an ordered set. Input of the acquirer, output of the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermsByType {
    inner: BTreeMap<TermType, TermsByLanguage>,
}

impl TermsByType {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text, ignoring it if the same text is already present for the type and language.
    pub fn push(&mut self, term_type: TermType, language: impl Into<String>, text: impl Into<String>) {
        let texts = self
            .inner
            .entry(term_type)
            .or_default()
            .entry(language.into())
            .or_default();
        let text = text.into();
        if !texts.contains(&text) {
            texts.push(text);
        }
    }

    pub fn get(&self, term_type: TermType) -> Option<&TermsByLanguage> {
        self.inner.get(&term_type)
    }

    pub fn texts(&self, term_type: TermType, language: &str) -> &[String] {
        self.inner
            .get(&term_type)
            .and_then(|langs| langs.get(language))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First text for a type and language; `Some("")` for a stored empty text.
    pub fn first(&self, term_type: TermType, language: &str) -> Option<&str> {
        self.texts(term_type, language).first().map(String::as_str)
    }

    /// Drop every text of a type in a language. Used to replace a buffered slice.
    pub fn remove(&mut self, term_type: TermType, language: &str) {
        if let Some(langs) = self.inner.get_mut(&term_type) {
            langs.remove(language);
            if langs.is_empty() {
                self.inner.remove(&term_type);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values().all(|langs| langs.values().all(Vec::is_empty))
    }

    /// Number of (type, language, text) triples.
    pub fn triple_count(&self) -> usize {
        self.inner
            .values()
            .flat_map(|langs| langs.values())
            .map(Vec::len)
            .sum()
    }

    pub fn triples(&self) -> impl Iterator<Item = (TermType, &str, &str)> + '_ {
        self.inner.iter().flat_map(|(term_type, langs)| {
            langs.iter().flat_map(move |(language, texts)| {
                texts
                    .iter()
                    .map(move |text| (*term_type, language.as_str(), text.as_str()))
            })
        })
    }

    pub fn keys(&self) -> BTreeSet<TermKey> {
        self.triples()
            .map(|(term_type, language, text)| TermKey::new(term_type, language, text))
            .collect()
    }

    pub fn extend(&mut self, other: &TermsByType) {
        for (term_type, language, text) in other.triples() {
            self.push(term_type, language, text);
        }
    }
}

impl FromIterator<TermKey> for TermsByType {
    fn from_iter<I: IntoIterator<Item = TermKey>>(iter: I) -> Self {
        let mut terms = TermsByType::new();
        for key in iter {
            terms.push(key.term_type, key.language, key.text);
        }
        terms
    }
}

// ── Fingerprint ───────────────────────────────────────────────

/// Labels, descriptions and aliases of one entity, keyed by language.
///
/// Transient: only its decomposition into TermInLangIds is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    labels: BTreeMap<String, String>,
    descriptions: BTreeMap<String, String>,
    aliases: BTreeMap<String, Vec<String>>,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.set_label(language, text);
        self
    }

    pub fn with_description(
        mut self,
        language: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.set_description(language, text);
        self
    }

    pub fn with_aliases<I, S>(mut self, language: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_aliases(language, aliases);
        self
    }

    pub fn set_label(&mut self, language: impl Into<String>, text: impl Into<String>) {
        self.labels.insert(language.into(), text.into());
    }

    pub fn set_description(&mut self, language: impl Into<String>, text: impl Into<String>) {
        self.descriptions.insert(language.into(), text.into());
    }

    /// Replace the alias group of a language. Duplicates collapse to their first
    /// occurrence; an empty group removes the language.
    pub fn set_aliases<I, S>(&mut self, language: impl Into<String>, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut group: Vec<String> = Vec::new();
        for alias in aliases {
            let alias = alias.into();
            if !group.contains(&alias) {
                group.push(alias);
            }
        }
        let language = language.into();
        if group.is_empty() {
            self.aliases.remove(&language);
        } else {
            self.aliases.insert(language, group);
        }
    }

    pub fn remove_label(&mut self, language: &str) -> Option<String> {
        self.labels.remove(language)
    }

    pub fn remove_description(&mut self, language: &str) -> Option<String> {
        self.descriptions.remove(language)
    }

    pub fn label(&self, language: &str) -> Option<&str> {
        self.labels.get(language).map(String::as_str)
    }

    pub fn description(&self, language: &str) -> Option<&str> {
        self.descriptions.get(language).map(String::as_str)
    }

    pub fn aliases(&self, language: &str) -> &[String] {
        self.aliases.get(language).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn descriptions(&self) -> &BTreeMap<String, String> {
        &self.descriptions
    }

    pub fn alias_groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.aliases
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.descriptions.is_empty() && self.aliases.is_empty()
    }

    /// Decompose into normalized term triples, the acquirer's input.
    pub fn to_terms(&self, normalizer: &dyn StringNormalizer) -> TermsByType {
        let mut terms = TermsByType::new();
        for (language, text) in &self.labels {
            terms.push(TermType::Label, language.as_str(), normalizer.normalize(text));
        }
        for (language, text) in &self.descriptions {
            terms.push(
                TermType::Description,
                language.as_str(),
                normalizer.normalize(text),
            );
        }
        for (language, aliases) in &self.aliases {
            for alias in aliases {
                terms.push(TermType::Alias, language.as_str(), normalizer.normalize(alias));
            }
        }
        terms
    }

    /// Rebuild from resolved terms. A label or description language holding several
    /// texts (only possible after a data error) keeps the first one.
    pub fn from_terms(terms: &TermsByType) -> Self {
        let mut fingerprint = Fingerprint::new();
        if let Some(labels) = terms.get(TermType::Label) {
            for (language, texts) in labels {
                if let Some(text) = texts.first() {
                    fingerprint.set_label(language.as_str(), text.as_str());
                }
            }
        }
        if let Some(descriptions) = terms.get(TermType::Description) {
            for (language, texts) in descriptions {
                if let Some(text) = texts.first() {
                    fingerprint.set_description(language.as_str(), text.as_str());
                }
            }
        }
        if let Some(aliases) = terms.get(TermType::Alias) {
            for (language, texts) in aliases {
                fingerprint.set_aliases(language.as_str(), texts.iter().cloned());
            }
        }
        fingerprint
    }

    /// Language-keyed equality that ignores the order within alias groups.
    pub fn equivalent(&self, other: &Fingerprint) -> bool {
        if self.labels != other.labels || self.descriptions != other.descriptions {
            return false;
        }
        if self.aliases.len() != other.aliases.len() {
            return false;
        }
        self.aliases.iter().all(|(language, group)| {
            other.aliases.get(language).is_some_and(|other_group| {
                let a: BTreeSet<&String> = group.iter().collect();
                let b: BTreeSet<&String> = other_group.iter().collect();
                a == b
            })
        })
    }
}

// ── TermFallback ──────────────────────────────────────────────

/// A term picked through a language fallback chain, with its provenance.
///
/// `text` may be empty: an empty stored term is a present value, distinct from
/// "no term" which is represented by `None` at the lookup boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermFallback {
    pub requested_language: String,
    pub text: String,
    pub actual_language: String,
    /// Language the text was converted from when a variant entry matched.
    pub source_language: Option<String>,
}

impl TermFallback {
    pub fn new(
        requested_language: impl Into<String>,
        text: impl Into<String>,
        actual_language: impl Into<String>,
        source_language: Option<String>,
    ) -> Self {
        Self {
            requested_language: requested_language.into(),
            text: text.into(),
            actual_language: actual_language.into(),
            source_language,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.requested_language != self.actual_language || self.source_language.is_some()
    }
}
