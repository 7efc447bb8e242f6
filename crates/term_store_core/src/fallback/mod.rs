//! Fallback-aware label and description lookups.
//!
//! Every lookup fetches all languages of its chain in one call and reduces
//! them to a single `TermFallback`. `None` means no language of the chain has
//! a term; an empty term is returned as `Some` with empty text.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entity_id::{EntityId, EntityIdKind};
use crate::error::TermStoreError;
use crate::lookup::TermLookup;
use crate::ports::Result;
use crate::term::{TermFallback, TermType};

pub mod caching;
pub mod chain;
pub mod dispatching;
pub mod pseudo;

pub use caching::{CachingFallbackLabelDescriptionLookup, EntityRevisionLookup};
pub use chain::{IdentityConverter, LanguageFallbackChain, LanguageWithConversion, PreferredValue, VariantConverter};
pub use dispatching::DispatchingFallbackLabelDescriptionLookup;
pub use pseudo::{PseudoFallbackLabelDescriptionLookup, PseudoTermLookup, PseudoTermLookupRegistry};

#[async_trait]
pub trait FallbackLabelDescriptionLookup: Send + Sync {
    async fn get_label(&self, entity_id: &EntityId) -> Result<Option<TermFallback>>;

    async fn get_description(&self, entity_id: &EntityId) -> Result<Option<TermFallback>>;
}

/// Reduce fetched terms through the chain.
pub(crate) fn term_fallback(
    chain: &LanguageFallbackChain,
    terms: &BTreeMap<String, String>,
) -> Option<TermFallback> {
    chain.extract_preferred_value(terms).map(|preferred| {
        TermFallback::new(
            chain.requested_language(),
            preferred.value,
            preferred.language,
            preferred.source_language,
        )
    })
}

/// Fallback lookup over a `TermLookup` that serves one kind of entity id.
pub struct LanguageFallbackLabelDescriptionLookup {
    term_lookup: Arc<dyn TermLookup>,
    chain: LanguageFallbackChain,
    expected_kind: EntityIdKind,
}

impl LanguageFallbackLabelDescriptionLookup {
    pub fn new(
        term_lookup: Arc<dyn TermLookup>,
        chain: LanguageFallbackChain,
        expected_kind: EntityIdKind,
    ) -> Self {
        Self {
            term_lookup,
            chain,
            expected_kind,
        }
    }

    pub fn chain(&self) -> &LanguageFallbackChain {
        &self.chain
    }

    async fn get_term(&self, entity_id: &EntityId, term_type: TermType) -> Result<Option<TermFallback>> {
        if entity_id.kind() != self.expected_kind {
            return Err(TermStoreError::UnexpectedEntityKind {
                entity_id: entity_id.to_string(),
                expected: self.expected_kind,
            });
        }
        let languages = self.chain.fetch_language_codes();
        let terms = self
            .term_lookup
            .get_terms_of_type(entity_id, term_type, &languages)
            .await?;
        Ok(term_fallback(&self.chain, &terms))
    }
}

#[async_trait]
impl FallbackLabelDescriptionLookup for LanguageFallbackLabelDescriptionLookup {
    async fn get_label(&self, entity_id: &EntityId) -> Result<Option<TermFallback>> {
        self.get_term(entity_id, TermType::Label).await
    }

    async fn get_description(&self, entity_id: &EntityId) -> Result<Option<TermFallback>> {
        self.get_term(entity_id, TermType::Description).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves fixed labels and records the languages it was asked for.
    struct FixedLabels {
        labels: BTreeMap<String, String>,
        requested: Mutex<Vec<Vec<String>>>,
    }

    impl FixedLabels {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                labels: pairs.iter().map(|(l, t)| (l.to_string(), t.to_string())).collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TermLookup for FixedLabels {
        async fn get_terms_of_type(
            &self,
            _entity_id: &EntityId,
            term_type: TermType,
            languages: &[String],
        ) -> Result<BTreeMap<String, String>> {
            self.requested.lock().unwrap().push(languages.to_vec());
            if term_type != TermType::Label {
                return Ok(BTreeMap::new());
            }
            Ok(languages
                .iter()
                .filter_map(|l| self.labels.get(l).map(|t| (l.clone(), t.clone())))
                .collect())
        }
    }

    fn lookup(source: Arc<FixedLabels>, chain: &[&str]) -> LanguageFallbackLabelDescriptionLookup {
        LanguageFallbackLabelDescriptionLookup::new(
            source,
            LanguageFallbackChain::from_languages(chain).unwrap(),
            EntityIdKind::Standard,
        )
    }

    #[tokio::test]
    async fn falls_back_to_the_next_language() {
        let source = Arc::new(FixedLabels::new(&[("en", "Cat"), ("fr", "Chat")]));
        let lookup = lookup(source.clone(), &["de", "en", "fr"]);

        let label = lookup.get_label(&EntityId::item(1)).await.unwrap().unwrap();

        assert_eq!(label, TermFallback::new("de", "Cat", "en", None));
        assert_eq!(
            *source.requested.lock().unwrap(),
            vec![vec!["de".to_string(), "en".to_string(), "fr".to_string()]],
            "all chain languages fetched in one call"
        );
    }

    #[tokio::test]
    async fn requested_language_is_the_first_entry_even_for_a_variant() {
        let source = Arc::new(FixedLabels::new(&[("sr-ec", "Мачка"), ("en", "Cat")]));
        let lookup = LanguageFallbackLabelDescriptionLookup::new(
            source.clone(),
            LanguageFallbackChain::new(vec![
                LanguageWithConversion::variant("sr-el", "sr-ec"),
                LanguageWithConversion::new("en"),
            ])
            .unwrap(),
            EntityIdKind::Standard,
        );

        let label = lookup.get_label(&EntityId::item(1)).await.unwrap().unwrap();

        // Fetched as sr-ec, but reported against the chain's head, sr-el.
        assert_eq!(
            *source.requested.lock().unwrap(),
            vec![vec!["sr-ec".to_string(), "en".to_string()]]
        );
        assert_eq!(label.requested_language, "sr-el");
        assert_ne!(label.requested_language, lookup.chain().fetch_language_codes()[0]);
        assert_eq!(label, TermFallback::new("sr-el", "Мачка", "sr-el", Some("sr-ec".into())));
        assert!(label.is_fallback());
    }

    #[tokio::test]
    async fn no_term_in_chain_is_none_not_empty() {
        let source = Arc::new(FixedLabels::new(&[("en", "")]));
        let lookup = lookup(source, &["en"]);

        let label = lookup.get_label(&EntityId::item(1)).await.unwrap();
        assert_eq!(label.map(|l| l.text), Some(String::new()));

        let description = lookup.get_description(&EntityId::item(1)).await.unwrap();
        assert_eq!(description, None);
    }

    #[tokio::test]
    async fn wrong_id_kind_fails_fast() {
        let source = Arc::new(FixedLabels::new(&[("en", "Cat")]));
        let lookup = lookup(source.clone(), &["en"]);

        let err = lookup
            .get_label(&EntityId::federated_property("https://wikidata.org/entity/", "P31"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "lookup for standard ids was handed https://wikidata.org/entity/P31"
        );
        assert!(source.requested.lock().unwrap().is_empty());
    }
}
