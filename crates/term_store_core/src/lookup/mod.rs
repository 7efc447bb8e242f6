//! Term sources for the read path.
//!
//! `TermLookup` serves terms of one entity for a set of languages in one call.
//! `PrefetchingTermLookup` adds batched read-ahead over many entities and
//! distinguishes "looked up and absent" from "never looked up".

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::entity_id::EntityId;
use crate::ports::Result;
use crate::term::TermType;

pub mod buffer;
pub mod database;
pub mod federated;

pub use buffer::TermBuffer;
pub use database::DatabasePrefetchingTermLookup;
pub use federated::{ApiPrefetchingTermLookup, FederatedEntitySource, RemoteEntityTerms, FETCH_BATCH_SIZE};

/// State of one prefetched (entity, term type, language) key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefetched<T> {
    /// Not part of any prefetch so far; the caller has to fetch it.
    NotPrefetched,
    /// Prefetched, and the entity has no such term.
    Absent,
    /// Prefetched and present. May be an empty string.
    Present(T),
}

impl<T> Prefetched<T> {
    pub fn is_prefetched(&self) -> bool {
        !matches!(self, Self::NotPrefetched)
    }

    pub fn present(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Prefetched<U> {
        match self {
            Self::NotPrefetched => Prefetched::NotPrefetched,
            Self::Absent => Prefetched::Absent,
            Self::Present(value) => Prefetched::Present(f(value)),
        }
    }
}

/// Single-entity term source keyed by language.
#[async_trait]
pub trait TermLookup: Send + Sync {
    /// Terms of one type in the given languages. Languages without a term are
    /// missing from the map; an empty string is a present term.
    async fn get_terms_of_type(
        &self,
        entity_id: &EntityId,
        term_type: TermType,
        languages: &[String],
    ) -> Result<BTreeMap<String, String>>;

    async fn get_labels(&self, entity_id: &EntityId, languages: &[String]) -> Result<BTreeMap<String, String>> {
        self.get_terms_of_type(entity_id, TermType::Label, languages).await
    }

    async fn get_descriptions(
        &self,
        entity_id: &EntityId,
        languages: &[String],
    ) -> Result<BTreeMap<String, String>> {
        self.get_terms_of_type(entity_id, TermType::Description, languages)
            .await
    }
}

/// Batched read-ahead over many entities.
#[async_trait]
pub trait PrefetchingTermLookup: TermLookup {
    /// Load every (entity, type, language) combination not loaded before.
    async fn prefetch_terms(
        &self,
        entity_ids: &[EntityId],
        term_types: &[TermType],
        languages: &[String],
    ) -> Result<()>;

    /// First text of a prefetched key. Aliases yield their first alias.
    fn get_prefetched_term(
        &self,
        entity_id: &EntityId,
        term_type: TermType,
        language: &str,
    ) -> Prefetched<String>;

    fn get_prefetched_aliases(&self, entity_id: &EntityId, language: &str) -> Prefetched<Vec<String>>;
}

/// Collect the first text per language from prefetched keys, skipping languages
/// that are absent or were not prefetched.
pub(crate) fn collect_prefetched(
    lookup: &dyn PrefetchingTermLookup,
    entity_id: &EntityId,
    term_type: TermType,
    languages: &[String],
) -> BTreeMap<String, String> {
    languages
        .iter()
        .filter_map(|language| {
            lookup
                .get_prefetched_term(entity_id, term_type, language)
                .present()
                .map(|text| (language.clone(), text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefetched_states_are_distinct() {
        let empty: Prefetched<String> = Prefetched::Present(String::new());
        assert_ne!(empty, Prefetched::Absent);
        assert_ne!(Prefetched::<String>::Absent, Prefetched::NotPrefetched);
        assert!(empty.is_prefetched());
        assert!(Prefetched::<String>::Absent.is_prefetched());
        assert!(!Prefetched::<String>::NotPrefetched.is_prefetched());
    }

    #[test]
    fn present_and_map() {
        assert_eq!(Prefetched::Present(2).map(|n| n * 2).present(), Some(4));
        assert_eq!(Prefetched::<i32>::Absent.present(), None);
        assert_eq!(Prefetched::<i32>::NotPrefetched.map(|n| n + 1), Prefetched::NotPrefetched);
    }
}
