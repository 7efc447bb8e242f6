//! Buffer of prefetched terms, shared by the prefetching lookups.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity_id::EntityId;
use crate::lookup::Prefetched;
use crate::term::{TermType, TermsByType};

/// Prefetched terms per entity, plus the set of keys that were looked up.
#[derive(Debug, Default)]
pub struct TermBuffer {
    terms: BTreeMap<EntityId, TermsByType>,
    prefetched: BTreeSet<(EntityId, TermType, String)>,
}

impl TermBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_prefetched(&self, entity_id: &EntityId, term_type: TermType, language: &str) -> bool {
        // BTreeSet lookups need an owned tuple
        self.prefetched
            .contains(&(entity_id.clone(), term_type, language.to_string()))
    }

    /// Entities with at least one (type, language) combination not yet prefetched.
    pub fn entities_to_fetch(
        &self,
        entity_ids: &[EntityId],
        term_types: &[TermType],
        languages: &[String],
    ) -> Vec<EntityId> {
        let mut seen = BTreeSet::new();
        entity_ids
            .iter()
            .filter(|entity_id| {
                term_types.iter().any(|term_type| {
                    languages
                        .iter()
                        .any(|language| !self.is_prefetched(entity_id, *term_type, language))
                })
            })
            .filter(|entity_id| seen.insert((*entity_id).clone()))
            .cloned()
            .collect()
    }

    /// Record a fetch result. Every requested (type, language) combination is
    /// marked prefetched, whether or not `terms` holds a text for it.
    pub fn record(
        &mut self,
        entity_id: &EntityId,
        term_types: &[TermType],
        languages: &[String],
        terms: &TermsByType,
    ) {
        let buffered = self.terms.entry(entity_id.clone()).or_default();
        for term_type in term_types {
            for language in languages {
                buffered.remove(*term_type, language);
                for text in terms.texts(*term_type, language) {
                    buffered.push(*term_type, language.as_str(), text.as_str());
                }
                self.prefetched
                    .insert((entity_id.clone(), *term_type, language.clone()));
            }
        }
    }

    pub fn get(&self, entity_id: &EntityId, term_type: TermType, language: &str) -> Prefetched<String> {
        match self.get_all(entity_id, term_type, language) {
            Prefetched::Present(texts) => texts
                .into_iter()
                .next()
                .map_or(Prefetched::Absent, Prefetched::Present),
            Prefetched::Absent => Prefetched::Absent,
            Prefetched::NotPrefetched => Prefetched::NotPrefetched,
        }
    }

    pub fn get_all(&self, entity_id: &EntityId, term_type: TermType, language: &str) -> Prefetched<Vec<String>> {
        if !self.is_prefetched(entity_id, term_type, language) {
            return Prefetched::NotPrefetched;
        }
        let texts = self
            .terms
            .get(entity_id)
            .map(|terms| terms.texts(term_type, language).to_vec())
            .unwrap_or_default();
        if texts.is_empty() {
            Prefetched::Absent
        } else {
            Prefetched::Present(texts)
        }
    }

    pub fn clear(&mut self) {
        self.terms.clear();
        self.prefetched.clear();
    }
}
