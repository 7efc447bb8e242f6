//! Fallback lookup for pseudo-entities.
//!
//! Each pseudo type brings its own term source. The embedding system registers
//! them once at startup in a `PseudoTermLookupRegistry` and hands the registry
//! to the lookup.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::entity_id::{EntityId, EntityIdKind, PseudoEntityId};
use crate::error::TermStoreError;
use crate::fallback::{term_fallback, FallbackLabelDescriptionLookup, LanguageFallbackChain};
use crate::ports::Result;
use crate::term::{TermFallback, TermType};

/// Term source for one pseudo-entity type.
#[async_trait]
pub trait PseudoTermLookup: Send + Sync {
    async fn get_labels(&self, entity_id: &PseudoEntityId, languages: &[String]) -> Result<BTreeMap<String, String>>;

    async fn get_descriptions(
        &self,
        entity_id: &PseudoEntityId,
        languages: &[String],
    ) -> Result<BTreeMap<String, String>>;
}

/// Pseudo type → term source. Built once, read-only afterwards.
#[derive(Default, Clone)]
pub struct PseudoTermLookupRegistry {
    lookups: HashMap<String, Arc<dyn PseudoTermLookup>>,
}

impl PseudoTermLookupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. A later registration for the same type replaces the earlier one.
    pub fn with_lookup(mut self, pseudo_type: impl Into<String>, lookup: Arc<dyn PseudoTermLookup>) -> Self {
        self.lookups.insert(pseudo_type.into(), lookup);
        self
    }

    pub fn get(&self, pseudo_type: &str) -> Option<&Arc<dyn PseudoTermLookup>> {
        self.lookups.get(pseudo_type)
    }

    pub fn pseudo_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.lookups.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

pub struct PseudoFallbackLabelDescriptionLookup {
    registry: Arc<PseudoTermLookupRegistry>,
    chain: LanguageFallbackChain,
}

impl PseudoFallbackLabelDescriptionLookup {
    pub fn new(registry: Arc<PseudoTermLookupRegistry>, chain: LanguageFallbackChain) -> Self {
        Self { registry, chain }
    }

    async fn get_term(&self, entity_id: &EntityId, term_type: TermType) -> Result<Option<TermFallback>> {
        let EntityId::Pseudo(pseudo_id) = entity_id else {
            return Err(TermStoreError::UnexpectedEntityKind {
                entity_id: entity_id.to_string(),
                expected: EntityIdKind::Pseudo,
            });
        };
        let lookup = self.registry.get(&pseudo_id.pseudo_type).ok_or_else(|| {
            TermStoreError::NoPseudoTermLookup {
                entity_id: entity_id.to_string(),
                pseudo_type: pseudo_id.pseudo_type.clone(),
            }
        })?;

        let languages = self.chain.fetch_language_codes();
        let terms = match term_type {
            TermType::Label => lookup.get_labels(pseudo_id, &languages).await?,
            TermType::Description => lookup.get_descriptions(pseudo_id, &languages).await?,
            TermType::Alias => {
                return Err(TermStoreError::UnsupportedTermType {
                    term_type,
                    source_name: format!("pseudo-entity type {}", pseudo_id.pseudo_type),
                })
            }
        };
        Ok(term_fallback(&self.chain, &terms))
    }
}

#[async_trait]
impl FallbackLabelDescriptionLookup for PseudoFallbackLabelDescriptionLookup {
    async fn get_label(&self, entity_id: &EntityId) -> Result<Option<TermFallback>> {
        self.get_term(entity_id, TermType::Label).await
    }

    async fn get_description(&self, entity_id: &EntityId) -> Result<Option<TermFallback>> {
        self.get_term(entity_id, TermType::Description).await
    }
}
