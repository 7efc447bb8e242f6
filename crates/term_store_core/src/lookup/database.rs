//! Prefetching term lookup over the local term store.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use crate::entity_id::{EntityId, EntityIdKind, EntityKind};
use crate::error::TermStoreError;
use crate::lookup::{PrefetchingTermLookup, Prefetched, TermBuffer, TermLookup};
use crate::mapping::{LinkTableMapping, LinkTableRegistry};
use crate::ports::{Result, TermFilter, TermInLangIdsResolver};
use crate::term::{Fingerprint, TermType};

/// Reads stored entities through the resolver.
///
/// `get_terms_of_type` and `get_terms` always query the store. Only explicit
/// `prefetch_terms` fills the buffer, one grouped query per entity kind, and
/// only `get_prefetched_*` reads it. The buffer is request-scoped: build one
/// lookup per request, or `clear` it, so prefetched keys never outlive a write.
pub struct DatabasePrefetchingTermLookup {
    resolver: Arc<dyn TermInLangIdsResolver>,
    registry: LinkTableRegistry,
    buffer: RwLock<TermBuffer>,
}

impl DatabasePrefetchingTermLookup {
    pub fn new(resolver: Arc<dyn TermInLangIdsResolver>, registry: LinkTableRegistry) -> Self {
        Self {
            resolver,
            registry,
            buffer: RwLock::new(TermBuffer::new()),
        }
    }

    /// Every term of one entity, bypassing the buffer.
    pub async fn get_terms(&self, entity_id: &EntityId) -> Result<Fingerprint> {
        let (mapping, numeric_id) = self.locate(entity_id)?;
        let mut grouped = self
            .resolver
            .resolve_grouped_term_in_lang_ids(mapping, &[numeric_id], &TermFilter::all())
            .await?;
        Ok(grouped
            .remove(&numeric_id)
            .map(|terms| Fingerprint::from_terms(&terms))
            .unwrap_or_default())
    }

    /// Forget everything prefetched so far.
    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.write() {
            buffer.clear();
        }
    }

    fn locate(&self, entity_id: &EntityId) -> Result<(&LinkTableMapping, u32)> {
        let EntityId::Standard(id) = entity_id else {
            return Err(TermStoreError::UnexpectedEntityKind {
                entity_id: entity_id.to_string(),
                expected: EntityIdKind::Standard,
            });
        };
        if id.is_foreign() {
            return Err(TermStoreError::ForeignEntityId(entity_id.to_string()));
        }
        let mapping = self
            .registry
            .for_kind(id.kind)
            .ok_or_else(|| TermStoreError::UnsupportedEntityKind {
                entity_id: entity_id.to_string(),
                expected: registered_kinds(&self.registry),
            })?;
        Ok((mapping, id.numeric_id))
    }

    fn read_buffer<T>(&self, f: impl FnOnce(&TermBuffer) -> Prefetched<T>) -> Prefetched<T> {
        match self.buffer.read() {
            Ok(buffer) => f(&buffer),
            Err(_) => Prefetched::NotPrefetched,
        }
    }
}

fn registered_kinds(registry: &LinkTableRegistry) -> String {
    registry
        .tables()
        .iter()
        .map(|t| t.entity_kind().as_str())
        .collect::<Vec<_>>()
        .join(" or ")
}

#[async_trait]
impl TermLookup for DatabasePrefetchingTermLookup {
    async fn get_terms_of_type(
        &self,
        entity_id: &EntityId,
        term_type: TermType,
        languages: &[String],
    ) -> Result<BTreeMap<String, String>> {
        if languages.is_empty() {
            return Ok(BTreeMap::new());
        }
        let (mapping, numeric_id) = self.locate(entity_id)?;
        let filter = TermFilter::all()
            .with_term_types([term_type])
            .with_languages(languages.iter().cloned());
        let grouped = self
            .resolver
            .resolve_grouped_term_in_lang_ids(mapping, &[numeric_id], &filter)
            .await?;
        let Some(terms) = grouped.get(&numeric_id) else {
            return Ok(BTreeMap::new());
        };
        Ok(languages
            .iter()
            .filter_map(|language| {
                terms
                    .first(term_type, language)
                    .map(|text| (language.clone(), text.to_string()))
            })
            .collect())
    }
}

#[async_trait]
impl PrefetchingTermLookup for DatabasePrefetchingTermLookup {
    async fn prefetch_terms(
        &self,
        entity_ids: &[EntityId],
        term_types: &[TermType],
        languages: &[String],
    ) -> Result<()> {
        if entity_ids.is_empty() || term_types.is_empty() || languages.is_empty() {
            return Ok(());
        }

        let to_fetch = self
            .buffer
            .read()
            .map_err(|e| anyhow::anyhow!("Lock: {}", e))?
            .entities_to_fetch(entity_ids, term_types, languages);
        if to_fetch.is_empty() {
            return Ok(());
        }

        let mut by_kind: BTreeMap<EntityKind, Vec<(EntityId, u32)>> = BTreeMap::new();
        for entity_id in to_fetch {
            let (mapping, numeric_id) = self.locate(&entity_id)?;
            by_kind
                .entry(mapping.entity_kind())
                .or_default()
                .push((entity_id, numeric_id));
        }

        let filter = TermFilter::all()
            .with_term_types(term_types.iter().copied())
            .with_languages(languages.iter().cloned());

        for (kind, entities) in by_kind {
            let Some(mapping) = self.registry.for_kind(kind) else {
                continue;
            };
            let numeric_ids: Vec<u32> = entities
                .iter()
                .map(|(_, numeric_id)| *numeric_id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let grouped = self
                .resolver
                .resolve_grouped_term_in_lang_ids(mapping, &numeric_ids, &filter)
                .await?;

            let mut buffer = self
                .buffer
                .write()
                .map_err(|e| anyhow::anyhow!("Lock: {}", e))?;
            for (entity_id, numeric_id) in &entities {
                let terms = grouped.get(numeric_id).cloned().unwrap_or_default();
                buffer.record(entity_id, term_types, languages, &terms);
            }
        }
        Ok(())
    }

    fn get_prefetched_term(
        &self,
        entity_id: &EntityId,
        term_type: TermType,
        language: &str,
    ) -> Prefetched<String> {
        self.read_buffer(|buffer| buffer.get(entity_id, term_type, language))
    }

    fn get_prefetched_aliases(&self, entity_id: &EntityId, language: &str) -> Prefetched<Vec<String>> {
        self.read_buffer(|buffer| buffer.get_all(entity_id, TermType::Alias, language))
    }
}
