//! Prefetching term lookup for federated properties.
//!
//! Federated properties live in a remote repository; their terms come from a
//! `FederatedEntitySource` (typically the remote API) and are buffered here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::entity_id::{EntityId, EntityIdKind, FederatedPropertyId};
use crate::error::TermStoreError;
use crate::lookup::{collect_prefetched, PrefetchingTermLookup, Prefetched, TermBuffer, TermLookup};
use crate::ports::Result;
use crate::term::{TermType, TermsByType};

/// Most remote entities requested in one fetch.
pub const FETCH_BATCH_SIZE: usize = 50;

const SOURCE_NAME: &str = "federated properties";

/// Labels and descriptions of one remote entity, keyed by language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntityTerms {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub descriptions: BTreeMap<String, String>,
}

impl RemoteEntityTerms {
    fn to_terms(&self) -> TermsByType {
        let mut terms = TermsByType::new();
        for (language, text) in &self.labels {
            terms.push(TermType::Label, language.as_str(), text.as_str());
        }
        for (language, text) in &self.descriptions {
            terms.push(TermType::Description, language.as_str(), text.as_str());
        }
        terms
    }
}

/// Remote repository holding federated properties.
#[async_trait]
pub trait FederatedEntitySource: Send + Sync {
    /// Terms of the requested entities in the given languages. Entities the
    /// remote does not know are missing from the result.
    async fn fetch_entities(
        &self,
        ids: &[FederatedPropertyId],
        languages: &[String],
    ) -> Result<BTreeMap<FederatedPropertyId, RemoteEntityTerms>>;
}

/// Buffers labels and descriptions of federated properties. Aliases are not
/// served: prefetching them fails, and `get_prefetched_aliases` always
/// reports `NotPrefetched`.
pub struct ApiPrefetchingTermLookup {
    source: Arc<dyn FederatedEntitySource>,
    buffer: RwLock<TermBuffer>,
}

impl ApiPrefetchingTermLookup {
    pub fn new(source: Arc<dyn FederatedEntitySource>) -> Self {
        Self {
            source,
            buffer: RwLock::new(TermBuffer::new()),
        }
    }
}

fn federated_id(entity_id: &EntityId) -> Result<&FederatedPropertyId> {
    match entity_id {
        EntityId::FederatedProperty(id) => Ok(id),
        _ => Err(TermStoreError::UnexpectedEntityKind {
            entity_id: entity_id.to_string(),
            expected: EntityIdKind::FederatedProperty,
        }),
    }
}

#[async_trait]
impl TermLookup for ApiPrefetchingTermLookup {
    async fn get_terms_of_type(
        &self,
        entity_id: &EntityId,
        term_type: TermType,
        languages: &[String],
    ) -> Result<BTreeMap<String, String>> {
        self.prefetch_terms(std::slice::from_ref(entity_id), &[term_type], languages)
            .await?;
        Ok(collect_prefetched(self, entity_id, term_type, languages))
    }
}

#[async_trait]
impl PrefetchingTermLookup for ApiPrefetchingTermLookup {
    async fn prefetch_terms(
        &self,
        entity_ids: &[EntityId],
        term_types: &[TermType],
        languages: &[String],
    ) -> Result<()> {
        if term_types.contains(&TermType::Alias) {
            return Err(TermStoreError::UnsupportedTermType {
                term_type: TermType::Alias,
                source_name: SOURCE_NAME.to_string(),
            });
        }
        for entity_id in entity_ids {
            federated_id(entity_id)?;
        }
        if entity_ids.is_empty() || term_types.is_empty() || languages.is_empty() {
            return Ok(());
        }

        let to_fetch = self
            .buffer
            .read()
            .map_err(|e| anyhow::anyhow!("Lock: {}", e))?
            .entities_to_fetch(entity_ids, term_types, languages);

        for batch in to_fetch.chunks(FETCH_BATCH_SIZE) {
            let ids = batch
                .iter()
                .map(|entity_id| federated_id(entity_id).cloned())
                .collect::<Result<Vec<_>>>()?;
            let fetched = self.source.fetch_entities(&ids, languages).await?;
            tracing::debug!(
                requested = ids.len(),
                found = fetched.len(),
                "Fetched federated property terms"
            );

            let mut buffer = self
                .buffer
                .write()
                .map_err(|e| anyhow::anyhow!("Lock: {}", e))?;
            for (entity_id, id) in batch.iter().zip(&ids) {
                let terms = fetched.get(id).map(RemoteEntityTerms::to_terms).unwrap_or_default();
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
        match self.buffer.read() {
            Ok(buffer) => buffer.get(entity_id, term_type, language),
            Err(_) => Prefetched::NotPrefetched,
        }
    }

    fn get_prefetched_aliases(&self, _entity_id: &EntityId, _language: &str) -> Prefetched<Vec<String>> {
        Prefetched::NotPrefetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const BASE: &str = "https://wikidata.org/entity/";

    /// Remote that knows P1..=P120 and records every batch it is asked for.
    #[derive(Default)]
    struct FakeRemote {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl FederatedEntitySource for FakeRemote {
        async fn fetch_entities(
            &self,
            ids: &[FederatedPropertyId],
            languages: &[String],
        ) -> Result<BTreeMap<FederatedPropertyId, RemoteEntityTerms>> {
            self.batches.lock().unwrap().push(ids.len());
            Ok(ids
                .iter()
                .filter(|id| id.remote_id[1..].parse::<u32>().is_ok_and(|n| n <= 120))
                .map(|id| {
                    let mut terms = RemoteEntityTerms::default();
                    if languages.iter().any(|l| l == "en") {
                        terms.labels.insert("en".into(), format!("label of {}", id.remote_id));
                        terms.descriptions.insert("en".into(), String::new());
                    }
                    (id.clone(), terms)
                })
                .collect())
        }
    }

    fn fp(n: u32) -> EntityId {
        EntityId::federated_property(BASE, format!("P{n}"))
    }

    fn langs(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn fetches_in_batches_of_fifty() {
        let remote = Arc::new(FakeRemote::default());
        let lookup = ApiPrefetchingTermLookup::new(remote.clone());
        let ids: Vec<EntityId> = (1..=120).map(fp).collect();

        lookup
            .prefetch_terms(&ids, &[TermType::Label], &langs(&["en"]))
            .await
            .unwrap();

        assert_eq!(*remote.batches.lock().unwrap(), vec![50, 50, 20]);
        assert_eq!(
            lookup.get_prefetched_term(&fp(77), TermType::Label, "en"),
            Prefetched::Present("label of P77".into())
        );
    }

    #[tokio::test]
    async fn already_prefetched_entities_are_not_fetched_again() {
        let remote = Arc::new(FakeRemote::default());
        let lookup = ApiPrefetchingTermLookup::new(remote.clone());

        lookup
            .prefetch_terms(&[fp(1)], &[TermType::Label], &langs(&["en"]))
            .await
            .unwrap();
        lookup
            .prefetch_terms(&[fp(1), fp(2)], &[TermType::Label], &langs(&["en"]))
            .await
            .unwrap();

        assert_eq!(*remote.batches.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn unknown_remote_entities_are_absent() {
        let lookup = ApiPrefetchingTermLookup::new(Arc::new(FakeRemote::default()));
        lookup
            .prefetch_terms(&[fp(999)], &[TermType::Label], &langs(&["en"]))
            .await
            .unwrap();
        assert_eq!(lookup.get_prefetched_term(&fp(999), TermType::Label, "en"), Prefetched::Absent);
    }

    #[tokio::test]
    async fn empty_description_is_present() {
        let lookup = ApiPrefetchingTermLookup::new(Arc::new(FakeRemote::default()));
        let descriptions = lookup.get_descriptions(&fp(3), &langs(&["en", "de"])).await.unwrap();
        assert_eq!(descriptions.len(), 1);
        assert_eq!(descriptions.get("en").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn aliases_are_rejected() {
        let lookup = ApiPrefetchingTermLookup::new(Arc::new(FakeRemote::default()));
        let err = lookup
            .prefetch_terms(&[fp(1)], &[TermType::Label, TermType::Alias], &langs(&["en"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TermStoreError::UnsupportedTermType {
                term_type: TermType::Alias,
                ..
            }
        ));
        assert_eq!(lookup.get_prefetched_aliases(&fp(1), "en"), Prefetched::NotPrefetched);
    }

    #[tokio::test]
    async fn standard_ids_are_a_routing_error() {
        let lookup = ApiPrefetchingTermLookup::new(Arc::new(FakeRemote::default()));
        let err = lookup
            .get_labels(&EntityId::property(31), &langs(&["en"]))
            .await
            .unwrap_err();
        assert!(err.is_integrity_violation());
    }
}
