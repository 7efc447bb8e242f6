//! Revision-keyed cache in front of a fallback lookup for standard entities.
//!
//! An entry is keyed by the entity's latest revision, so an edit naturally
//! invalidates it. Entities without a revision (deleted, redirected or never
//! created) resolve to `None`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::entity_id::{EntityId, EntityIdKind};
use crate::error::TermStoreError;
use crate::fallback::{FallbackLabelDescriptionLookup, LanguageFallbackChain};
use crate::ports::Result;
use crate::term::{TermFallback, TermType};

/// Latest revision of a locally stored entity.
#[async_trait]
pub trait EntityRevisionLookup: Send + Sync {
    /// `None` when the entity does not exist or is a redirect.
    async fn latest_revision_id(&self, entity_id: &EntityId) -> Result<Option<u64>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    chain_key: String,
    entity_id: EntityId,
    revision_id: u64,
    term_type: TermType,
}

#[derive(Debug, Clone)]
struct CachedTerm {
    term: Option<TermFallback>,
    cached_at: DateTime<Utc>,
}

pub struct CachingFallbackLabelDescriptionLookup {
    inner: Arc<dyn FallbackLabelDescriptionLookup>,
    revisions: Arc<dyn EntityRevisionLookup>,
    /// `LanguageFallbackChain::cache_key` of the inner lookup's chain.
    chain_key: String,
    ttl_seconds: i64,
    max_entries: usize,
    cache: RwLock<HashMap<CacheKey, CachedTerm>>,
}

impl CachingFallbackLabelDescriptionLookup {
    /// `chain` must be the chain `inner` resolves with.
    pub fn new(
        inner: Arc<dyn FallbackLabelDescriptionLookup>,
        revisions: Arc<dyn EntityRevisionLookup>,
        chain: &LanguageFallbackChain,
        ttl_seconds: i64,
        max_entries: usize,
    ) -> Self {
        Self {
            inner,
            revisions,
            chain_key: chain.cache_key(),
            ttl_seconds,
            max_entries,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn chain_key(&self) -> &str {
        &self.chain_key
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    async fn get_term(&self, entity_id: &EntityId, term_type: TermType) -> Result<Option<TermFallback>> {
        if entity_id.kind() != EntityIdKind::Standard {
            return Err(TermStoreError::UnexpectedEntityKind {
                entity_id: entity_id.to_string(),
                expected: EntityIdKind::Standard,
            });
        }

        let Some(revision_id) = self.revisions.latest_revision_id(entity_id).await? else {
            tracing::info!(
                entity_id = %entity_id,
                "No revision for entity, possibly deleted or redirected; serving no term"
            );
            return Ok(None);
        };

        let key = CacheKey {
            chain_key: self.chain_key.clone(),
            entity_id: entity_id.clone(),
            revision_id,
            term_type,
        };
        let now = Utc::now();
        if let Some(cached) = self.cache.read().await.get(&key) {
            if (now - cached.cached_at).num_seconds() <= self.ttl_seconds {
                return Ok(cached.term.clone());
            }
        }

        let term = match term_type {
            TermType::Label => self.inner.get_label(entity_id).await?,
            TermType::Description => self.inner.get_description(entity_id).await?,
            TermType::Alias => {
                return Err(TermStoreError::UnsupportedTermType {
                    term_type,
                    source_name: "fallback lookups".into(),
                })
            }
        };

        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CachedTerm {
                term: term.clone(),
                cached_at: now,
            },
        );
        if cache.len() > self.max_entries {
            let ttl = self.ttl_seconds;
            cache.retain(|_, v| (now - v.cached_at).num_seconds() <= ttl);
            if cache.len() > self.max_entries {
                cache.clear();
            }
        }
        Ok(term)
    }
}

#[async_trait]
impl FallbackLabelDescriptionLookup for CachingFallbackLabelDescriptionLookup {
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
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingLookup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FallbackLabelDescriptionLookup for CountingLookup {
        async fn get_label(&self, _entity_id: &EntityId) -> Result<Option<TermFallback>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(TermFallback::new("en", format!("label #{n}"), "en", None)))
        }

        async fn get_description(&self, _entity_id: &EntityId) -> Result<Option<TermFallback>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[derive(Default)]
    struct Revisions {
        latest: Mutex<BTreeMap<EntityId, u64>>,
    }

    #[async_trait]
    impl EntityRevisionLookup for Revisions {
        async fn latest_revision_id(&self, entity_id: &EntityId) -> Result<Option<u64>> {
            Ok(self.latest.lock().unwrap().get(entity_id).copied())
        }
    }

    fn setup() -> (Arc<CountingLookup>, Arc<Revisions>, CachingFallbackLabelDescriptionLookup) {
        let inner = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
        });
        let revisions = Arc::new(Revisions::default());
        revisions.latest.lock().unwrap().insert(EntityId::item(1), 10);
        let chain = LanguageFallbackChain::from_languages(&["de", "en"]).unwrap();
        let caching =
            CachingFallbackLabelDescriptionLookup::new(inner.clone(), revisions.clone(), &chain, 3600, 100);
        (inner, revisions, caching)
    }

    #[tokio::test]
    async fn same_revision_is_served_from_cache() {
        let (inner, _revisions, caching) = setup();
        let first = caching.get_label(&EntityId::item(1)).await.unwrap();
        let second = caching.get_label(&EntityId::item(1)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn absent_terms_are_cached_as_well() {
        let (inner, _revisions, caching) = setup();
        assert_eq!(caching.get_description(&EntityId::item(1)).await.unwrap(), None);
        assert_eq!(caching.get_description(&EntityId::item(1)).await.unwrap(), None);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_revision_misses_the_cache() {
        let (inner, revisions, caching) = setup();
        caching.get_label(&EntityId::item(1)).await.unwrap();
        revisions.latest.lock().unwrap().insert(EntityId::item(1), 11);

        let label = caching.get_label(&EntityId::item(1)).await.unwrap().unwrap();

        assert_eq!(label.text, "label #1");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_revision_is_none_without_calling_inner() {
        let (inner, _revisions, caching) = setup();
        assert_eq!(caching.get_label(&EntityId::item(404)).await.unwrap(), None);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
        assert!(caching.is_empty().await);
    }

    #[test]
    fn chain_key_comes_from_the_chain() {
        let (_inner, _revisions, caching) = setup();
        assert_eq!(caching.chain_key(), "de,en");

        let variant = LanguageFallbackChain::new(vec![
            crate::fallback::LanguageWithConversion::variant("sr-el", "sr-ec"),
            crate::fallback::LanguageWithConversion::new("en"),
        ])
        .unwrap();
        let other = CachingFallbackLabelDescriptionLookup::new(
            Arc::new(CountingLookup {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(Revisions::default()),
            &variant,
            3600,
            100,
        );
        assert_eq!(other.chain_key(), variant.cache_key());
        assert_ne!(other.chain_key(), caching.chain_key());
    }

    #[tokio::test]
    async fn federated_ids_are_a_routing_error() {
        let (_inner, _revisions, caching) = setup();
        let err = caching
            .get_label(&EntityId::federated_property("https://wikidata.org/entity/", "P31"))
            .await
            .unwrap_err();
        assert!(err.is_integrity_violation());
    }
}
