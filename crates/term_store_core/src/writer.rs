//! Per-entity-kind term store writer.
//!
//! `store` replaces the full term set of one entity inside one write
//! transaction:
//!
//! 1. lock the entity's current link rows
//! 2. acquire TermInLangIds for the normalized target terms
//! 3. diff current against target
//! 4. insert new links, delete removed links, commit
//! 5. after commit, emit one cleanup job per removed id
//!
//! Orphan checks never run inside the write transaction; the cleaner picks the
//! removed ids up asynchronously.

use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::entity_id::EntityId;
use crate::error::TermStoreError;
use crate::mapping::LinkTableMapping;
use crate::normalize::StringNormalizer;
use crate::ports::{CleanupJobSink, Result, TermStoreBackend, TermStoreTransaction};
use crate::term::{Fingerprint, TermInLangId, TermsByType};

/// Link rows to add and remove to move an entity from `current` to `target`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDiff {
    pub to_insert: BTreeSet<TermInLangId>,
    pub to_remove: BTreeSet<TermInLangId>,
}

impl LinkDiff {
    pub fn compute(current: &BTreeSet<TermInLangId>, target: &BTreeSet<TermInLangId>) -> Self {
        Self {
            to_insert: target.difference(current).copied().collect(),
            to_remove: current.difference(target).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_remove.is_empty()
    }
}

/// Result of a successful `store` or `delete`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Ids linked to the entity after the write.
    pub linked: BTreeSet<TermInLangId>,
    pub inserted: BTreeSet<TermInLangId>,
    pub removed: BTreeSet<TermInLangId>,
    /// Cleanup jobs successfully handed to the queue.
    pub cleanup_jobs: Vec<Uuid>,
}

/// Stores and deletes the terms of one entity kind.
pub struct EntityTermStoreWriter {
    backend: Arc<dyn TermStoreBackend>,
    mapping: LinkTableMapping,
    normalizer: Arc<dyn StringNormalizer>,
    cleanup: Arc<dyn CleanupJobSink>,
}

impl EntityTermStoreWriter {
    pub fn new(
        backend: Arc<dyn TermStoreBackend>,
        mapping: LinkTableMapping,
        normalizer: Arc<dyn StringNormalizer>,
        cleanup: Arc<dyn CleanupJobSink>,
    ) -> Self {
        Self {
            backend,
            mapping,
            normalizer,
            cleanup,
        }
    }

    pub fn mapping(&self) -> &LinkTableMapping {
        &self.mapping
    }

    /// Make the entity's links exactly the decomposition of `fingerprint`.
    pub async fn store(&self, entity_id: &EntityId, fingerprint: &Fingerprint) -> Result<WriteOutcome> {
        let numeric_id = self.storable_numeric_id(entity_id)?;
        let terms = fingerprint.to_terms(self.normalizer.as_ref());
        self.write(entity_id, numeric_id, &terms).await
    }

    /// Remove every link of the entity. Same as storing an empty fingerprint.
    pub async fn delete(&self, entity_id: &EntityId) -> Result<WriteOutcome> {
        let numeric_id = self.storable_numeric_id(entity_id)?;
        self.write(entity_id, numeric_id, &TermsByType::new()).await
    }

    fn storable_numeric_id(&self, entity_id: &EntityId) -> Result<u32> {
        match entity_id {
            EntityId::Standard(id) if id.is_foreign() => {
                Err(TermStoreError::ForeignEntityId(entity_id.to_string()))
            }
            EntityId::Standard(id) if id.kind != self.mapping.entity_kind() => {
                Err(TermStoreError::UnsupportedEntityKind {
                    entity_id: entity_id.to_string(),
                    expected: self.mapping.entity_kind().to_string(),
                })
            }
            EntityId::Standard(id) => Ok(id.numeric_id),
            EntityId::FederatedProperty(_) => {
                Err(TermStoreError::ForeignEntityId(entity_id.to_string()))
            }
            EntityId::Pseudo(_) => Err(TermStoreError::PseudoEntityNotStorable(
                entity_id.to_string(),
            )),
        }
    }

    async fn write(
        &self,
        entity_id: &EntityId,
        numeric_id: u32,
        terms: &TermsByType,
    ) -> Result<WriteOutcome> {
        let result: Result<WriteOutcome> = async {
            let mut tx = self.backend.begin().await?;
            match self.apply(tx.as_mut(), numeric_id, terms).await {
                Ok(outcome) => {
                    tx.commit().await?;
                    Ok(outcome)
                }
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!("Rollback failed for entity {entity_id}: {rollback_err}");
                    }
                    Err(e)
                }
            }
        }
        .await;

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let payload = serde_json::to_string(terms).unwrap_or_else(|_| format!("{terms:?}"));
                tracing::error!(
                    entity_id = %entity_id,
                    entity_kind = %self.mapping.entity_kind(),
                    terms = %payload,
                    error = %e,
                    "Term store write failed"
                );
                return Err(e);
            }
        };

        tracing::debug!(
            entity_id = %entity_id,
            inserted = outcome.inserted.len(),
            removed = outcome.removed.len(),
            "Term store write committed"
        );

        // Only committed removals are handed to the cleaner.
        for id in &outcome.removed {
            let candidate = BTreeSet::from([*id]);
            match self.cleanup.enqueue(&candidate).await {
                Ok(job_id) => outcome.cleanup_jobs.push(job_id),
                Err(e) => tracing::error!(
                    entity_id = %entity_id,
                    term_in_lang_id = %id,
                    error = %e,
                    "Failed to enqueue term cleanup; the orphan sweep will pick it up"
                ),
            }
        }

        Ok(outcome)
    }

    async fn apply(
        &self,
        tx: &mut dyn TermStoreTransaction,
        numeric_id: u32,
        terms: &TermsByType,
    ) -> Result<WriteOutcome> {
        let current = tx
            .lock_entity_term_in_lang_ids(&self.mapping, numeric_id)
            .await?;
        let target = if terms.is_empty() {
            BTreeSet::new()
        } else {
            tx.acquire_term_in_lang_ids(terms).await?
        };

        let diff = LinkDiff::compute(&current, &target);
        if !diff.to_insert.is_empty() {
            tx.insert_entity_term_in_lang_ids(&self.mapping, numeric_id, &diff.to_insert)
                .await?;
        }
        if !diff.to_remove.is_empty() {
            tx.delete_entity_term_in_lang_ids(&self.mapping, numeric_id, &diff.to_remove)
                .await?;
        }

        Ok(WriteOutcome {
            linked: target,
            inserted: diff.to_insert,
            removed: diff.to_remove,
            cleanup_jobs: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_id::EntityKind;
    use crate::memory::{MemoryCleanupQueue, MemoryTermStore};
    use crate::normalize::NfcNormalizer;
    use crate::ports::TermInLangIdsResolver;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn item_writer(store: Arc<MemoryTermStore>, queue: Arc<MemoryCleanupQueue>) -> EntityTermStoreWriter {
        EntityTermStoreWriter::new(store, LinkTableMapping::items(), Arc::new(NfcNormalizer), queue)
    }

    fn ids(raw: &[i64]) -> BTreeSet<TermInLangId> {
        raw.iter().copied().map(TermInLangId).collect()
    }

    #[test]
    fn diff_splits_into_insert_and_remove() {
        let diff = LinkDiff::compute(&ids(&[1, 2, 3]), &ids(&[2, 3, 4]));
        assert_eq!(diff.to_insert, ids(&[4]));
        assert_eq!(diff.to_remove, ids(&[1]));
        assert!(LinkDiff::compute(&ids(&[1]), &ids(&[1])).is_empty());
    }

    #[tokio::test]
    async fn store_links_exactly_the_fingerprint() {
        let store = Arc::new(MemoryTermStore::standard());
        let queue = Arc::new(MemoryCleanupQueue::new());
        let writer = item_writer(store.clone(), queue.clone());
        let fingerprint = Fingerprint::new()
            .with_label("en", "Cat")
            .with_description("en", "small feline")
            .with_aliases("en", ["Kitty", "Puss"]);

        let outcome = writer.store(&EntityId::item(1), &fingerprint).await.unwrap();

        assert_eq!(outcome.linked.len(), 4);
        assert_eq!(outcome.inserted, outcome.linked);
        assert!(outcome.removed.is_empty());
        let linked = store
            .entity_term_in_lang_ids(&LinkTableMapping::items(), 1)
            .await
            .unwrap();
        assert_eq!(linked, outcome.linked);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn changed_label_unlinks_old_id_and_enqueues_cleanup() {
        let store = Arc::new(MemoryTermStore::standard());
        let queue = Arc::new(MemoryCleanupQueue::new());
        let writer = item_writer(store.clone(), queue.clone());
        let first = writer
            .store(&EntityId::item(1), &Fingerprint::new().with_label("en", "Cat"))
            .await
            .unwrap();

        let second = writer
            .store(&EntityId::item(1), &Fingerprint::new().with_label("en", "Dog"))
            .await
            .unwrap();

        assert_eq!(second.removed, first.linked);
        assert_eq!(second.inserted.len(), 1);
        assert_eq!(second.cleanup_jobs.len(), 1);
        assert_eq!(queue.pending_count(), 1);
    }

    #[tokio::test]
    async fn delete_removes_all_links() {
        let store = Arc::new(MemoryTermStore::standard());
        let queue = Arc::new(MemoryCleanupQueue::new());
        let writer = item_writer(store.clone(), queue.clone());
        writer
            .store(
                &EntityId::item(5),
                &Fingerprint::new().with_label("en", "Cat").with_label("de", "Katze"),
            )
            .await
            .unwrap();

        let outcome = writer.delete(&EntityId::item(5)).await.unwrap();

        assert_eq!(outcome.removed.len(), 2);
        assert!(outcome.linked.is_empty());
        assert!(store
            .entity_term_in_lang_ids(&LinkTableMapping::items(), 5)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(queue.pending_count(), 2);
    }

    #[tokio::test]
    async fn rejects_ids_it_cannot_store() {
        let store = Arc::new(MemoryTermStore::standard());
        let writer = item_writer(store, Arc::new(MemoryCleanupQueue::new()));
        let fingerprint = Fingerprint::new().with_label("en", "x");

        let foreign = EntityId::Standard(crate::entity_id::StandardEntityId {
            kind: EntityKind::Item,
            numeric_id: 1,
            repository: Some("wd".into()),
        });
        assert!(matches!(
            writer.store(&foreign, &fingerprint).await,
            Err(TermStoreError::ForeignEntityId(_))
        ));
        assert!(matches!(
            writer.store(&EntityId::pseudo("entity-schema", "E1"), &fingerprint).await,
            Err(TermStoreError::PseudoEntityNotStorable(_))
        ));
        assert!(matches!(
            writer.store(&EntityId::property(1), &fingerprint).await,
            Err(TermStoreError::UnsupportedEntityKind { .. })
        ));
        assert!(matches!(
            writer
                .delete(&EntityId::federated_property("https://wikidata.org/entity/", "P31"))
                .await,
            Err(TermStoreError::ForeignEntityId(_))
        ));
    }

    // ── Failure handling ─────────────────────────────────────────

    /// Delegates to the memory store but fails link deletion on demand.
    struct FlakyBackend {
        inner: Arc<MemoryTermStore>,
        fail_delete: Arc<AtomicBool>,
    }

    struct FlakyTransaction {
        inner: Box<dyn TermStoreTransaction>,
        fail_delete: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TermStoreBackend for FlakyBackend {
        async fn begin(&self) -> Result<Box<dyn TermStoreTransaction>> {
            Ok(Box::new(FlakyTransaction {
                inner: self.inner.begin().await?,
                fail_delete: self.fail_delete.clone(),
            }))
        }
    }

    #[async_trait]
    impl TermStoreTransaction for FlakyTransaction {
        async fn lock_entity_term_in_lang_ids(
            &mut self,
            mapping: &LinkTableMapping,
            entity_numeric_id: u32,
        ) -> Result<BTreeSet<TermInLangId>> {
            self.inner.lock_entity_term_in_lang_ids(mapping, entity_numeric_id).await
        }

        async fn acquire_term_in_lang_ids(&mut self, terms: &TermsByType) -> Result<BTreeSet<TermInLangId>> {
            self.inner.acquire_term_in_lang_ids(terms).await
        }

        async fn insert_entity_term_in_lang_ids(
            &mut self,
            mapping: &LinkTableMapping,
            entity_numeric_id: u32,
            ids: &BTreeSet<TermInLangId>,
        ) -> Result<()> {
            self.inner
                .insert_entity_term_in_lang_ids(mapping, entity_numeric_id, ids)
                .await
        }

        async fn delete_entity_term_in_lang_ids(
            &mut self,
            mapping: &LinkTableMapping,
            entity_numeric_id: u32,
            ids: &BTreeSet<TermInLangId>,
        ) -> Result<()> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(TermStoreError::Storage(anyhow::anyhow!("connection reset")));
            }
            self.inner
                .delete_entity_term_in_lang_ids(mapping, entity_numeric_id, ids)
                .await
        }

        async fn commit(&mut self) -> Result<()> {
            self.inner.commit().await
        }

        async fn rollback(&mut self) -> Result<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn storage_failure_rolls_back_everything_and_enqueues_nothing() {
        let store = Arc::new(MemoryTermStore::standard());
        let queue = Arc::new(MemoryCleanupQueue::new());
        let fail_delete = Arc::new(AtomicBool::new(false));
        let writer = EntityTermStoreWriter::new(
            Arc::new(FlakyBackend {
                inner: store.clone(),
                fail_delete: fail_delete.clone(),
            }),
            LinkTableMapping::items(),
            Arc::new(NfcNormalizer),
            queue.clone(),
        );
        let before = writer
            .store(&EntityId::item(1), &Fingerprint::new().with_label("en", "Cat"))
            .await
            .unwrap();
        let term_count = store.term_in_lang_count().await;

        fail_delete.store(true, Ordering::SeqCst);
        let err = writer
            .store(&EntityId::item(1), &Fingerprint::new().with_label("en", "Dog"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        let linked = store
            .entity_term_in_lang_ids(&LinkTableMapping::items(), 1)
            .await
            .unwrap();
        assert_eq!(linked, before.linked, "links must be untouched");
        assert_eq!(store.term_in_lang_count().await, term_count, "acquired ids rolled back");
        assert_eq!(queue.pending_count(), 0);
    }
}
