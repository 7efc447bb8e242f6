//! Storage port traits for the term store.
//! Implemented by term_store_postgres and by `memory::MemoryTermStore`; core
//! logic depends only on these traits.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::cleanup::CleanupJob;
use crate::error::TermStoreError;
use crate::mapping::LinkTableMapping;
use crate::term::{TermInLangId, TermType, TermsByType};

pub type Result<T> = std::result::Result<T, TermStoreError>;

// ── Write path ────────────────────────────────────────────────

/// One write transaction against the term store.
///
/// Every call on the same value runs inside the same database transaction, so
/// ids returned by `acquire_term_in_lang_ids` can be linked, and the links diffed,
/// before anything becomes visible. Dropping the value without `commit` rolls back.
#[async_trait]
pub trait TermStoreTransaction: Send {
    /// Lock the entity's current link rows and return the ids they reference.
    /// Holds until commit or rollback; concurrent writes to the same entity wait here.
    async fn lock_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
    ) -> Result<BTreeSet<TermInLangId>>;

    /// Return the ids of all triples in `terms`, creating the missing ones.
    /// Concurrent acquisition of the same triple converges on one id.
    async fn acquire_term_in_lang_ids(&mut self, terms: &TermsByType) -> Result<BTreeSet<TermInLangId>>;

    /// Insert link rows. Rows that already exist are ignored.
    async fn insert_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
        ids: &BTreeSet<TermInLangId>,
    ) -> Result<()>;

    async fn delete_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
        ids: &BTreeSet<TermInLangId>,
    ) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Opens write transactions.
#[async_trait]
pub trait TermStoreBackend: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TermStoreTransaction>>;
}

// ── Read path ─────────────────────────────────────────────────

/// Restricts resolution to some term types and/or languages. `None` means all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermFilter {
    pub term_types: Option<BTreeSet<TermType>>,
    pub languages: Option<BTreeSet<String>>,
}

impl TermFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_term_types<I: IntoIterator<Item = TermType>>(mut self, term_types: I) -> Self {
        self.term_types = Some(term_types.into_iter().collect());
        self
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = Some(languages.into_iter().map(Into::into).collect());
        self
    }

    pub fn accepts(&self, term_type: TermType, language: &str) -> bool {
        self.term_types.as_ref().map_or(true, |t| t.contains(&term_type))
            && self.languages.as_ref().map_or(true, |l| l.contains(language))
    }

    /// An explicit empty type or language list can match nothing.
    pub fn is_unsatisfiable(&self) -> bool {
        self.term_types.as_ref().is_some_and(BTreeSet::is_empty)
            || self.languages.as_ref().is_some_and(BTreeSet::is_empty)
    }
}

/// Batched, read-only resolution of TermInLangIds back into terms.
/// Unknown ids are omitted from results; they may have been cleaned up meanwhile.
#[async_trait]
pub trait TermInLangIdsResolver: Send + Sync {
    async fn resolve_term_in_lang_ids(
        &self,
        ids: &BTreeSet<TermInLangId>,
        filter: &TermFilter,
    ) -> Result<TermsByType>;

    /// Terms of many entities of one kind in one round-trip. Entities without
    /// matching terms are absent from the map.
    async fn resolve_grouped_term_in_lang_ids(
        &self,
        mapping: &LinkTableMapping,
        entity_numeric_ids: &[u32],
        filter: &TermFilter,
    ) -> Result<BTreeMap<u32, TermsByType>>;

    /// Ids linked to one entity, without locking.
    async fn entity_term_in_lang_ids(
        &self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
    ) -> Result<BTreeSet<TermInLangId>>;
}

// ── Cleanup ───────────────────────────────────────────────────

/// Outcome of one cleaner run. Ids never seen (already deleted) appear nowhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub deleted: BTreeSet<TermInLangId>,
    /// Linked again by some entity since the candidate was emitted.
    pub still_referenced: BTreeSet<TermInLangId>,
    /// Held by a concurrent writer or cleaner; worth another attempt later.
    pub skipped_locked: BTreeSet<TermInLangId>,
}

impl CleanReport {
    pub fn merge(&mut self, other: CleanReport) {
        self.deleted.extend(other.deleted);
        self.still_referenced.extend(other.still_referenced);
        self.skipped_locked.extend(other.skipped_locked);
    }
}

/// Deletes candidate ids that no registered link table references any more.
/// Running it twice on the same ids is harmless.
#[async_trait]
pub trait TermInLangIdsCleaner: Send + Sync {
    async fn clean_term_in_lang_ids(&self, ids: &BTreeSet<TermInLangId>) -> Result<CleanReport>;

    /// Ids that no registered link table references, oldest first.
    async fn find_orphan_term_in_lang_ids(&self, limit: i64) -> Result<Vec<TermInLangId>>;
}

/// Receiving end of the writer's "candidate ids to check" messages.
#[async_trait]
pub trait CleanupJobSink: Send + Sync {
    async fn enqueue(&self, ids: &BTreeSet<TermInLangId>) -> Result<Uuid>;
}

/// Durable cleanup job queue with at-least-once delivery.
#[async_trait]
pub trait CleanupJobQueue: CleanupJobSink {
    /// Claim the oldest available job and bump its attempt count. A claim
    /// expires after the timeout, so jobs of crashed workers are picked up again.
    async fn claim_next(&self, claimer_id: &str, claim_timeout_secs: i64) -> Result<Option<CleanupJob>>;

    async fn mark_processed(&self, job_id: Uuid) -> Result<()>;

    /// Release the claim so the job is retried.
    async fn record_failure(&self, job_id: Uuid, error: &str) -> Result<()>;

    async fn mark_dead_letter(&self, job_id: Uuid, error: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_accepts_everything() {
        let filter = TermFilter::all();
        assert!(filter.accepts(TermType::Alias, "xx"));
        assert!(!filter.is_unsatisfiable());
    }

    #[test]
    fn filter_restricts_types_and_languages() {
        let filter = TermFilter::all()
            .with_term_types([TermType::Label])
            .with_languages(["en", "de"]);
        assert!(filter.accepts(TermType::Label, "de"));
        assert!(!filter.accepts(TermType::Description, "de"));
        assert!(!filter.accepts(TermType::Label, "fr"));
    }

    #[test]
    fn empty_language_list_is_unsatisfiable() {
        let filter = TermFilter::all().with_languages(Vec::<String>::new());
        assert!(filter.is_unsatisfiable());
    }
}
