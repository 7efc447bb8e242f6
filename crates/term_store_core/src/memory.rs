//! In-memory term store and cleanup queue for tests and POC use.
//!
//! Write transactions are serialized behind one async mutex and work on a
//! staged copy of the state; `commit` publishes the copy, anything else
//! discards it. Per-entity write concurrency needs the Postgres backend.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::cleanup::CleanupJob;
use crate::mapping::{LinkTableMapping, LinkTableRegistry};
use crate::ports::{
    CleanReport, CleanupJobQueue, CleanupJobSink, Result, TermFilter, TermInLangIdsCleaner,
    TermInLangIdsResolver, TermStoreBackend, TermStoreTransaction,
};
use crate::term::{TermInLangId, TermKey, TermsByType};

// ── MemoryTermStore ──

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    by_key: BTreeMap<TermKey, TermInLangId>,
    by_id: BTreeMap<TermInLangId, TermKey>,
    /// Link rows per link table name.
    links: BTreeMap<String, BTreeSet<(u32, TermInLangId)>>,
}

impl MemoryState {
    fn entity_ids(&self, table: &str, entity_numeric_id: u32) -> BTreeSet<TermInLangId> {
        self.links
            .get(table)
            .map(|rows| {
                rows.range((entity_numeric_id, TermInLangId(i64::MIN))..=(entity_numeric_id, TermInLangId(i64::MAX)))
                    .map(|(_, id)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_referenced(&self, registry: &LinkTableRegistry, id: TermInLangId) -> bool {
        registry.tables().iter().any(|table| {
            self.links
                .get(table.table_name())
                .is_some_and(|rows| rows.iter().any(|(_, linked)| *linked == id))
        })
    }

    fn resolve(&self, ids: impl IntoIterator<Item = TermInLangId>, filter: &TermFilter) -> TermsByType {
        let mut terms = TermsByType::new();
        for id in ids {
            if let Some(key) = self.by_id.get(&id) {
                if filter.accepts(key.term_type, &key.language) {
                    terms.push(key.term_type, key.language.as_str(), key.text.as_str());
                }
            }
        }
        terms
    }
}

/// Term store backend, resolver and cleaner over process memory.
pub struct MemoryTermStore {
    state: Arc<Mutex<MemoryState>>,
    registry: LinkTableRegistry,
}

impl MemoryTermStore {
    pub fn new(registry: LinkTableRegistry) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            })),
            registry,
        }
    }

    /// Store with the item and property link tables.
    pub fn standard() -> Self {
        Self::new(LinkTableRegistry::standard())
    }

    pub fn registry(&self) -> &LinkTableRegistry {
        &self.registry
    }

    pub async fn term_in_lang_count(&self) -> usize {
        self.state.lock().await.by_id.len()
    }

    pub async fn term_in_lang_id(&self, key: &TermKey) -> Option<TermInLangId> {
        self.state.lock().await.by_key.get(key).copied()
    }

    pub async fn link_count(&self, mapping: &LinkTableMapping) -> usize {
        self.state
            .lock()
            .await
            .links
            .get(mapping.table_name())
            .map_or(0, BTreeSet::len)
    }

    /// Number of link rows, across all tables, that reference `id`.
    pub async fn reference_count(&self, id: TermInLangId) -> usize {
        self.state
            .lock()
            .await
            .links
            .values()
            .flat_map(|rows| rows.iter())
            .filter(|(_, linked)| *linked == id)
            .count()
    }
}

/// Write transaction holding the store's mutex until commit or drop.
pub struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    staged: MemoryState,
}

impl MemoryTransaction {
    fn staged(&mut self) -> Result<&mut MemoryState> {
        if self.guard.is_none() {
            return Err(anyhow!("transaction already finished").into());
        }
        Ok(&mut self.staged)
    }
}

#[async_trait]
impl TermStoreBackend for MemoryTermStore {
    async fn begin(&self) -> Result<Box<dyn TermStoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = MemoryState::clone(&guard);
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            staged,
        }))
    }
}

#[async_trait]
impl TermStoreTransaction for MemoryTransaction {
    async fn lock_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
    ) -> Result<BTreeSet<TermInLangId>> {
        Ok(self.staged()?.entity_ids(mapping.table_name(), entity_numeric_id))
    }

    async fn acquire_term_in_lang_ids(&mut self, terms: &TermsByType) -> Result<BTreeSet<TermInLangId>> {
        let state = self.staged()?;
        let mut ids = BTreeSet::new();
        for key in terms.keys() {
            let id = match state.by_key.get(&key) {
                Some(id) => *id,
                None => {
                    let id = TermInLangId(state.next_id);
                    state.next_id += 1;
                    state.by_key.insert(key.clone(), id);
                    state.by_id.insert(id, key);
                    id
                }
            };
            ids.insert(id);
        }
        Ok(ids)
    }

    async fn insert_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
        ids: &BTreeSet<TermInLangId>,
    ) -> Result<()> {
        let state = self.staged()?;
        if let Some(missing) = ids.iter().find(|id| !state.by_id.contains_key(*id)) {
            return Err(anyhow!("link to unknown term_in_lang id {missing}").into());
        }
        let rows = state.links.entry(mapping.table_name().to_string()).or_default();
        rows.extend(ids.iter().map(|id| (entity_numeric_id, *id)));
        Ok(())
    }

    async fn delete_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
        ids: &BTreeSet<TermInLangId>,
    ) -> Result<()> {
        let state = self.staged()?;
        if let Some(rows) = state.links.get_mut(mapping.table_name()) {
            for id in ids {
                rows.remove(&(entity_numeric_id, *id));
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| anyhow!("transaction already finished"))?;
        *guard = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.guard = None;
        self.staged = MemoryState::default();
        Ok(())
    }
}

#[async_trait]
impl TermInLangIdsResolver for MemoryTermStore {
    async fn resolve_term_in_lang_ids(
        &self,
        ids: &BTreeSet<TermInLangId>,
        filter: &TermFilter,
    ) -> Result<TermsByType> {
        if ids.is_empty() || filter.is_unsatisfiable() {
            return Ok(TermsByType::new());
        }
        let state = self.state.lock().await;
        Ok(state.resolve(ids.iter().copied(), filter))
    }

    async fn resolve_grouped_term_in_lang_ids(
        &self,
        mapping: &LinkTableMapping,
        entity_numeric_ids: &[u32],
        filter: &TermFilter,
    ) -> Result<BTreeMap<u32, TermsByType>> {
        let mut grouped = BTreeMap::new();
        if filter.is_unsatisfiable() {
            return Ok(grouped);
        }
        let state = self.state.lock().await;
        for entity_numeric_id in entity_numeric_ids {
            let ids = state.entity_ids(mapping.table_name(), *entity_numeric_id);
            let terms = state.resolve(ids, filter);
            if !terms.is_empty() {
                grouped.insert(*entity_numeric_id, terms);
            }
        }
        Ok(grouped)
    }

    async fn entity_term_in_lang_ids(
        &self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
    ) -> Result<BTreeSet<TermInLangId>> {
        let state = self.state.lock().await;
        Ok(state.entity_ids(mapping.table_name(), entity_numeric_id))
    }
}

#[async_trait]
impl TermInLangIdsCleaner for MemoryTermStore {
    async fn clean_term_in_lang_ids(&self, ids: &BTreeSet<TermInLangId>) -> Result<CleanReport> {
        let mut state = self.state.lock().await;
        let mut report = CleanReport::default();
        for id in ids {
            if !state.by_id.contains_key(id) {
                continue;
            }
            if state.is_referenced(&self.registry, *id) {
                report.still_referenced.insert(*id);
                continue;
            }
            if let Some(key) = state.by_id.remove(id) {
                state.by_key.remove(&key);
            }
            report.deleted.insert(*id);
        }
        tracing::debug!(
            deleted = report.deleted.len(),
            still_referenced = report.still_referenced.len(),
            "Cleaned term_in_lang ids"
        );
        Ok(report)
    }

    async fn find_orphan_term_in_lang_ids(&self, limit: i64) -> Result<Vec<TermInLangId>> {
        let state = self.state.lock().await;
        Ok(state
            .by_id
            .keys()
            .copied()
            .filter(|id| !state.is_referenced(&self.registry, *id))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }
}

// ── MemoryCleanupQueue ──

#[derive(Debug, Clone, PartialEq, Eq)]
enum JobStatus {
    Pending,
    Claimed { by: String, at: DateTime<Utc> },
    Processed,
    DeadLetter,
}

/// In-memory CleanupJobQueue for testing and POC.
pub struct MemoryCleanupQueue {
    inner: RwLock<Vec<(CleanupJob, JobStatus)>>,
}

impl MemoryCleanupQueue {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    fn count(&self, pred: impl Fn(&JobStatus) -> bool) -> usize {
        self.inner
            .read()
            .map(|jobs| jobs.iter().filter(|(_, status)| pred(status)).count())
            .unwrap_or(0)
    }

    /// Jobs waiting to be claimed or claimed but unfinished.
    pub fn pending_count(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Pending | JobStatus::Claimed { .. }))
    }

    pub fn processed_count(&self) -> usize {
        self.count(|s| *s == JobStatus::Processed)
    }

    pub fn dead_letter_count(&self) -> usize {
        self.count(|s| *s == JobStatus::DeadLetter)
    }

    /// Snapshot of every job ever enqueued, in enqueue order.
    pub fn jobs(&self) -> Vec<CleanupJob> {
        self.inner
            .read()
            .map(|jobs| jobs.iter().map(|(job, _)| job.clone()).collect())
            .unwrap_or_default()
    }

    fn update(&self, job_id: Uuid, f: impl FnOnce(&mut CleanupJob, &mut JobStatus)) -> Result<()> {
        let mut jobs = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let (job, status) = jobs
            .iter_mut()
            .find(|(job, _)| job.job_id == job_id)
            .ok_or_else(|| anyhow!("cleanup job {job_id} not found"))?;
        f(job, status);
        Ok(())
    }
}

impl Default for MemoryCleanupQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CleanupJobSink for MemoryCleanupQueue {
    async fn enqueue(&self, ids: &BTreeSet<TermInLangId>) -> Result<Uuid> {
        let job = CleanupJob::new(ids.clone());
        let job_id = job.job_id;
        self.inner
            .write()
            .map_err(|e| anyhow!("Lock: {}", e))?
            .push((job, JobStatus::Pending));
        Ok(job_id)
    }
}

#[async_trait]
impl CleanupJobQueue for MemoryCleanupQueue {
    async fn claim_next(&self, claimer_id: &str, claim_timeout_secs: i64) -> Result<Option<CleanupJob>> {
        let now = Utc::now();
        let mut jobs = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let claimable = jobs.iter_mut().find(|(_, status)| match status {
            JobStatus::Pending => true,
            JobStatus::Claimed { at, .. } => *at + chrono::Duration::seconds(claim_timeout_secs) < now,
            _ => false,
        });
        Ok(claimable.map(|(job, status)| {
            job.attempt_count += 1;
            *status = JobStatus::Claimed {
                by: claimer_id.to_string(),
                at: now,
            };
            job.clone()
        }))
    }

    async fn mark_processed(&self, job_id: Uuid) -> Result<()> {
        self.update(job_id, |_, status| *status = JobStatus::Processed)
    }

    async fn record_failure(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.update(job_id, |job, status| {
            job.last_error = Some(error.to_string());
            *status = JobStatus::Pending;
        })
    }

    async fn mark_dead_letter(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.update(job_id, |job, status| {
            job.last_error = Some(error.to_string());
            *status = JobStatus::DeadLetter;
        })
    }
}
