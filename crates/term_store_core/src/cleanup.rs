//! Asynchronous orphan cleanup.
//!
//! The writer emits candidate TermInLangIds as `CleanupJob`s after its
//! transaction commits. `CleanupDispatcher` consumes them: claim a job, run the
//! cleaner, then mark the job processed, retry it, or dead-letter it.
//! An optional orphan sweep re-enqueues ids that were never handed to the
//! queue (e.g. the process died between commit and enqueue).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::ports::{CleanReport, CleanupJobQueue, Result, TermInLangIdsCleaner};
use crate::term::TermInLangId;

/// One unit of cleanup work as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupJob {
    pub job_id: Uuid,
    pub term_in_lang_ids: BTreeSet<TermInLangId>,
    /// Claims so far, including the current one.
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl CleanupJob {
    pub fn new(term_in_lang_ids: BTreeSet<TermInLangId>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            term_in_lang_ids,
            attempt_count: 0,
            created_at: Utc::now(),
            last_error: None,
        }
    }
}

/// Configuration for the cleanup dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPolicy {
    /// Sleep between polls when the queue is empty.
    pub interval_ms: u64,
    /// Attempts after which a failing job is dead-lettered instead of retried.
    pub max_fails: u32,
    pub claimer_id: String,
    /// A claimed job not finished within this many seconds may be claimed again.
    pub claim_timeout_secs: i64,
    /// Maximum orphans enqueued per sweep; 0 disables the sweep.
    pub orphan_sweep_limit: i64,
    pub orphan_sweep_interval_secs: u64,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_fails: 5,
            claimer_id: "cleanup-worker-1".to_string(),
            claim_timeout_secs: 300,
            orphan_sweep_limit: 0,
            orphan_sweep_interval_secs: 3600,
        }
    }
}

impl CleanupPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn orphan_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_interval_secs)
    }
}

/// What `CleanupDispatcher::process_next` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing to claim.
    Idle,
    Processed { job_id: Uuid, report: CleanReport },
    /// Processed, but some ids were locked and went back to the queue as a
    /// new job. The caller should wait before claiming again.
    Deferred { job_id: Uuid, report: CleanReport },
    /// Failed, claim released for another attempt.
    Retrying { job_id: Uuid, error: String },
    DeadLettered { job_id: Uuid, error: String },
}

/// Background consumer of cleanup jobs.
pub struct CleanupDispatcher {
    queue: Arc<dyn CleanupJobQueue>,
    cleaner: Arc<dyn TermInLangIdsCleaner>,
    policy: CleanupPolicy,
}

impl CleanupDispatcher {
    pub fn new(
        queue: Arc<dyn CleanupJobQueue>,
        cleaner: Arc<dyn TermInLangIdsCleaner>,
        policy: CleanupPolicy,
    ) -> Self {
        Self {
            queue,
            cleaner,
            policy,
        }
    }

    pub fn policy(&self) -> &CleanupPolicy {
        &self.policy
    }

    /// Run the dispatcher loop. This never returns under normal operation.
    /// Spawn it as a background task via `tokio::spawn`, or race it against a
    /// shutdown signal.
    pub async fn run(&self) {
        tracing::info!(
            "CleanupDispatcher started (claimer={}, poll interval={:?}, max_fails={}, orphan sweep limit={})",
            self.policy.claimer_id,
            self.policy.interval(),
            self.policy.max_fails,
            self.policy.orphan_sweep_limit
        );
        let mut last_sweep: Option<tokio::time::Instant> = None;
        loop {
            if self.policy.orphan_sweep_limit > 0
                && last_sweep.map_or(true, |at| at.elapsed() >= self.policy.orphan_sweep_interval())
            {
                last_sweep = Some(tokio::time::Instant::now());
                if let Err(e) = self.sweep_orphans(self.policy.orphan_sweep_limit).await {
                    tracing::error!("Orphan sweep failed: {e}");
                }
            }

            match self.process_next().await {
                Ok(DispatchOutcome::Idle | DispatchOutcome::Deferred { .. }) => {
                    tokio::time::sleep(self.policy.interval()).await
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Cleanup job claim failed: {e}");
                    tokio::time::sleep(self.policy.interval()).await;
                }
            }
        }
    }

    /// Claim and process at most one job.
    ///
    /// Errors are returned only for queue failures while claiming; failures of
    /// the job itself are recorded on the job and reported in the outcome.
    pub async fn process_next(&self) -> Result<DispatchOutcome> {
        let Some(job) = self
            .queue
            .claim_next(&self.policy.claimer_id, self.policy.claim_timeout_secs)
            .await?
        else {
            return Ok(DispatchOutcome::Idle);
        };

        let job_id = job.job_id;
        tracing::debug!(
            "Processing cleanup job {job_id} ({} ids, attempt {})",
            job.term_in_lang_ids.len(),
            job.attempt_count
        );

        match self.cleaner.clean_term_in_lang_ids(&job.term_in_lang_ids).await {
            Ok(report) => {
                tracing::debug!(
                    "Cleanup job {job_id}: deleted={} still_referenced={} skipped_locked={}",
                    report.deleted.len(),
                    report.still_referenced.len(),
                    report.skipped_locked.len()
                );
                let deferred = !report.skipped_locked.is_empty();
                if deferred {
                    // Locked ids belong to an in-flight writer or cleaner; look again later.
                    if let Err(e) = self.queue.enqueue(&report.skipped_locked).await {
                        tracing::error!(
                            "Failed to re-enqueue locked ids {:?} from job {job_id}: {e}",
                            report.skipped_locked
                        );
                    }
                }
                if let Err(e) = self.queue.mark_processed(job_id).await {
                    tracing::error!("Failed to mark cleanup job {job_id} as processed: {e}");
                }
                if deferred {
                    Ok(DispatchOutcome::Deferred { job_id, report })
                } else {
                    Ok(DispatchOutcome::Processed { job_id, report })
                }
            }
            Err(e) => {
                let error = e.to_string();
                tracing::error!("Cleanup job {job_id} failed: {error}");
                if !e.is_retryable() || job.attempt_count >= self.policy.max_fails {
                    tracing::error!(
                        "DEAD LETTER: cleanup job {job_id} will not be retried (attempts={}, max_fails={})",
                        job.attempt_count,
                        self.policy.max_fails
                    );
                    if let Err(mark_err) = self.queue.mark_dead_letter(job_id, &error).await {
                        tracing::error!("Failed to dead-letter cleanup job {job_id}: {mark_err}");
                    }
                    Ok(DispatchOutcome::DeadLettered { job_id, error })
                } else {
                    if let Err(mark_err) = self.queue.record_failure(job_id, &error).await {
                        tracing::error!(
                            "Failed to record failure for cleanup job {job_id}: {mark_err}"
                        );
                    }
                    Ok(DispatchOutcome::Retrying { job_id, error })
                }
            }
        }
    }

    /// Drain the queue until it is idle, a job was deferred, or `max_jobs`
    /// jobs were handled. A deferred job ends the drain so locked ids are not
    /// re-claimed while their writer is still open.
    pub async fn drain(&self, max_jobs: usize) -> Result<Vec<DispatchOutcome>> {
        let mut outcomes = Vec::new();
        while outcomes.len() < max_jobs {
            match self.process_next().await? {
                DispatchOutcome::Idle => break,
                outcome @ DispatchOutcome::Deferred { .. } => {
                    outcomes.push(outcome);
                    break;
                }
                outcome => outcomes.push(outcome),
            }
        }
        Ok(outcomes)
    }

    /// Enqueue up to `limit` unreferenced ids as one job. Returns how many were found.
    pub async fn sweep_orphans(&self, limit: i64) -> Result<usize> {
        let orphans: BTreeSet<TermInLangId> = self
            .cleaner
            .find_orphan_term_in_lang_ids(limit)
            .await?
            .into_iter()
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }
        let job_id = self.queue.enqueue(&orphans).await?;
        tracing::info!(
            target: "term_store.cleanup",
            orphans = orphans.len(),
            %job_id,
            "Orphan sweep enqueued cleanup job"
        );
        Ok(orphans.len())
    }
}
