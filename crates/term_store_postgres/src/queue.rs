//! Postgres-backed cleanup job queue (`term_store.cleanup_jobs`).

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeSet;
use uuid::Uuid;

use term_store_core::cleanup::CleanupJob;
use term_store_core::ports::{CleanupJobQueue, CleanupJobSink, Result};
use term_store_core::term::TermInLangId;

pub struct PgCleanupQueue {
    pool: PgPool,
}

impl PgCleanupQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Jobs neither processed nor dead-lettered.
    pub async fn pending_count(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT count(*) FROM term_store.cleanup_jobs
            WHERE processed_at IS NULL AND failed_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.0)
    }
}

#[async_trait]
impl CleanupJobSink for PgCleanupQueue {
    async fn enqueue(&self, ids: &BTreeSet<TermInLangId>) -> Result<Uuid> {
        let job_id = Uuid::new_v4();
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        sqlx::query(
            r#"
            INSERT INTO term_store.cleanup_jobs (job_id, term_in_lang_ids)
            VALUES ($1, $2)
            "#,
        )
        .bind(job_id)
        .bind(&raw_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(job_id)
    }
}

#[async_trait]
impl CleanupJobQueue for PgCleanupQueue {
    async fn claim_next(&self, claimer_id: &str, claim_timeout_secs: i64) -> Result<Option<CleanupJob>> {
        // Atomic claim using CTE + FOR UPDATE SKIP LOCKED. An expired claim is
        // claimable again; dead-lettered jobs never are.
        let row = sqlx::query_as::<_, (Uuid, Vec<i64>, i32, DateTime<Utc>, Option<String>)>(
            r#"
            WITH claimable AS (
                SELECT job_id
                FROM term_store.cleanup_jobs
                WHERE processed_at IS NULL
                  AND failed_at IS NULL
                  AND (claimed_at IS NULL OR claim_timeout_at < now())
                ORDER BY created_at, job_id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE term_store.cleanup_jobs j
            SET claimed_at = now(),
                claimer_id = $1,
                claim_timeout_at = now() + make_interval(secs => $2::double precision),
                attempt_count = j.attempt_count + 1
            FROM claimable c
            WHERE j.job_id = c.job_id
            RETURNING j.job_id, j.term_in_lang_ids, j.attempt_count, j.created_at, j.last_error
            "#,
        )
        .bind(claimer_id)
        .bind(claim_timeout_secs)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        Ok(row.map(
            |(job_id, term_in_lang_ids, attempt_count, created_at, last_error)| CleanupJob {
                job_id,
                term_in_lang_ids: term_in_lang_ids.into_iter().map(TermInLangId).collect(),
                attempt_count: attempt_count.max(0) as u32,
                created_at,
                last_error,
            },
        ))
    }

    async fn mark_processed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE term_store.cleanup_jobs
            SET processed_at = now()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn record_failure(&self, job_id: Uuid, error: &str) -> Result<()> {
        // Release the claim so the job can be picked up again.
        sqlx::query(
            r#"
            UPDATE term_store.cleanup_jobs
            SET claimed_at = NULL,
                claimer_id = NULL,
                claim_timeout_at = NULL,
                last_error = $2
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn mark_dead_letter(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE term_store.cleanup_jobs
            SET failed_at = now(),
                last_error = $2
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
