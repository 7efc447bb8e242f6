//! Write transactions: link-table locking, diff application and term acquisition.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeSet;

use term_store_core::mapping::LinkTableMapping;
use term_store_core::ports::{Result, TermStoreBackend, TermStoreTransaction};
use term_store_core::term::{TermInLangId, TermsByType};

use crate::acquirer;
use crate::locks::{advisory_xact_lock, lock_key};

// ── PgTermStoreBackend ────────────────────────────────────────

/// Postgres-backed writer backend. Every `begin` checks out one pooled
/// connection for the lifetime of the returned transaction.
pub struct PgTermStoreBackend {
    pool: PgPool,
}

impl PgTermStoreBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TermStoreBackend for PgTermStoreBackend {
    async fn begin(&self) -> Result<Box<dyn TermStoreTransaction>> {
        let tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        Ok(Box::new(PgTermStoreTransaction { tx: Some(tx) }))
    }
}

// ── PgTermStoreTransaction ────────────────────────────────────

/// Dropping an unfinished transaction rolls it back (sqlx semantics).
pub struct PgTermStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTermStoreTransaction {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| anyhow!("transaction already finished").into())
    }
}

fn raw_ids(ids: &BTreeSet<TermInLangId>) -> Vec<i64> {
    ids.iter().map(|id| id.0).collect()
}

#[async_trait]
impl TermStoreTransaction for PgTermStoreTransaction {
    async fn lock_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
    ) -> Result<BTreeSet<TermInLangId>> {
        let tx = self.tx()?;

        // Row locks alone cannot serialize two first-time writes of the same
        // entity (there are no rows yet), hence the advisory lock.
        let key = lock_key(mapping.table_name(), &entity_numeric_id.to_string());
        advisory_xact_lock(tx, key).await?;

        let sql = format!(
            "SELECT {til} FROM {table} WHERE {entity} = $1 ORDER BY {til} FOR UPDATE",
            til = mapping.term_in_lang_id_column(),
            table = mapping.table_name(),
            entity = mapping.entity_id_column(),
        );
        let rows = sqlx::query_as::<_, (i64,)>(&sql)
            .bind(i64::from(entity_numeric_id))
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(rows.into_iter().map(|(id,)| TermInLangId(id)).collect())
    }

    async fn acquire_term_in_lang_ids(&mut self, terms: &TermsByType) -> Result<BTreeSet<TermInLangId>> {
        let tx = self.tx()?;
        acquirer::acquire_term_in_lang_ids(&mut **tx, terms).await
    }

    async fn insert_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
        ids: &BTreeSet<TermInLangId>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.tx()?;
        let sql = format!(
            r#"
            INSERT INTO {table} ({entity}, {til})
            SELECT $1::bigint, t FROM UNNEST($2::bigint[]) AS t
            ORDER BY t
            ON CONFLICT ({entity}, {til}) DO NOTHING
            "#,
            table = mapping.table_name(),
            entity = mapping.entity_id_column(),
            til = mapping.term_in_lang_id_column(),
        );
        sqlx::query(&sql)
            .bind(i64::from(entity_numeric_id))
            .bind(raw_ids(ids))
            .execute(&mut **tx)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn delete_entity_term_in_lang_ids(
        &mut self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
        ids: &BTreeSet<TermInLangId>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.tx()?;
        let sql = format!(
            "DELETE FROM {table} WHERE {entity} = $1 AND {til} = ANY($2::bigint[])",
            table = mapping.table_name(),
            entity = mapping.entity_id_column(),
            til = mapping.term_in_lang_id_column(),
        );
        sqlx::query(&sql)
            .bind(i64::from(entity_numeric_id))
            .bind(raw_ids(ids))
            .execute(&mut **tx)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow!("transaction already finished"))?;
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(|e| anyhow!(e))?;
        }
        Ok(())
    }
}
