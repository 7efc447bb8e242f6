//! Orphan cleanup for interned terms.
//!
//! One run is one transaction:
//! 1. `FOR UPDATE SKIP LOCKED` on the candidate `term_in_lang` rows. Rows held
//!    by an in-flight writer (its acquisition share lock, or the foreign-key
//!    lock taken when it inserts a link) are skipped, not waited for.
//! 2. Re-check the locked ids against every registered link table.
//! 3. Delete the unreferenced ones, then cascade to `text_in_lang` and `text`
//!    rows that lost their last user, locking each level the same way.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeSet;

use term_store_core::mapping::LinkTableRegistry;
use term_store_core::ports::{CleanReport, Result, TermInLangIdsCleaner};
use term_store_core::term::TermInLangId;

pub struct PgTermInLangIdsCleaner {
    pool: PgPool,
    registry: LinkTableRegistry,
    referenced_sql: String,
    orphans_sql: String,
}

impl PgTermInLangIdsCleaner {
    pub fn new(pool: PgPool, registry: LinkTableRegistry) -> Self {
        let referenced_sql = referenced_sql(&registry);
        let orphans_sql = orphans_sql(&registry);
        Self {
            pool,
            registry,
            referenced_sql,
            orphans_sql,
        }
    }

    pub fn registry(&self) -> &LinkTableRegistry {
        &self.registry
    }
}

/// Ids from `$1` that any registered link table still references.
fn referenced_sql(registry: &LinkTableRegistry) -> String {
    registry
        .tables()
        .iter()
        .map(|m| {
            format!(
                "SELECT {col} FROM {table} WHERE {col} = ANY($1::bigint[])",
                col = m.term_in_lang_id_column(),
                table = m.table_name(),
            )
        })
        .collect::<Vec<_>>()
        .join("\nUNION\n")
}

/// Up to `$1` term_in_lang ids that no registered link table references.
fn orphans_sql(registry: &LinkTableRegistry) -> String {
    let unreferenced = registry
        .tables()
        .iter()
        .map(|m| {
            format!(
                "NOT EXISTS (SELECT 1 FROM {table} l WHERE l.{col} = t.id)",
                table = m.table_name(),
                col = m.term_in_lang_id_column(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n  AND ");
    format!(
        "SELECT t.id FROM term_store.term_in_lang t\nWHERE {unreferenced}\nORDER BY t.id\nLIMIT $1"
    )
}

#[async_trait]
impl TermInLangIdsCleaner for PgTermInLangIdsCleaner {
    async fn clean_term_in_lang_ids(&self, ids: &BTreeSet<TermInLangId>) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        if ids.is_empty() {
            return Ok(report);
        }
        let candidates: Vec<i64> = ids.iter().map(|id| id.0).collect();

        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let locked: BTreeSet<i64> = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT id FROM term_store.term_in_lang
            WHERE id = ANY($1::bigint[])
            ORDER BY id
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(&candidates)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?
        .into_iter()
        .map(|(id,)| id)
        .collect();

        // Candidates we could not lock either no longer exist or are busy.
        let unlocked: Vec<i64> = candidates
            .iter()
            .copied()
            .filter(|id| !locked.contains(id))
            .collect();
        if !unlocked.is_empty() {
            let busy = sqlx::query_as::<_, (i64,)>(
                "SELECT id FROM term_store.term_in_lang WHERE id = ANY($1::bigint[])",
            )
            .bind(&unlocked)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
            report.skipped_locked = busy.into_iter().map(|(id,)| TermInLangId(id)).collect();
        }

        if locked.is_empty() {
            tx.commit().await.map_err(|e| anyhow!(e))?;
            return Ok(report);
        }

        let locked_vec: Vec<i64> = locked.iter().copied().collect();
        let referenced: BTreeSet<i64> = sqlx::query_as::<_, (i64,)>(&self.referenced_sql)
            .bind(&locked_vec)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?
            .into_iter()
            .map(|(id,)| id)
            .collect();

        let orphans: Vec<i64> = locked_vec
            .iter()
            .copied()
            .filter(|id| !referenced.contains(id))
            .collect();
        report.still_referenced = referenced.into_iter().map(TermInLangId).collect();

        if !orphans.is_empty() {
            let text_in_lang_ids: Vec<i64> = sqlx::query_as::<_, (i64,)>(
                r#"
                DELETE FROM term_store.term_in_lang
                WHERE id = ANY($1::bigint[])
                RETURNING text_in_lang_id
                "#,
            )
            .bind(&orphans)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?
            .into_iter()
            .map(|(id,)| id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

            let text_ids: Vec<i64> = sqlx::query_as::<_, (i64,)>(
                r#"
                DELETE FROM term_store.text_in_lang til
                WHERE til.id IN (
                    SELECT id FROM term_store.text_in_lang
                    WHERE id = ANY($1::bigint[])
                    ORDER BY id
                    FOR UPDATE SKIP LOCKED
                )
                  AND NOT EXISTS (
                    SELECT 1 FROM term_store.term_in_lang t
                    WHERE t.text_in_lang_id = til.id
                )
                RETURNING til.text_id
                "#,
            )
            .bind(&text_in_lang_ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?
            .into_iter()
            .map(|(id,)| id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

            if !text_ids.is_empty() {
                sqlx::query(
                    r#"
                    DELETE FROM term_store.text x
                    WHERE x.id IN (
                        SELECT id FROM term_store.text
                        WHERE id = ANY($1::bigint[])
                        ORDER BY id
                        FOR UPDATE SKIP LOCKED
                    )
                      AND NOT EXISTS (
                        SELECT 1 FROM term_store.text_in_lang til
                        WHERE til.text_id = x.id
                    )
                    "#,
                )
                .bind(&text_ids)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!(e))?;
            }

            report.deleted = orphans.into_iter().map(TermInLangId).collect();
        }

        tx.commit().await.map_err(|e| anyhow!(e))?;

        tracing::debug!(
            deleted = report.deleted.len(),
            still_referenced = report.still_referenced.len(),
            skipped_locked = report.skipped_locked.len(),
            "Cleaned term_in_lang candidates"
        );
        Ok(report)
    }

    async fn find_orphan_term_in_lang_ids(&self, limit: i64) -> Result<Vec<TermInLangId>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, (i64,)>(&self.orphans_sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(rows.into_iter().map(|(id,)| TermInLangId(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use term_store_core::entity_id::EntityKind;
    use term_store_core::mapping::LinkTableMapping;

    #[test]
    fn reference_check_covers_every_registered_table() {
        let sql = referenced_sql(&LinkTableRegistry::standard());
        assert!(sql.contains("FROM term_store.item_terms"));
        assert!(sql.contains("FROM term_store.property_terms"));
        assert_eq!(sql.matches("UNION").count(), 1);
    }

    #[test]
    fn custom_tables_and_columns_are_used() {
        let properties = LinkTableMapping::new(
            EntityKind::Property,
            "wb.property_term_links",
            "link_id",
            "property_id",
            "term_id",
        )
        .unwrap();
        let registry = LinkTableRegistry::new(vec![LinkTableMapping::items(), properties]).unwrap();

        assert!(referenced_sql(&registry)
            .contains("SELECT term_id FROM wb.property_term_links WHERE term_id = ANY"));
        let orphans = orphans_sql(&registry);
        assert!(orphans.contains("NOT EXISTS (SELECT 1 FROM term_store.item_terms l"));
        assert!(orphans.contains("NOT EXISTS (SELECT 1 FROM wb.property_term_links l WHERE l.term_id = t.id)"));
        assert!(orphans.ends_with("LIMIT $1"));
    }
}
